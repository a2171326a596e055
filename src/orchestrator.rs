use crate::dispatch::{DispatchRouter, FanoutChannel, NotifyChannel};
use crate::snapshot::SnapshotBuilder;
use crate::store::{EntityStore, FirewallFilter, TenantFilter};
use crate::types::{
    AppError, ConfigHandle, ConfigHandlePatch, ConfigHandleSpec, ConfigRequest, ConfigResponse,
    DispatchEvent, Firewall, FirewallPatch, FirewallPolicy, FirewallRule, FirewallSnapshot,
    FirewallSpec, FirewallStatus, NetworkFunction, NetworkFunctionPatch, NetworkFunctionSpec,
    PolicyPatch, PolicySpec, Result, RulePatch, RulePosition, RuleSpec,
};
use std::sync::Arc;
use uuid::Uuid;

/// Sequences CRUD against the entity store, rebuilds firewall snapshots,
/// and pushes them through the dispatch router.
///
/// The control-plane record is the source of truth: once the store write
/// commits, the operation is reported successful and backend propagation
/// is best-effort. Dispatch failures are logged, never surfaced.
pub struct FirewallOrchestrator {
    store: Arc<dyn EntityStore>,
    snapshots: SnapshotBuilder,
    router: DispatchRouter,
}

impl FirewallOrchestrator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        fanout: Arc<dyn FanoutChannel>,
        notifier: Arc<dyn NotifyChannel>,
    ) -> Self {
        FirewallOrchestrator {
            snapshots: SnapshotBuilder::new(store.clone()),
            router: DispatchRouter::new(store.clone(), fanout, notifier),
            store,
        }
    }

    fn require_tenant(tenant_id: Option<Uuid>) -> Result<Uuid> {
        match tenant_id {
            Some(id) if !id.is_nil() => Ok(id),
            _ => Err(AppError::Validation(
                "tenant_id is required".to_string(),
            )),
        }
    }

    /// Builds and routes one snapshot, absorbing failures. A snapshot
    /// build error after a committed store write means the backend push
    /// is skipped and the inconsistency is left to out-of-band
    /// reconciliation; a channel error means the message was dropped.
    fn push_firewall(
        &self,
        firewall_id: Uuid,
        config_handle_id: Option<Uuid>,
        event: DispatchEvent,
    ) {
        let snapshot = match self.snapshots.build(firewall_id) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    "skipping dispatch for firewall {}: snapshot build failed: {}",
                    firewall_id,
                    e
                );
                return;
            }
        };
        self.route_snapshot(config_handle_id, &snapshot, event);
    }

    fn route_snapshot(
        &self,
        config_handle_id: Option<Uuid>,
        snapshot: &FirewallSnapshot,
        event: DispatchEvent,
    ) {
        if let Err(e) = self.router.dispatch(config_handle_id, snapshot, event) {
            tracing::warn!(
                "backend dispatch failed for firewall {} ({:?}): {}",
                snapshot.id,
                event,
                e
            );
        }
    }

    /// Forces a firewall back to ACTIVE and re-pushes its snapshot.
    /// Used by every policy/rule fan-out path; touches nothing but the
    /// status field.
    fn refresh_firewall(&self, firewall_id: Uuid) {
        match self
            .store
            .set_firewall_status(firewall_id, FirewallStatus::Active)
        {
            Ok(fw) => self.push_firewall(fw.id, fw.config_handle_id, DispatchEvent::Updated),
            Err(e) => {
                tracing::warn!("fan-out skipped firewall {}: {}", firewall_id, e);
            }
        }
    }

    /// Re-dispatches every firewall currently using the policy. Called
    /// after any mutation that changes the policy's effective rule set.
    fn fan_out_policy(&self, policy_id: Uuid) -> Result<()> {
        let policy = self.store.get_firewall_policy(policy_id)?;
        tracing::debug!(
            "fanning out policy {} to {} firewall(s)",
            policy_id,
            policy.firewall_list.len()
        );
        for firewall_id in policy.firewall_list {
            self.refresh_firewall(firewall_id);
        }
        Ok(())
    }

    // --- Firewalls ---

    /// Persists a new firewall and pushes its first snapshot. The status
    /// is forced to ACTIVE immediately: pending-state gating on creation
    /// is disabled in this service.
    pub fn create_firewall(&self, spec: FirewallSpec) -> Result<Firewall> {
        let tenant_id = Self::require_tenant(spec.tenant_id)?;
        let fw = self.store.create_firewall(spec, tenant_id)?;
        let fw = self
            .store
            .set_firewall_status(fw.id, FirewallStatus::Active)?;
        tracing::info!("created firewall {} for tenant {}", fw.id, fw.tenant_id);
        self.push_firewall(fw.id, fw.config_handle_id, DispatchEvent::Created);
        Ok(fw)
    }

    pub fn update_firewall(&self, id: Uuid, patch: &FirewallPatch) -> Result<Firewall> {
        self.store.update_firewall(id, patch)?;
        let fw = self.store.set_firewall_status(id, FirewallStatus::Active)?;
        self.push_firewall(fw.id, fw.config_handle_id, DispatchEvent::Updated);
        Ok(fw)
    }

    /// Deletes a firewall: the row is held in PENDING_DELETE until the
    /// deletion dispatch has been issued, then removed. Row removal is
    /// not conditional on the dispatch outcome; the delete is final on
    /// the control-plane side (at-most-once delivery).
    pub fn delete_firewall(&self, id: Uuid) -> Result<()> {
        let fw = self
            .store
            .set_firewall_status(id, FirewallStatus::PendingDelete)?;
        match self.snapshots.build(id) {
            Ok(snapshot) => {
                self.route_snapshot(fw.config_handle_id, &snapshot, DispatchEvent::Deleted);
            }
            Err(e) => {
                tracing::warn!(
                    "deleting firewall {} without dispatch: snapshot build failed: {}",
                    id,
                    e
                );
            }
        }
        self.store.delete_firewall(id)?;
        tracing::info!("deleted firewall {}", id);
        Ok(())
    }

    pub fn get_firewall(&self, id: Uuid) -> Result<Firewall> {
        self.store.get_firewall(id)
    }

    pub fn list_firewalls(&self, filter: &FirewallFilter) -> Result<Vec<Firewall>> {
        self.store.list_firewalls(filter)
    }

    // --- Policies ---

    pub fn create_firewall_policy(&self, spec: PolicySpec) -> Result<FirewallPolicy> {
        let tenant_id = Self::require_tenant(spec.tenant_id)?;
        self.store.create_firewall_policy(spec, tenant_id)
    }

    /// Updates a policy and fans the change out to every firewall using
    /// it: exactly one Updated dispatch per referencing firewall.
    pub fn update_firewall_policy(&self, id: Uuid, patch: &PolicyPatch) -> Result<FirewallPolicy> {
        let policy = self.store.update_firewall_policy(id, patch)?;
        self.fan_out_policy(id)?;
        Ok(policy)
    }

    /// Refuses to delete a policy still referenced by firewalls; callers
    /// must detach them first.
    pub fn delete_firewall_policy(&self, id: Uuid) -> Result<()> {
        let policy = self.store.get_firewall_policy(id)?;
        if !policy.firewall_list.is_empty() {
            return Err(AppError::Validation(format!(
                "firewall_policy {} is in use by {} firewall(s)",
                id,
                policy.firewall_list.len()
            )));
        }
        self.store.delete_firewall_policy(id)
    }

    pub fn get_firewall_policy(&self, id: Uuid) -> Result<FirewallPolicy> {
        self.store.get_firewall_policy(id)
    }

    pub fn list_firewall_policies(&self, filter: &TenantFilter) -> Result<Vec<FirewallPolicy>> {
        self.store.list_firewall_policies(filter)
    }

    // --- Rules ---

    pub fn create_firewall_rule(&self, spec: RuleSpec) -> Result<FirewallRule> {
        let tenant_id = Self::require_tenant(spec.tenant_id)?;
        self.store.create_firewall_rule(spec, tenant_id)
    }

    pub fn update_firewall_rule(&self, id: Uuid, patch: &RulePatch) -> Result<FirewallRule> {
        let rule = self.store.update_firewall_rule(id, patch)?;
        if let Some(policy_id) = rule.firewall_policy_id {
            self.fan_out_policy(policy_id)?;
        }
        Ok(rule)
    }

    /// Removes a rule, then fans out to the owning policy's firewalls.
    /// The owning policy is resolved before the row disappears; the
    /// fan-out runs after, so backends see the post-removal rule set.
    pub fn delete_firewall_rule(&self, id: Uuid) -> Result<()> {
        let rule = self.store.get_firewall_rule(id)?;
        let policy_id = rule.firewall_policy_id;
        self.store.delete_firewall_rule(id)?;
        if let Some(policy_id) = policy_id {
            self.fan_out_policy(policy_id)?;
        }
        Ok(())
    }

    pub fn get_firewall_rule(&self, id: Uuid) -> Result<FirewallRule> {
        self.store.get_firewall_rule(id)
    }

    pub fn list_firewall_rules(&self, filter: &TenantFilter) -> Result<Vec<FirewallRule>> {
        self.store.list_firewall_rules(filter)
    }

    // --- Policy rule sequence ---

    /// Inserts a rule into a policy's evaluation sequence at the given
    /// position and fans out. The rule must not already belong to a
    /// policy; a `Before`/`After` anchor must be in the sequence.
    pub fn insert_rule(
        &self,
        policy_id: Uuid,
        rule_id: Uuid,
        position: RulePosition,
    ) -> Result<FirewallPolicy> {
        let policy = self.store.get_firewall_policy(policy_id)?;
        let rule = self.store.get_firewall_rule(rule_id)?;
        if let Some(owner) = rule.firewall_policy_id {
            return Err(AppError::Validation(format!(
                "firewall_rule {} already belongs to policy {}",
                rule_id, owner
            )));
        }

        let mut sequence = policy.firewall_rules;
        let index = match position {
            RulePosition::First => 0,
            RulePosition::Last => sequence.len(),
            RulePosition::Before(anchor) => Self::anchor_index(&sequence, anchor)?,
            RulePosition::After(anchor) => Self::anchor_index(&sequence, anchor)? + 1,
        };
        sequence.insert(index, rule_id);

        self.store.set_rule_policy(rule_id, Some(policy_id))?;
        let updated = self.store.set_policy_rules(policy_id, sequence)?;
        self.fan_out_policy(policy_id)?;
        Ok(updated)
    }

    fn anchor_index(sequence: &[Uuid], anchor: Uuid) -> Result<usize> {
        sequence
            .iter()
            .position(|id| *id == anchor)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "anchor rule {} is not in the policy's sequence",
                    anchor
                ))
            })
    }

    /// Removes a rule from a policy's sequence (the rule itself survives)
    /// and fans out.
    pub fn remove_rule(&self, policy_id: Uuid, rule_id: Uuid) -> Result<FirewallPolicy> {
        let policy = self.store.get_firewall_policy(policy_id)?;
        if !policy.firewall_rules.contains(&rule_id) {
            return Err(AppError::Validation(format!(
                "firewall_rule {} is not in policy {}",
                rule_id, policy_id
            )));
        }
        let sequence: Vec<Uuid> = policy
            .firewall_rules
            .into_iter()
            .filter(|id| *id != rule_id)
            .collect();

        self.store.set_rule_policy(rule_id, None)?;
        let updated = self.store.set_policy_rules(policy_id, sequence)?;
        self.fan_out_policy(policy_id)?;
        Ok(updated)
    }

    // --- Config handles ---

    pub fn create_config_handle(&self, spec: ConfigHandleSpec) -> Result<ConfigHandle> {
        let tenant_id = Self::require_tenant(spec.tenant_id)?;
        self.store.create_config_handle(spec, tenant_id)
    }

    pub fn update_config_handle(
        &self,
        id: Uuid,
        patch: &ConfigHandlePatch,
    ) -> Result<ConfigHandle> {
        self.store.update_config_handle(id, patch)
    }

    /// A handle still mapped to firewalls cannot be deleted; callers
    /// must clear the reference first.
    pub fn delete_config_handle(&self, id: Uuid) -> Result<()> {
        self.store.get_config_handle(id)?;
        let mapped = self.store.list_firewalls(&FirewallFilter {
            config_handle_id: Some(vec![id]),
            ..Default::default()
        })?;
        if !mapped.is_empty() {
            return Err(AppError::Validation(format!(
                "config_handle {} is mapped to {} firewall(s); unmap first",
                id,
                mapped.len()
            )));
        }
        self.store.delete_config_handle(id)
    }

    pub fn get_config_handle(&self, id: Uuid) -> Result<ConfigHandle> {
        self.store.get_config_handle(id)
    }

    pub fn list_config_handles(&self, filter: &TenantFilter) -> Result<Vec<ConfigHandle>> {
        self.store.list_config_handles(filter)
    }

    // --- Network functions ---

    pub fn create_network_function(&self, spec: NetworkFunctionSpec) -> Result<NetworkFunction> {
        let tenant_id = Self::require_tenant(spec.tenant_id)?;
        self.store.create_network_function(spec, tenant_id)
    }

    pub fn update_network_function(
        &self,
        id: Uuid,
        patch: &NetworkFunctionPatch,
    ) -> Result<NetworkFunction> {
        self.store.update_network_function(id, patch)
    }

    pub fn delete_network_function(&self, id: Uuid) -> Result<()> {
        self.store.delete_network_function(id)
    }

    pub fn get_network_function(&self, id: Uuid) -> Result<NetworkFunction> {
        self.store.get_network_function(id)
    }

    pub fn list_network_functions(&self, filter: &TenantFilter) -> Result<Vec<NetworkFunction>> {
        self.store.list_network_functions(filter)
    }

    // --- Bulk pull ---

    /// Pull-style reconciliation for an external consumer that polls
    /// instead of receiving fanout or notify messages: every firewall
    /// mapped to the handle, snapshotted, in one envelope.
    pub fn generate_config(&self, request: &ConfigRequest) -> Result<ConfigResponse> {
        let firewalls = self.store.list_firewalls(&FirewallFilter {
            config_handle_id: Some(vec![request.config_handle_id]),
            ..Default::default()
        })?;
        let mut response = Vec::with_capacity(firewalls.len());
        for fw in firewalls {
            response.push(self.snapshots.build(fw.id)?);
        }
        tracing::debug!(
            "generated config for handle {}: {} snapshot(s)",
            request.config_handle_id,
            response.len()
        );
        Ok(ConfigResponse {
            config_handle_id: request.config_handle_id,
            slug: request.slug.clone(),
            version: request.version.clone(),
            header: "data".to_string(),
            response,
        })
    }
}
