use crate::types::{
    AppError, ConfigHandle, ConfigHandlePatch, ConfigHandleSpec, Firewall, FirewallPatch,
    FirewallPolicy, FirewallRule, FirewallSpec, FirewallStatus, NetworkFunction,
    NetworkFunctionPatch, NetworkFunctionSpec, PolicyPatch, PolicySpec, Result, RulePatch,
    RuleSpec,
};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Equality filters for list operations: values within a field are OR'd,
/// fields are AND'd together. `None` leaves the field unconstrained.
#[derive(Debug, Clone, Default)]
pub struct FirewallFilter {
    pub tenant_id: Option<Vec<Uuid>>,
    pub firewall_policy_id: Option<Vec<Uuid>>,
    pub config_handle_id: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct TenantFilter {
    pub tenant_id: Option<Vec<Uuid>>,
}

/// Durable storage contract for the orchestrator. Each operation is
/// individually atomic; there are no cross-operation transactions.
pub trait EntityStore: Send + Sync {
    fn create_firewall(&self, spec: FirewallSpec, tenant_id: Uuid) -> Result<Firewall>;
    fn get_firewall(&self, id: Uuid) -> Result<Firewall>;
    fn list_firewalls(&self, filter: &FirewallFilter) -> Result<Vec<Firewall>>;
    fn update_firewall(&self, id: Uuid, patch: &FirewallPatch) -> Result<Firewall>;
    fn set_firewall_status(&self, id: Uuid, status: FirewallStatus) -> Result<Firewall>;
    fn delete_firewall(&self, id: Uuid) -> Result<()>;

    fn create_firewall_policy(&self, spec: PolicySpec, tenant_id: Uuid) -> Result<FirewallPolicy>;
    fn get_firewall_policy(&self, id: Uuid) -> Result<FirewallPolicy>;
    fn list_firewall_policies(&self, filter: &TenantFilter) -> Result<Vec<FirewallPolicy>>;
    fn update_firewall_policy(&self, id: Uuid, patch: &PolicyPatch) -> Result<FirewallPolicy>;
    fn set_policy_rules(&self, id: Uuid, rules: Vec<Uuid>) -> Result<FirewallPolicy>;
    fn delete_firewall_policy(&self, id: Uuid) -> Result<()>;

    fn create_firewall_rule(&self, spec: RuleSpec, tenant_id: Uuid) -> Result<FirewallRule>;
    fn get_firewall_rule(&self, id: Uuid) -> Result<FirewallRule>;
    fn list_firewall_rules(&self, filter: &TenantFilter) -> Result<Vec<FirewallRule>>;
    fn update_firewall_rule(&self, id: Uuid, patch: &RulePatch) -> Result<FirewallRule>;
    fn set_rule_policy(&self, id: Uuid, policy_id: Option<Uuid>) -> Result<FirewallRule>;
    fn delete_firewall_rule(&self, id: Uuid) -> Result<()>;

    fn create_network_function(
        &self,
        spec: NetworkFunctionSpec,
        tenant_id: Uuid,
    ) -> Result<NetworkFunction>;
    fn get_network_function(&self, id: Uuid) -> Result<NetworkFunction>;
    fn list_network_functions(&self, filter: &TenantFilter) -> Result<Vec<NetworkFunction>>;
    fn update_network_function(
        &self,
        id: Uuid,
        patch: &NetworkFunctionPatch,
    ) -> Result<NetworkFunction>;
    fn delete_network_function(&self, id: Uuid) -> Result<()>;

    fn create_config_handle(&self, spec: ConfigHandleSpec, tenant_id: Uuid) -> Result<ConfigHandle>;
    fn get_config_handle(&self, id: Uuid) -> Result<ConfigHandle>;
    fn list_config_handles(&self, filter: &TenantFilter) -> Result<Vec<ConfigHandle>>;
    fn update_config_handle(&self, id: Uuid, patch: &ConfigHandlePatch) -> Result<ConfigHandle>;
    fn delete_config_handle(&self, id: Uuid) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    firewalls: HashMap<Uuid, Firewall>,
    policies: HashMap<Uuid, FirewallPolicy>,
    rules: HashMap<Uuid, FirewallRule>,
    network_functions: HashMap<Uuid, NetworkFunction>,
    config_handles: HashMap<Uuid, ConfigHandle>,
}

impl Tables {
    /// `firewall_list` is not stored; recompute it from the firewalls
    /// currently pointing at the policy.
    fn with_firewall_list(&self, mut policy: FirewallPolicy) -> FirewallPolicy {
        let mut ids: Vec<Uuid> = self
            .firewalls
            .values()
            .filter(|fw| fw.firewall_policy_id == Some(policy.id))
            .map(|fw| fw.id)
            .collect();
        ids.sort();
        policy.firewall_list = ids;
        policy
    }
}

/// In-memory [`EntityStore`]. Backs the daemon and the test suites; a
/// deployment with durable storage would supply its own implementation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches<T: PartialEq>(filter: &Option<Vec<T>>, value: &T) -> bool {
    match filter {
        Some(accepted) => accepted.contains(value),
        None => true,
    }
}

fn matches_opt<T: PartialEq>(filter: &Option<Vec<T>>, value: &Option<T>) -> bool {
    match (filter, value) {
        (Some(accepted), Some(v)) => accepted.contains(v),
        (Some(_), None) => false,
        (None, _) => true,
    }
}

impl EntityStore for MemoryStore {
    fn create_firewall(&self, spec: FirewallSpec, tenant_id: Uuid) -> Result<Firewall> {
        let mut t = self.tables.write().expect("store lock poisoned");
        if let Some(policy_id) = spec.firewall_policy_id {
            if !t.policies.contains_key(&policy_id) {
                return Err(AppError::not_found("firewall_policy", policy_id));
            }
        }
        if let Some(handle_id) = spec.config_handle_id {
            if !t.config_handles.contains_key(&handle_id) {
                return Err(AppError::not_found("config_handle", handle_id));
            }
        }
        let fw = Firewall {
            id: Uuid::new_v4(),
            tenant_id,
            name: spec.name,
            description: spec.description,
            admin_state_up: spec.admin_state_up,
            firewall_policy_id: spec.firewall_policy_id,
            config_handle_id: spec.config_handle_id,
            status: FirewallStatus::PendingCreate,
        };
        t.firewalls.insert(fw.id, fw.clone());
        Ok(fw)
    }

    fn get_firewall(&self, id: Uuid) -> Result<Firewall> {
        let t = self.tables.read().expect("store lock poisoned");
        t.firewalls
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("firewall", id))
    }

    fn list_firewalls(&self, filter: &FirewallFilter) -> Result<Vec<Firewall>> {
        let t = self.tables.read().expect("store lock poisoned");
        let mut out: Vec<Firewall> = t
            .firewalls
            .values()
            .filter(|fw| {
                matches(&filter.tenant_id, &fw.tenant_id)
                    && matches_opt(&filter.firewall_policy_id, &fw.firewall_policy_id)
                    && matches_opt(&filter.config_handle_id, &fw.config_handle_id)
            })
            .cloned()
            .collect();
        out.sort_by_key(|fw| fw.id);
        Ok(out)
    }

    fn update_firewall(&self, id: Uuid, patch: &FirewallPatch) -> Result<Firewall> {
        let mut t = self.tables.write().expect("store lock poisoned");
        if let Some(Some(policy_id)) = patch.firewall_policy_id {
            if !t.policies.contains_key(&policy_id) {
                return Err(AppError::not_found("firewall_policy", policy_id));
            }
        }
        if let Some(Some(handle_id)) = patch.config_handle_id {
            if !t.config_handles.contains_key(&handle_id) {
                return Err(AppError::not_found("config_handle", handle_id));
            }
        }
        let fw = t
            .firewalls
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("firewall", id))?;
        if let Some(name) = &patch.name {
            fw.name = name.clone();
        }
        if let Some(description) = &patch.description {
            fw.description = description.clone();
        }
        if let Some(admin_state_up) = patch.admin_state_up {
            fw.admin_state_up = admin_state_up;
        }
        if let Some(policy_id) = patch.firewall_policy_id {
            fw.firewall_policy_id = policy_id;
        }
        if let Some(handle_id) = patch.config_handle_id {
            fw.config_handle_id = handle_id;
        }
        Ok(fw.clone())
    }

    fn set_firewall_status(&self, id: Uuid, status: FirewallStatus) -> Result<Firewall> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let fw = t
            .firewalls
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("firewall", id))?;
        fw.status = status;
        Ok(fw.clone())
    }

    fn delete_firewall(&self, id: Uuid) -> Result<()> {
        let mut t = self.tables.write().expect("store lock poisoned");
        t.firewalls
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("firewall", id))
    }

    fn create_firewall_policy(&self, spec: PolicySpec, tenant_id: Uuid) -> Result<FirewallPolicy> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let policy = FirewallPolicy {
            id: Uuid::new_v4(),
            tenant_id,
            name: spec.name,
            description: spec.description,
            shared: spec.shared,
            audited: spec.audited,
            firewall_rules: Vec::new(),
            firewall_list: Vec::new(),
        };
        t.policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    fn get_firewall_policy(&self, id: Uuid) -> Result<FirewallPolicy> {
        let t = self.tables.read().expect("store lock poisoned");
        let policy = t
            .policies
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("firewall_policy", id))?;
        Ok(t.with_firewall_list(policy))
    }

    fn list_firewall_policies(&self, filter: &TenantFilter) -> Result<Vec<FirewallPolicy>> {
        let t = self.tables.read().expect("store lock poisoned");
        let mut out: Vec<FirewallPolicy> = t
            .policies
            .values()
            .filter(|p| matches(&filter.tenant_id, &p.tenant_id))
            .map(|p| t.with_firewall_list(p.clone()))
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    fn update_firewall_policy(&self, id: Uuid, patch: &PolicyPatch) -> Result<FirewallPolicy> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let policy = t
            .policies
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("firewall_policy", id))?;
        if let Some(name) = &patch.name {
            policy.name = name.clone();
        }
        if let Some(description) = &patch.description {
            policy.description = description.clone();
        }
        if let Some(shared) = patch.shared {
            policy.shared = shared;
        }
        if let Some(audited) = patch.audited {
            policy.audited = audited;
        }
        let updated = policy.clone();
        Ok(t.with_firewall_list(updated))
    }

    fn set_policy_rules(&self, id: Uuid, rules: Vec<Uuid>) -> Result<FirewallPolicy> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let policy = t
            .policies
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("firewall_policy", id))?;
        policy.firewall_rules = rules;
        let updated = policy.clone();
        Ok(t.with_firewall_list(updated))
    }

    fn delete_firewall_policy(&self, id: Uuid) -> Result<()> {
        let mut t = self.tables.write().expect("store lock poisoned");
        if !t.policies.contains_key(&id) {
            return Err(AppError::not_found("firewall_policy", id));
        }
        t.policies.remove(&id);
        // Detach any rules that still point at the removed policy.
        for rule in t.rules.values_mut() {
            if rule.firewall_policy_id == Some(id) {
                rule.firewall_policy_id = None;
            }
        }
        Ok(())
    }

    fn create_firewall_rule(&self, spec: RuleSpec, tenant_id: Uuid) -> Result<FirewallRule> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let rule = FirewallRule {
            id: Uuid::new_v4(),
            tenant_id,
            name: spec.name,
            description: spec.description,
            shared: spec.shared,
            protocol: spec.protocol,
            source_ip_address: spec.source_ip_address,
            destination_ip_address: spec.destination_ip_address,
            source_port: spec.source_port,
            destination_port: spec.destination_port,
            action: spec.action,
            enabled: spec.enabled,
            firewall_policy_id: None,
        };
        t.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    fn get_firewall_rule(&self, id: Uuid) -> Result<FirewallRule> {
        let t = self.tables.read().expect("store lock poisoned");
        t.rules
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("firewall_rule", id))
    }

    fn list_firewall_rules(&self, filter: &TenantFilter) -> Result<Vec<FirewallRule>> {
        let t = self.tables.read().expect("store lock poisoned");
        let mut out: Vec<FirewallRule> = t
            .rules
            .values()
            .filter(|r| matches(&filter.tenant_id, &r.tenant_id))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    fn update_firewall_rule(&self, id: Uuid, patch: &RulePatch) -> Result<FirewallRule> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let rule = t
            .rules
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("firewall_rule", id))?;
        if let Some(name) = &patch.name {
            rule.name = name.clone();
        }
        if let Some(description) = &patch.description {
            rule.description = description.clone();
        }
        if let Some(shared) = patch.shared {
            rule.shared = shared;
        }
        if let Some(protocol) = &patch.protocol {
            rule.protocol = protocol.clone();
        }
        if let Some(source_ip) = &patch.source_ip_address {
            rule.source_ip_address = source_ip.clone();
        }
        if let Some(dest_ip) = &patch.destination_ip_address {
            rule.destination_ip_address = dest_ip.clone();
        }
        if let Some(source_port) = &patch.source_port {
            rule.source_port = source_port.clone();
        }
        if let Some(dest_port) = &patch.destination_port {
            rule.destination_port = dest_port.clone();
        }
        if let Some(action) = &patch.action {
            rule.action = action.clone();
        }
        if let Some(enabled) = patch.enabled {
            rule.enabled = enabled;
        }
        Ok(rule.clone())
    }

    fn set_rule_policy(&self, id: Uuid, policy_id: Option<Uuid>) -> Result<FirewallRule> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let rule = t
            .rules
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("firewall_rule", id))?;
        rule.firewall_policy_id = policy_id;
        Ok(rule.clone())
    }

    fn delete_firewall_rule(&self, id: Uuid) -> Result<()> {
        let mut t = self.tables.write().expect("store lock poisoned");
        if t.rules.remove(&id).is_none() {
            return Err(AppError::not_found("firewall_rule", id));
        }
        // Drop the rule from any policy sequence still holding it.
        for policy in t.policies.values_mut() {
            policy.firewall_rules.retain(|rid| *rid != id);
        }
        Ok(())
    }

    fn create_network_function(
        &self,
        spec: NetworkFunctionSpec,
        tenant_id: Uuid,
    ) -> Result<NetworkFunction> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let nf = NetworkFunction {
            id: Uuid::new_v4(),
            tenant_id,
            name: spec.name,
            description: spec.description,
            shared: spec.shared,
        };
        t.network_functions.insert(nf.id, nf.clone());
        Ok(nf)
    }

    fn get_network_function(&self, id: Uuid) -> Result<NetworkFunction> {
        let t = self.tables.read().expect("store lock poisoned");
        t.network_functions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("networkfunction", id))
    }

    fn list_network_functions(&self, filter: &TenantFilter) -> Result<Vec<NetworkFunction>> {
        let t = self.tables.read().expect("store lock poisoned");
        let mut out: Vec<NetworkFunction> = t
            .network_functions
            .values()
            .filter(|nf| matches(&filter.tenant_id, &nf.tenant_id))
            .cloned()
            .collect();
        out.sort_by_key(|nf| nf.id);
        Ok(out)
    }

    fn update_network_function(
        &self,
        id: Uuid,
        patch: &NetworkFunctionPatch,
    ) -> Result<NetworkFunction> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let nf = t
            .network_functions
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("networkfunction", id))?;
        if let Some(name) = &patch.name {
            nf.name = name.clone();
        }
        if let Some(description) = &patch.description {
            nf.description = description.clone();
        }
        if let Some(shared) = patch.shared {
            nf.shared = shared;
        }
        Ok(nf.clone())
    }

    fn delete_network_function(&self, id: Uuid) -> Result<()> {
        let mut t = self.tables.write().expect("store lock poisoned");
        t.network_functions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("networkfunction", id))
    }

    fn create_config_handle(
        &self,
        spec: ConfigHandleSpec,
        tenant_id: Uuid,
    ) -> Result<ConfigHandle> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let handle = ConfigHandle {
            id: Uuid::new_v4(),
            tenant_id,
            name: spec.name,
            shared: spec.shared,
            config_mode: spec.config_mode,
        };
        t.config_handles.insert(handle.id, handle.clone());
        Ok(handle)
    }

    fn get_config_handle(&self, id: Uuid) -> Result<ConfigHandle> {
        let t = self.tables.read().expect("store lock poisoned");
        t.config_handles
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("config_handle", id))
    }

    fn list_config_handles(&self, filter: &TenantFilter) -> Result<Vec<ConfigHandle>> {
        let t = self.tables.read().expect("store lock poisoned");
        let mut out: Vec<ConfigHandle> = t
            .config_handles
            .values()
            .filter(|h| matches(&filter.tenant_id, &h.tenant_id))
            .cloned()
            .collect();
        out.sort_by_key(|h| h.id);
        Ok(out)
    }

    fn update_config_handle(&self, id: Uuid, patch: &ConfigHandlePatch) -> Result<ConfigHandle> {
        let mut t = self.tables.write().expect("store lock poisoned");
        let handle = t
            .config_handles
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("config_handle", id))?;
        if let Some(name) = &patch.name {
            handle.name = name.clone();
        }
        if let Some(shared) = patch.shared {
            handle.shared = shared;
        }
        if let Some(mode) = &patch.config_mode {
            handle.config_mode = mode.clone();
        }
        Ok(handle.clone())
    }

    fn delete_config_handle(&self, id: Uuid) -> Result<()> {
        let mut t = self.tables.write().expect("store lock poisoned");
        t.config_handles
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found("config_handle", id))
    }
}
