use crate::store::EntityStore;
use crate::types::{FirewallSnapshot, Result};
use std::sync::Arc;
use uuid::Uuid;

/// Assembles the denormalized "firewall with rules" view dispatched to
/// enforcement backends. Read-only; never caches across calls.
pub struct SnapshotBuilder {
    store: Arc<dyn EntityStore>,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        SnapshotBuilder { store }
    }

    /// Builds the snapshot for one firewall. The rule list follows the
    /// policy's rule-id sequence exactly; a firewall without a policy
    /// yields an empty list. A missing firewall or a dangling rule id in
    /// the policy sequence is a `NotFound` error.
    pub fn build(&self, firewall_id: Uuid) -> Result<FirewallSnapshot> {
        let firewall = self.store.get_firewall(firewall_id)?;

        let firewall_rule_list = match firewall.firewall_policy_id {
            Some(policy_id) => {
                let policy = self.store.get_firewall_policy(policy_id)?;
                policy
                    .firewall_rules
                    .iter()
                    .map(|rule_id| self.store.get_firewall_rule(*rule_id))
                    .collect::<Result<Vec<_>>>()?
            }
            None => Vec::new(),
        };

        Ok(FirewallSnapshot {
            id: firewall.id,
            tenant_id: firewall.tenant_id,
            name: firewall.name,
            admin_state_up: firewall.admin_state_up,
            firewall_policy_id: firewall.firewall_policy_id,
            config_handle_id: firewall.config_handle_id,
            status: firewall.status,
            firewall_rule_list,
        })
    }
}
