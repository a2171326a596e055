use fwctl::dispatch::{FanoutChannel, NotifyChannel};
use fwctl::orchestrator::FirewallOrchestrator;
use fwctl::store::MemoryStore;
use fwctl::types::{
    AppError, ConfigHandleSpec, ConfigRequest, FirewallSnapshot, FirewallSpec, FirewallStatus,
    NotifyRequest, PolicyPatch, PolicySpec, Result, RulePatch, RulePosition, RuleSpec,
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Captures every message the orchestrator pushes toward the backends.
#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Update(FirewallSnapshot),
    Delete(FirewallSnapshot),
    Notify(Uuid),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Sent>>,
}

impl Recorder {
    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl FanoutChannel for Recorder {
    fn update(&self, snapshot: &FirewallSnapshot) -> Result<()> {
        self.events.lock().unwrap().push(Sent::Update(snapshot.clone()));
        Ok(())
    }
    fn delete(&self, snapshot: &FirewallSnapshot) -> Result<()> {
        self.events.lock().unwrap().push(Sent::Delete(snapshot.clone()));
        Ok(())
    }
}

impl NotifyChannel for Recorder {
    fn notify(&self, config_handle_id: Uuid, _slug: &str, _payload: &NotifyRequest) -> Result<()> {
        self.events.lock().unwrap().push(Sent::Notify(config_handle_id));
        Ok(())
    }
}

/// A channel that always fails, for the best-effort delivery tests.
struct DeadChannel;

impl FanoutChannel for DeadChannel {
    fn update(&self, _snapshot: &FirewallSnapshot) -> Result<()> {
        Err(AppError::BackendDispatch("agent transport down".to_string()))
    }
    fn delete(&self, _snapshot: &FirewallSnapshot) -> Result<()> {
        Err(AppError::BackendDispatch("agent transport down".to_string()))
    }
}

impl NotifyChannel for DeadChannel {
    fn notify(&self, _id: Uuid, _slug: &str, _payload: &NotifyRequest) -> Result<()> {
        Err(AppError::BackendDispatch("consumer unreachable".to_string()))
    }
}

struct Harness {
    orch: FirewallOrchestrator,
    recorder: Arc<Recorder>,
    tenant: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(Recorder::default());
    Harness {
        orch: FirewallOrchestrator::new(store, recorder.clone(), recorder.clone()),
        recorder,
        tenant: Uuid::new_v4(),
    }
}

impl Harness {
    fn policy(&self, name: &str) -> Uuid {
        self.orch
            .create_firewall_policy(PolicySpec {
                tenant_id: Some(self.tenant),
                name: name.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn rule(&self, name: &str) -> Uuid {
        self.orch
            .create_firewall_rule(RuleSpec {
                tenant_id: Some(self.tenant),
                name: name.to_string(),
                action: "allow".to_string(),
                enabled: true,
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn firewall(&self, name: &str, policy: Option<Uuid>, handle: Option<Uuid>) -> Uuid {
        self.orch
            .create_firewall(FirewallSpec {
                tenant_id: Some(self.tenant),
                name: name.to_string(),
                admin_state_up: true,
                firewall_policy_id: policy,
                config_handle_id: handle,
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn handle(&self, mode: &str) -> Uuid {
        self.orch
            .create_config_handle(ConfigHandleSpec {
                tenant_id: Some(self.tenant),
                name: format!("handle-{}", mode),
                config_mode: mode.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }
}

fn rule_ids(snapshot: &FirewallSnapshot) -> Vec<Uuid> {
    snapshot.firewall_rule_list.iter().map(|r| r.id).collect()
}

#[test]
fn policy_update_dispatches_once_per_referencing_firewall() {
    let h = harness();
    let policy = h.policy("p");
    let r1 = h.rule("r1");
    let r2 = h.rule("r2");
    h.orch.insert_rule(policy, r1, RulePosition::Last).unwrap();
    h.orch.insert_rule(policy, r2, RulePosition::Last).unwrap();
    let f1 = h.firewall("f1", Some(policy), None);
    let f2 = h.firewall("f2", Some(policy), None);
    h.recorder.take();

    h.orch
        .update_firewall_policy(
            policy,
            &PolicyPatch {
                description: Some("tightened".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let events = h.recorder.take();
    assert_eq!(events.len(), 2);
    let mut seen: Vec<Uuid> = Vec::new();
    for event in events {
        match event {
            Sent::Update(snapshot) => {
                assert_eq!(rule_ids(&snapshot), vec![r1, r2]);
                seen.push(snapshot.id);
            }
            other => panic!("expected fanout update, got {:?}", other),
        }
    }
    seen.sort();
    let mut expected = vec![f1, f2];
    expected.sort();
    assert_eq!(seen, expected);
}

#[test]
fn insert_rule_after_anchor_updates_order_and_fans_out() {
    // Policy P1 has [R1, R2]; F1 and F2 use it; no config handle.
    // InsertRule(P1, R3, after=R1) must yield [R1, R3, R2] and exactly
    // two fanout updates carrying that order.
    let h = harness();
    let policy = h.policy("p1");
    let r1 = h.rule("r1");
    let r2 = h.rule("r2");
    let r3 = h.rule("r3");
    h.orch.insert_rule(policy, r1, RulePosition::Last).unwrap();
    h.orch.insert_rule(policy, r2, RulePosition::Last).unwrap();
    h.firewall("f1", Some(policy), None);
    h.firewall("f2", Some(policy), None);
    h.recorder.take();

    let updated = h
        .orch
        .insert_rule(policy, r3, RulePosition::After(r1))
        .unwrap();
    assert_eq!(updated.firewall_rules, vec![r1, r3, r2]);

    let events = h.recorder.take();
    assert_eq!(events.len(), 2);
    for event in &events {
        match event {
            Sent::Update(snapshot) => assert_eq!(rule_ids(snapshot), vec![r1, r3, r2]),
            other => panic!("expected fanout update, got {:?}", other),
        }
    }
}

#[test]
fn insert_then_remove_restores_sequence() {
    let h = harness();
    let policy = h.policy("p");
    let r1 = h.rule("r1");
    let r2 = h.rule("r2");
    h.orch.insert_rule(policy, r1, RulePosition::Last).unwrap();
    h.orch.insert_rule(policy, r2, RulePosition::Last).unwrap();
    let before = h.orch.get_firewall_policy(policy).unwrap().firewall_rules;

    let extra = h.rule("extra");
    for position in [
        RulePosition::First,
        RulePosition::Last,
        RulePosition::Before(r2),
        RulePosition::After(r1),
    ] {
        h.orch.insert_rule(policy, extra, position).unwrap();
        h.orch.remove_rule(policy, extra).unwrap();
        assert_eq!(
            h.orch.get_firewall_policy(policy).unwrap().firewall_rules,
            before,
            "sequence not restored after {:?}",
            position
        );
    }
}

#[test]
fn deleted_rule_never_appears_in_later_snapshots() {
    let h = harness();
    let policy = h.policy("p");
    let r1 = h.rule("r1");
    let r2 = h.rule("r2");
    h.orch.insert_rule(policy, r1, RulePosition::Last).unwrap();
    h.orch.insert_rule(policy, r2, RulePosition::Last).unwrap();
    h.firewall("f1", Some(policy), None);
    h.recorder.take();

    h.orch.delete_firewall_rule(r1).unwrap();

    // The fan-out triggered by the deletion already sees the shrunken
    // rule set.
    let events = h.recorder.take();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Sent::Update(snapshot) => assert_eq!(rule_ids(snapshot), vec![r2]),
        other => panic!("expected fanout update, got {:?}", other),
    }
    assert!(matches!(
        h.orch.get_firewall_rule(r1),
        Err(AppError::NotFound { .. })
    ));
}

#[test]
fn rule_update_fans_out_to_owning_policy() {
    let h = harness();
    let policy = h.policy("p");
    let rule = h.rule("r");
    h.orch.insert_rule(policy, rule, RulePosition::Last).unwrap();
    h.firewall("f1", Some(policy), None);
    h.recorder.take();

    h.orch
        .update_firewall_rule(
            rule,
            &RulePatch {
                action: Some("deny".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let events = h.recorder.take();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Sent::Update(snapshot) => {
            assert_eq!(snapshot.firewall_rule_list[0].action, "deny");
        }
        other => panic!("expected fanout update, got {:?}", other),
    }
}

#[test]
fn rule_update_without_policy_dispatches_nothing() {
    let h = harness();
    let rule = h.rule("orphan");
    h.recorder.take();
    h.orch
        .update_firewall_rule(
            rule,
            &RulePatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(h.recorder.take().is_empty());
}

#[test]
fn firewall_delete_dispatches_exactly_once_before_row_removal() {
    let h = harness();
    let policy = h.policy("p");
    let rule = h.rule("r");
    h.orch.insert_rule(policy, rule, RulePosition::Last).unwrap();
    let fw = h.firewall("f", Some(policy), None);
    h.recorder.take();

    h.orch.delete_firewall(fw).unwrap();

    let events = h.recorder.take();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Sent::Delete(snapshot) => {
            assert_eq!(snapshot.id, fw);
            // The final snapshot carries the rules as they existed before
            // removal, and the row was held in PENDING_DELETE for it.
            assert_eq!(rule_ids(snapshot), vec![rule]);
            assert_eq!(snapshot.status, FirewallStatus::PendingDelete);
        }
        other => panic!("expected fanout delete, got {:?}", other),
    }
    assert!(matches!(
        h.orch.get_firewall(fw),
        Err(AppError::NotFound { .. })
    ));
}

#[test]
fn nfv_update_routes_to_fanout_delete_then_notify() {
    let h = harness();
    let handle = h.handle("NFV");
    let fw = h.firewall("f", None, Some(handle));
    h.recorder.take();

    h.orch
        .update_firewall(fw, &Default::default())
        .unwrap();

    let events = h.recorder.take();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Sent::Delete(s) if s.id == fw));
    assert_eq!(events[1], Sent::Notify(handle));
}

#[test]
fn nfv_firewall_delete_is_notify_only() {
    let h = harness();
    let handle = h.handle("NFV");
    let fw = h.firewall("f", None, Some(handle));
    h.recorder.take();

    h.orch.delete_firewall(fw).unwrap();
    assert_eq!(h.recorder.take(), vec![Sent::Notify(handle)]);
}

#[test]
fn ofc_mode_dispatches_nothing() {
    let h = harness();
    let handle = h.handle("OFC");
    let fw = h.firewall("f", None, Some(handle));
    h.recorder.take();

    h.orch.update_firewall(fw, &Default::default()).unwrap();
    h.orch.delete_firewall(fw).unwrap();
    assert!(h.recorder.take().is_empty());
}

#[test]
fn dispatch_failure_is_not_surfaced_to_callers() {
    let store = Arc::new(MemoryStore::new());
    let orch = FirewallOrchestrator::new(store, Arc::new(DeadChannel), Arc::new(DeadChannel));
    let fw = orch
        .create_firewall(FirewallSpec {
            tenant_id: Some(Uuid::new_v4()),
            name: "f".to_string(),
            ..Default::default()
        })
        .unwrap();
    orch.update_firewall(fw.id, &Default::default()).unwrap();
    orch.delete_firewall(fw.id).unwrap();
}

#[test]
fn generate_config_returns_all_mapped_firewalls() {
    let h = harness();
    let handle = h.handle("NN");
    let f1 = h.firewall("f1", None, Some(handle));
    let f2 = h.firewall("f2", None, Some(handle));
    h.firewall("unrelated", None, None);

    let response = h
        .orch
        .generate_config(&ConfigRequest {
            config_handle_id: handle,
            slug: "firewall".to_string(),
            version: "0.0".to_string(),
        })
        .unwrap();

    assert_eq!(response.config_handle_id, handle);
    assert_eq!(response.slug, "firewall");
    assert_eq!(response.version, "0.0");
    assert_eq!(response.header, "data");
    let mut ids: Vec<Uuid> = response.response.iter().map(|s| s.id).collect();
    ids.sort();
    let mut expected = vec![f1, f2];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn generate_config_envelope_field_names_are_stable() {
    let h = harness();
    let handle = h.handle("NN");
    h.firewall("f1", None, Some(handle));

    let response = h
        .orch
        .generate_config(&ConfigRequest {
            config_handle_id: handle,
            slug: "firewall".to_string(),
            version: "0.0".to_string(),
        })
        .unwrap();

    let json = serde_json::to_value(&response).unwrap();
    for key in ["config_handle_id", "slug", "version", "header", "response"] {
        assert!(json.get(key).is_some(), "missing envelope field '{}'", key);
    }
    assert_eq!(json["header"], "data");
}
