#[path = "../common/mod.rs"]
mod common;

use common::*;
use fleetgate::core::db;
use fleetgate::core::notify::JsonlNotifier;
use fleetgate::plugins::audit::{self, AuditFilter};
use fleetgate::plugins::fleet::{self, FleetKind, FleetStatus};
use fleetgate::plugins::quarantine::{self, PauseOutcome, ResumeOutcome};
use fleetgate::plugins::rbac::Role;

#[test]
fn pause_all_flips_only_records_not_at_target() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    for (i, status) in [
        FleetStatus::Online,
        FleetStatus::Online,
        FleetStatus::Online,
        FleetStatus::Offline,
    ]
    .into_iter()
    .enumerate()
    {
        let r = resource(&fx.store, &owner, &acme.id, FleetKind::Instance, &format!("i{}", i), None);
        force_status(&fx.store, &r, status);
    }

    let outcome = quarantine::pause_all(&fx.store, &creds, FleetKind::Instance, None).unwrap();
    assert_eq!(outcome, PauseOutcome { paused: 3 });
    assert_eq!(serde_json::to_value(outcome).unwrap(), serde_json::json!({ "paused": 3 }));

    let all = fleet::list(&fx.store, &creds, FleetKind::Instance, None).unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.iter().all(|r| r.status == FleetStatus::Offline));

    let page = audit::list(
        &fx.store,
        &creds,
        &AuditFilter {
            action: Some("pause_all_instances".to_string()),
            ..Default::default()
        },
        None,
        None,
    )
    .unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].details.as_deref(), Some("Paused 3 instances"));

    // Second call changes nothing but is still recorded once.
    let again = quarantine::pause_all(&fx.store, &creds, FleetKind::Instance, None).unwrap();
    assert_eq!(again.paused, 0);
    assert_eq!(audit_count(&fx.store, &acme.id, "pause_all_instances"), 2);
}

#[test]
fn resume_all_restores_paused_agents_and_skips_quarantined() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    let a = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);
    let b = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "b", None);
    let q = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "q", None);
    force_status(&fx.store, &a, FleetStatus::Active);
    force_status(&fx.store, &b, FleetStatus::Error);
    quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &q.id, "exfiltration attempt").unwrap();

    let paused = quarantine::pause_all(&fx.store, &creds, FleetKind::Agent, None).unwrap();
    assert_eq!(paused.paused, 2);
    let resumed = quarantine::resume_all(&fx.store, &creds, FleetKind::Agent, None).unwrap();
    assert_eq!(resumed, ResumeOutcome { resumed: 2 });

    let get = |id: &str| fleet::get(&fx.store, &creds, FleetKind::Agent, id).unwrap().unwrap();
    assert_eq!(get(&a.id).status, FleetStatus::Active);
    assert_eq!(get(&b.id).status, FleetStatus::Active);
    assert_eq!(get(&q.id).status, FleetStatus::Quarantined);
}

#[test]
fn quarantine_round_trip_never_restores_previous_status() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);

    let agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);
    force_status(&fx.store, &agent, FleetStatus::Active);
    let q = quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "prompt injection").unwrap();
    assert_eq!(q.status, FleetStatus::Quarantined);
    assert_eq!(audit_count(&fx.store, &acme.id, "quarantine_agent"), 1);

    let entry = &audit::list(&fx.store, &creds, &AuditFilter::default(), None, Some(1))
        .unwrap()
        .entries[0];
    assert_eq!(entry.action, "quarantine_agent");
    assert_eq!(entry.resource_type, "agent");
    assert_eq!(entry.resource_id.as_deref(), Some(agent.id.as_str()));
    assert_eq!(entry.details.as_deref(), Some("prompt injection"));

    let released = quarantine::unquarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "patched").unwrap();
    assert_eq!(released.status, FleetStatus::Paused);
    assert_eq!(audit_count(&fx.store, &acme.id, "unquarantine_agent"), 1);

    let instance = resource(&fx.store, &owner, &acme.id, FleetKind::Instance, "i", None);
    force_status(&fx.store, &instance, FleetStatus::Online);
    quarantine::quarantine(&fx.store, &creds, FleetKind::Instance, &instance.id, "crypto miner").unwrap();
    let released = quarantine::unquarantine(&fx.store, &creds, FleetKind::Instance, &instance.id, "reimaged").unwrap();
    assert_eq!(released.status, FleetStatus::Offline);
}

#[test]
fn invalid_transitions_conflict() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    let agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);

    let err = quarantine::unquarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "x").unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "x").unwrap();
    let err = quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "x").unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(audit_count(&fx.store, &acme.id, "quarantine_agent"), 1);

    let err = quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, "missing", "x").unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn team_tagged_resources_need_team_membership_below_admin() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (op, _) = member(&fx.store, &owner, &acme.id, "op@example.com", Role::Operator);
    let (viewer, _) = member(&fx.store, &owner, &acme.id, "v@example.com", Role::Viewer);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[&op]);
    let blue = team_with(&fx.store, &owner, &acme.id, "blue", &[]);
    let red_agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "r", Some(&red.id));
    let blue_agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "b", Some(&blue.id));

    let err = quarantine::quarantine(&fx.store, &viewer.in_org(&acme.id), FleetKind::Agent, &red_agent.id, "x").unwrap_err();
    assert_eq!(err.to_string(), "requires operator access");

    let err = quarantine::quarantine(&fx.store, &op.in_org(&acme.id), FleetKind::Agent, &blue_agent.id, "x").unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    quarantine::quarantine(&fx.store, &op.in_org(&acme.id), FleetKind::Agent, &red_agent.id, "x").unwrap();

    // Bulk calls are narrowed to what the caller can see.
    force_status(&fx.store, &red_agent, FleetStatus::Active);
    force_status(&fx.store, &blue_agent, FleetStatus::Active);
    let outcome = quarantine::pause_all(&fx.store, &op.in_org(&acme.id), FleetKind::Agent, None).unwrap();
    assert_eq!(outcome.paused, 1);
    let blue_now = fleet::get(&fx.store, &owner.in_org(&acme.id), FleetKind::Agent, &blue_agent.id).unwrap().unwrap();
    assert_eq!(blue_now.status, FleetStatus::Active);

    let err = quarantine::pause_all(&fx.store, &op.in_org(&acme.id), FleetKind::Agent, Some(&blue.id)).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn team_scoped_pause_leaves_other_teams_alone() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[]);
    let in_red = resource(&fx.store, &owner, &acme.id, FleetKind::Instance, "r", Some(&red.id));
    let untagged = resource(&fx.store, &owner, &acme.id, FleetKind::Instance, "u", None);
    force_status(&fx.store, &in_red, FleetStatus::Online);
    force_status(&fx.store, &untagged, FleetStatus::Online);

    let outcome = quarantine::pause_all(&fx.store, &creds, FleetKind::Instance, Some(&red.id)).unwrap();
    assert_eq!(outcome.paused, 1);
    let u = fleet::get(&fx.store, &creds, FleetKind::Instance, &untagged.id).unwrap().unwrap();
    assert_eq!(u.status, FleetStatus::Online);

    let err = quarantine::pause_all(&fx.store, &creds, FleetKind::Instance, Some("no-such-team")).unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn failed_audit_write_rolls_back_the_transition() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    let agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);
    force_status(&fx.store, &agent, FleetStatus::Active);

    let conn = db::db_connect(&fx.store.db_path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER audit_sink_down BEFORE INSERT ON audit_log
         BEGIN SELECT RAISE(ABORT, 'audit sink down'); END;",
    )
    .unwrap();

    let err = quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "x").unwrap_err();
    assert_eq!(err.code(), "INTERNAL");
    let err = quarantine::pause_all(&fx.store, &creds, FleetKind::Agent, None).unwrap_err();
    assert_eq!(err.code(), "INTERNAL");

    conn.execute_batch("DROP TRIGGER audit_sink_down;").unwrap();
    let now = fleet::get(&fx.store, &creds, FleetKind::Agent, &agent.id).unwrap().unwrap();
    assert_eq!(now.status, FleetStatus::Active);
}

#[test]
fn committed_transitions_notify() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    let agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);

    quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "x").unwrap();
    quarantine::pause_all(&fx.store, &creds, FleetKind::Instance, None).unwrap();
    let _ = quarantine::quarantine(&fx.store, &creds, FleetKind::Agent, &agent.id, "again");

    let events = JsonlNotifier::new(&fx.store.root).read_all().unwrap();
    let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["quarantine_agent", "pause_all_instances"]);
    assert_eq!(events[0].resource_id.as_deref(), Some(agent.id.as_str()));
    assert_eq!(events[0].org_id.as_deref(), Some(acme.id.as_str()));
}
