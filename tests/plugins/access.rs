#[path = "../common/mod.rs"]
mod common;

use common::*;
use fleetgate::plugins::fleet::{self, FleetKind, FleetStatus};
use fleetgate::plugins::rbac::Role;

#[test]
fn non_admin_only_sees_own_teams_and_untagged() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (bob, _) = member(&fx.store, &owner, &acme.id, "bob@example.com", Role::Operator);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[&bob]);
    let blue = team_with(&fx.store, &owner, &acme.id, "blue", &[]);

    for kind in [FleetKind::Agent, FleetKind::Instance] {
        let shared = resource(&fx.store, &owner, &acme.id, kind, "shared", None);
        let mine = resource(&fx.store, &owner, &acme.id, kind, "mine", Some(&red.id));
        let theirs = resource(&fx.store, &owner, &acme.id, kind, "theirs", Some(&blue.id));

        let mut seen: Vec<String> = fleet::list(&fx.store, &bob.in_org(&acme.id), kind, None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        seen.sort();
        let mut expected = vec![shared.id.clone(), mine.id.clone()];
        expected.sort();
        assert_eq!(seen, expected);

        assert!(fleet::get(&fx.store, &bob.in_org(&acme.id), kind, &mine.id).unwrap().is_some());
        assert!(fleet::get(&fx.store, &bob.in_org(&acme.id), kind, &theirs.id).unwrap().is_none());

        // Asking for the hidden team explicitly yields nothing either.
        assert!(
            fleet::list(&fx.store, &bob.in_org(&acme.id), kind, Some(&blue.id))
                .unwrap()
                .is_empty()
        );
    }
}

#[test]
fn admins_see_every_record() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (admin, _) = member(&fx.store, &owner, &acme.id, "admin@example.com", Role::Admin);
    let blue = team_with(&fx.store, &owner, &acme.id, "blue", &[]);
    resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);
    let tagged = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "b", Some(&blue.id));

    let all = fleet::list(&fx.store, &admin.in_org(&acme.id), FleetKind::Agent, None).unwrap();
    assert_eq!(all.len(), 2);
    assert!(fleet::get(&fx.store, &admin.in_org(&acme.id), FleetKind::Agent, &tagged.id).unwrap().is_some());
}

#[test]
fn cross_org_get_is_indistinguishable_from_absent() {
    let fx = fixture();
    let (acme, acme_owner) = org_with_owner(&fx.store, "acme");
    let (globex, globex_owner) = org_with_owner(&fx.store, "globex");
    let foreign = resource(&fx.store, &globex_owner, &globex.id, FleetKind::Instance, "db-1", None);

    let probe = fleet::get(&fx.store, &acme_owner.in_org(&acme.id), FleetKind::Instance, &foreign.id).unwrap();
    let absent = fleet::get(&fx.store, &acme_owner.in_org(&acme.id), FleetKind::Instance, "missing").unwrap();
    assert!(probe.is_none());
    assert!(absent.is_none());
}

#[test]
fn viewers_cannot_mutate_and_team_tags_guard_mutations() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (viewer, _) = member(&fx.store, &owner, &acme.id, "v@example.com", Role::Viewer);
    let (op, _) = member(&fx.store, &owner, &acme.id, "op@example.com", Role::Operator);
    let blue = team_with(&fx.store, &owner, &acme.id, "blue", &[]);
    let agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", Some(&blue.id));

    let err = fleet::create(&fx.store, &viewer.in_org(&acme.id), FleetKind::Agent, "x", None).unwrap_err();
    assert_eq!(err.to_string(), "requires operator access");

    let err = fleet::update_status(
        &fx.store,
        &op.in_org(&acme.id),
        FleetKind::Agent,
        &agent.id,
        FleetStatus::Active,
    )
    .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let err = fleet::create(&fx.store, &op.in_org(&acme.id), FleetKind::Agent, "x", Some(&blue.id)).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn status_updates_cannot_touch_quarantine() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let agent = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "a", None);
    let creds = owner.in_org(&acme.id);

    let err = fleet::update_status(&fx.store, &creds, FleetKind::Agent, &agent.id, FleetStatus::Quarantined).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    let err = fleet::update_status(&fx.store, &creds, FleetKind::Agent, &agent.id, FleetStatus::Online).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    force_status(&fx.store, &agent, FleetStatus::Quarantined);
    let err = fleet::update_status(&fx.store, &creds, FleetKind::Agent, &agent.id, FleetStatus::Active).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let other = resource(&fx.store, &owner, &acme.id, FleetKind::Agent, "b", None);
    let updated = fleet::update_status(&fx.store, &creds, FleetKind::Agent, &other.id, FleetStatus::Active).unwrap();
    assert_eq!(updated.status, FleetStatus::Active);
}
