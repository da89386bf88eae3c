#[path = "../common/mod.rs"]
mod common;

use common::*;
use fleetgate::plugins::rbac::Role;
use fleetgate::plugins::team;

#[test]
fn remove_member_of_another_team_is_invalid() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (bob, _) = member(&fx.store, &owner, &acme.id, "bob@example.com", Role::Operator);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[&bob]);
    let blue = team_with(&fx.store, &owner, &acme.id, "blue", &[]);
    let creds = owner.in_org(&acme.id);

    let red_membership = team::list_team_members(&fx.store, &creds, &red.id).unwrap().remove(0);

    let err = team::remove_team_member(&fx.store, &creds, &blue.id, &red_membership.id).unwrap_err();
    assert_eq!(err.to_string(), "Validation error: Invalid membership");
    assert_eq!(err.code(), "VALIDATION");

    let err = team::remove_team_member(&fx.store, &creds, &red.id, "no-such-membership").unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    team::remove_team_member(&fx.store, &creds, &red.id, &red_membership.id).unwrap();
    assert!(team::list_team_members(&fx.store, &creds, &red.id).unwrap().is_empty());
    assert_eq!(audit_count(&fx.store, &acme.id, "remove_team_member"), 1);
}

#[test]
fn membership_from_another_org_is_invalid() {
    let fx = fixture();
    let (acme, acme_owner) = org_with_owner(&fx.store, "acme");
    let (globex, globex_owner) = org_with_owner(&fx.store, "globex");
    let acme_red = team_with(&fx.store, &acme_owner, &acme.id, "red", &[]);
    let globex_red = team_with(&fx.store, &globex_owner, &globex.id, "red", &[&globex_owner]);
    let foreign = team::list_team_members(&fx.store, &globex_owner.in_org(&globex.id), &globex_red.id)
        .unwrap()
        .remove(0);

    let err = team::remove_team_member(&fx.store, &acme_owner.in_org(&acme.id), &acme_red.id, &foreign.id).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    let err = team::remove_team_member(&fx.store, &acme_owner.in_org(&acme.id), &globex_red.id, &foreign.id).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn only_org_members_join_teams_once() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let outsider = actor(&fx.store, "outsider@example.com");
    let (bob, _) = member(&fx.store, &owner, &acme.id, "bob@example.com", Role::Viewer);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[]);
    let creds = owner.in_org(&acme.id);

    let err = team::add_team_member(&fx.store, &creds, &red.id, &outsider.user.id).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    team::add_team_member(&fx.store, &creds, &red.id, &bob.user.id).unwrap();
    let err = team::add_team_member(&fx.store, &creds, &red.id, &bob.user.id).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let err = team::add_team_member(&fx.store, &creds, "no-such-team", &bob.user.id).unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn team_management_requires_admin() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (op, _) = member(&fx.store, &owner, &acme.id, "op@example.com", Role::Operator);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[]);

    let err = team::create_team(&fx.store, &op.in_org(&acme.id), "blue").unwrap_err();
    assert_eq!(err.to_string(), "requires admin access");
    let err = team::add_team_member(&fx.store, &op.in_org(&acme.id), &red.id, &op.user.id).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let teams = team::list_teams(&fx.store, &op.in_org(&acme.id)).unwrap();
    assert_eq!(teams.len(), 1);
    assert!(team::create_team(&fx.store, &owner.in_org(&acme.id), "  ").is_err());
}
