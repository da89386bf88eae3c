#[path = "../common/mod.rs"]
mod common;

use common::*;
use fleetgate::core::db;
use fleetgate::core::store::Store;
use fleetgate::plugins::rbac::{self, Credentials, Role, RoleTable, has_permission};
use fleetgate::plugins::{audit, team};
use rusqlite::params;

#[test]
fn operator_is_not_admin() {
    assert!(!has_permission("operator", "admin"));
    assert!(has_permission("owner", "viewer"));
    assert_eq!(RoleTable::standard().level("admin"), 2);
}

#[test]
fn role_floor_is_enforced_by_the_entry_wrapper() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (viewer, _) = member(&fx.store, &owner, &acme.id, "v@example.com", Role::Viewer);
    let (operator, _) = member(&fx.store, &owner, &acme.id, "op@example.com", Role::Operator);

    let err = team::create_team(&fx.store, &viewer.in_org(&acme.id), "red").unwrap_err();
    assert_eq!(err.to_string(), "requires admin access");
    assert_eq!(err.code(), "FORBIDDEN");

    let err = audit::list(
        &fx.store,
        &operator.in_org(&acme.id),
        &Default::default(),
        None,
        None,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "requires admin access");

    // Viewers still read.
    assert!(team::list_teams(&fx.store, &viewer.in_org(&acme.id)).is_ok());
}

#[test]
fn org_agnostic_calls_skip_the_role_floor() {
    let fx = fixture();
    let alice = actor(&fx.store, "alice@example.com");
    let ctx = fx
        .store
        .broker()
        .with_conn(&fx.store.db_path(), "test", "rbac.authorize", |conn| {
            rbac::authorize(&fx.store, conn, &alice.creds(), Some(Role::Owner))
        })
        .unwrap();
    assert!(ctx.member.is_none());
}

#[test]
fn org_scoped_operations_require_an_org() {
    let fx = fixture();
    let alice = actor(&fx.store, "alice@example.com");
    let err = team::list_teams(&fx.store, &alice.creds()).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    let err = team::list_teams(&fx.store, &Credentials::default()).unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
}

#[test]
fn team_ids_are_scoped_to_the_organization() {
    let fx = fixture();
    let (acme, acme_owner) = org_with_owner(&fx.store, "acme");
    let (globex, globex_owner) = org_with_owner(&fx.store, "globex");
    let (bob, _) = member(&fx.store, &acme_owner, &acme.id, "bob@example.com", Role::Viewer);
    fleetgate::plugins::org::add_member(
        &fx.store,
        &globex_owner.in_org(&globex.id),
        &bob.user.id,
        Role::Viewer,
    )
    .unwrap();

    let red = team_with(&fx.store, &acme_owner, &acme.id, "red", &[&bob]);
    let _blue = team_with(&fx.store, &acme_owner, &acme.id, "blue", &[]);
    let gold = team_with(&fx.store, &globex_owner, &globex.id, "gold", &[&bob]);

    let conn = db::db_connect(&fx.store.db_path()).unwrap();
    let acme_teams = rbac::team_ids_for_user(&conn, &acme.id, &bob.user.id).unwrap();
    assert_eq!(acme_teams.len(), 1);
    assert!(acme_teams.contains(&red.id));
    assert!(!acme_teams.contains(&gold.id));
}

#[test]
fn legacy_member_role_is_migrated_to_viewer() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (carol, membership) = member(&fx.store, &owner, &acme.id, "carol@example.com", Role::Operator);

    {
        let conn = db::db_connect(&fx.store.db_path()).unwrap();
        conn.execute(
            "UPDATE org_memberships SET role = 'member' WHERE id = ?1",
            params![membership.id],
        )
        .unwrap();
        conn.execute("UPDATE meta SET value = '1' WHERE key = 'schema_version'", [])
            .unwrap();
    }

    // Unknown role: every floor fails, including viewer.
    let err = team::list_teams(&fx.store, &carol.in_org(&acme.id)).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let reopened = Store::open(&fx.store.root).unwrap();
    let ctx = fleetgate::plugins::session::whoami(&reopened, Some(&carol.token), Some(&acme.id)).unwrap();
    assert_eq!(ctx.role(), Some(Role::Viewer));
    assert!(team::list_teams(&reopened, &carol.in_org(&acme.id)).is_ok());
}
