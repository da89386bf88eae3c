#[path = "../common/mod.rs"]
mod common;

use common::*;
use fleetgate::plugins::org::{self, InvitationStatus};
use fleetgate::plugins::rbac::{Credentials, Role};

#[test]
fn creator_becomes_owner_and_slugs_are_unique() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    assert_eq!(acme.owner_id, owner.user.id);
    assert!(!acme.require_mfa);

    let members = org::list_members(&fx.store, &owner.in_org(&acme.id)).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, "owner");

    let other = actor(&fx.store, "other@example.com");
    let err = org::create_org(&fx.store, &other.creds(), "Acme 2", "acme").unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let err = org::create_org(&fx.store, &other.creds(), "Bad", "Bad Slug").unwrap_err();
    assert_eq!(err.code(), "VALIDATION");

    let err = org::create_org(&fx.store, &Credentials::default(), "Anon", "anon").unwrap_err();
    assert_eq!(err.code(), "UNAUTHENTICATED");

    assert_eq!(audit_count(&fx.store, &acme.id, "create_organization"), 1);
}

#[test]
fn last_owner_cannot_be_removed_or_demoted() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);
    let owner_membership = org::list_members(&fx.store, &creds).unwrap().remove(0);

    let err = org::remove_member(&fx.store, &creds, &owner_membership.id).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    let err = org::update_member_role(&fx.store, &creds, &owner_membership.id, Role::Admin).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    // With a second owner the first may step down.
    let (_second, _) = member(&fx.store, &owner, &acme.id, "second@example.com", Role::Owner);
    let demoted = org::update_member_role(&fx.store, &creds, &owner_membership.id, Role::Admin).unwrap();
    assert_eq!(demoted.role, "admin");
    assert_eq!(audit_count(&fx.store, &acme.id, "update_member_role"), 1);
}

#[test]
fn admins_cannot_touch_owners() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (admin, _) = member(&fx.store, &owner, &acme.id, "admin@example.com", Role::Admin);
    let (_viewer, viewer_m) = member(&fx.store, &owner, &acme.id, "v@example.com", Role::Viewer);
    let newbie = actor(&fx.store, "new@example.com");
    let creds = admin.in_org(&acme.id);

    let err = org::add_member(&fx.store, &creds, &newbie.user.id, Role::Owner).unwrap_err();
    assert_eq!(err.to_string(), "requires owner access");
    let err = org::update_member_role(&fx.store, &creds, &viewer_m.id, Role::Owner).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let owner_m = org::list_members(&fx.store, &creds)
        .unwrap()
        .into_iter()
        .find(|m| m.role == "owner")
        .unwrap();
    let err = org::remove_member(&fx.store, &creds, &owner_m.id).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let promoted = org::update_member_role(&fx.store, &creds, &viewer_m.id, Role::Operator).unwrap();
    assert_eq!(promoted.role, "operator");
    org::add_member(&fx.store, &creds, &newbie.user.id, Role::Viewer).unwrap();
    let err = org::add_member(&fx.store, &creds, &newbie.user.id, Role::Viewer).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}

#[test]
fn removing_a_member_drops_their_team_memberships() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (bob, bob_m) = member(&fx.store, &owner, &acme.id, "bob@example.com", Role::Operator);
    let red = team_with(&fx.store, &owner, &acme.id, "red", &[&bob]);
    let creds = owner.in_org(&acme.id);

    org::remove_member(&fx.store, &creds, &bob_m.id).unwrap();
    let err = org::get_org(&fx.store, &bob.in_org(&acme.id)).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    assert!(
        fleetgate::plugins::team::list_team_members(&fx.store, &creds, &red.id)
            .unwrap()
            .is_empty()
    );
    assert_eq!(audit_count(&fx.store, &acme.id, "remove_member"), 1);
}

#[test]
fn require_mfa_is_owner_only() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let (admin, _) = member(&fx.store, &owner, &acme.id, "admin@example.com", Role::Admin);

    let err = org::set_require_mfa(&fx.store, &admin.in_org(&acme.id), true).unwrap_err();
    assert_eq!(err.to_string(), "requires owner access");

    let updated = org::set_require_mfa(&fx.store, &owner.in_org(&acme.id), true).unwrap();
    assert!(updated.require_mfa);
    assert_eq!(audit_count(&fx.store, &acme.id, "update_mfa_policy"), 1);
}

#[test]
fn invitation_lifecycle() {
    let fx = fixture();
    let (acme, owner) = org_with_owner(&fx.store, "acme");
    let creds = owner.in_org(&acme.id);

    let invitation = org::invite(&fx.store, &creds, "Dana@Example.com", Role::Operator).unwrap();
    assert_eq!(invitation.status, InvitationStatus::Pending);
    assert_eq!(invitation.email, "dana@example.com");

    let err = org::invite(&fx.store, &creds, "dana@example.com", Role::Viewer).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let eve = actor(&fx.store, "eve@example.com");
    let err = org::accept_invitation(&fx.store, &eve.creds(), &invitation.id).unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let dana = actor(&fx.store, "dana@example.com");
    let membership = org::accept_invitation(&fx.store, &dana.creds(), &invitation.id).unwrap();
    assert_eq!(membership.role, "operator");
    assert!(org::get_org(&fx.store, &dana.in_org(&acme.id)).is_ok());

    let err = org::accept_invitation(&fx.store, &dana.creds(), &invitation.id).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    // Existing members cannot be invited again.
    let err = org::invite(&fx.store, &creds, "dana@example.com", Role::Viewer).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let second = org::invite(&fx.store, &creds, "frank@example.com", Role::Viewer).unwrap();
    let revoked = org::revoke_invitation(&fx.store, &creds, &second.id).unwrap();
    assert_eq!(revoked.status, InvitationStatus::Revoked);
    let err = org::revoke_invitation(&fx.store, &creds, &second.id).unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let statuses: Vec<InvitationStatus> = org::list_invitations(&fx.store, &creds)
        .unwrap()
        .into_iter()
        .map(|i| i.status)
        .collect();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.contains(&InvitationStatus::Accepted));
    assert!(statuses.contains(&InvitationStatus::Revoked));
}
