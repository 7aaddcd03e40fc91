//! Session lifecycle integration tests: login, per-request resolution, guard
//! composition and bulk revocation, driven through the public library API.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};

use driver_rewards::identity::{
    resolve_context, sponsor_organization, DenyKind, Identity, IdentityPolicy, IdentityStore, MemoryStore,
    OrganizationPolicy, OrganizationStore, Role, RolePolicy, Session, SessionManager,
};
use driver_rewards::password::hash_password;

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() }

fn seed(store: &MemoryStore, email: &str, role: Role, orgs: &[i64]) -> Identity {
    let mut p = Identity::new(0, email, role).with_affiliations(orgs.iter().copied());
    p.password_hash = hash_password("correct horse").unwrap();
    let id = store.create_identity(p).unwrap();
    store.get_identity_by_id(id).unwrap()
}

fn login_at(sm: &SessionManager, identity: Identity, at: DateTime<Utc>) -> Session { sm.create_at(identity, at).unwrap() }

#[test]
fn sponsor_session_guards_across_expiry() -> Result<()> {
    let store = MemoryStore::new();
    let org = store.create_organization("Acme Freight")?;
    let sponsor = seed(&store, "sponsor.a@example.com", Role::Sponsor, &[org]);
    let sm = SessionManager::new(Arc::new(store.clone()));
    let session = login_at(&sm, sponsor, t0());
    let raw = session.token.to_string();

    let sponsor_only = RolePolicy::require([Role::Sponsor])?;
    let guard = |now| {
        let ctx = resolve_context(&store, Some(raw.as_str()), now).unwrap();
        sponsor_only
            .evaluate(ctx.session())
            .and_then(|| OrganizationPolicy::member_of(org).evaluate(ctx.session()))
    };

    let just_before = t0() + Duration::hours(5) + Duration::minutes(59);
    assert!(guard(just_before).is_allowed());

    let just_after = t0() + Duration::hours(6) + Duration::minutes(1);
    let decision = guard(just_after);
    assert_eq!(decision.denial().map(|d| d.kind), Some(DenyKind::Unauthenticated));

    let ctx = resolve_context(&store, Some(raw.as_str()), just_after).unwrap();
    assert!(ctx.discard_credential);
    Ok(())
}

#[test]
fn sponsor_override_is_limited_to_own_organization() -> Result<()> {
    let store = MemoryStore::new();
    let acme = store.create_organization("Acme Freight")?;
    let other = store.create_organization("Other Haulage")?;
    let driver = seed(&store, "driver.b@example.com", Role::Driver, &[acme]);
    let sponsor_a = seed(&store, "sponsor.a@example.com", Role::Sponsor, &[acme]);
    let sponsor_c = seed(&store, "sponsor.c@example.com", Role::Sponsor, &[other]);
    let sm = SessionManager::new(Arc::new(store.clone()));

    let policy = IdentityPolicy::owner(driver.id).with_sponsor_override();
    let a = login_at(&sm, sponsor_a, t0());
    let c = login_at(&sm, sponsor_c, t0());

    assert!(policy.evaluate(Some(&a), &store).is_allowed());
    let denied = policy.evaluate(Some(&c), &store);
    assert_eq!(denied.denial().map(|d| d.kind), Some(DenyKind::Forbidden));

    assert_eq!(sponsor_organization(Some(&a))?, acme);
    assert_eq!(sponsor_organization(Some(&c))?, other);
    Ok(())
}

#[test]
fn revoke_all_except_keeps_only_the_named_session() -> Result<()> {
    let store = MemoryStore::new();
    let driver = seed(&store, "driver@example.com", Role::Driver, &[]);
    let bystander = seed(&store, "other@example.com", Role::Driver, &[]);
    let sm = SessionManager::new(Arc::new(store.clone()));

    let keep = login_at(&sm, driver.clone(), t0());
    let s2 = login_at(&sm, driver.clone(), t0());
    let s3 = login_at(&sm, driver.clone(), t0());
    let theirs = login_at(&sm, bystander.clone(), t0());

    assert_eq!(sm.revoke_all_except(driver.id, keep.id)?, 2);
    // Already revoked rows are not counted again.
    assert_eq!(sm.revoke_all_except(driver.id, keep.id)?, 0);

    let now = t0() + Duration::minutes(1);
    let live = sm.sessions_for(driver.id, false, now)?;
    assert_eq!(live.iter().map(|s| s.id).collect::<Vec<_>>(), vec![keep.id]);

    for stale in [&s2, &s3] {
        let ctx = resolve_context(&store, Some(stale.token.to_string().as_str()), now).unwrap();
        assert!(ctx.is_anonymous());
        assert!(ctx.discard_credential);
    }
    assert!(sm.sessions_for(bystander.id, false, now)?.iter().any(|s| s.id == theirs.id));
    Ok(())
}

#[test]
fn deactivation_invalidates_live_sessions() -> Result<()> {
    let store = MemoryStore::new();
    let driver = seed(&store, "driver@example.com", Role::Driver, &[]);
    let sm = SessionManager::new(Arc::new(store.clone()));
    let session = login_at(&sm, driver.clone(), t0());
    let raw = session.token.to_string();
    let now = t0() + Duration::minutes(5);

    assert!(resolve_context(&store, Some(raw.as_str()), now).unwrap().session().is_some());
    store.set_identity_active(driver.id, false)?;
    let ctx = resolve_context(&store, Some(raw.as_str()), now).unwrap();
    assert!(ctx.is_anonymous());
    assert!(ctx.discard_credential);
    Ok(())
}

#[test]
fn role_change_is_seen_on_next_request() -> Result<()> {
    let store = MemoryStore::new();
    let user = seed(&store, "user@example.com", Role::User, &[]);
    let sm = SessionManager::new(Arc::new(store.clone()));
    let raw = login_at(&sm, user.clone(), t0()).token.to_string();
    let admin_only = RolePolicy::require([Role::Admin])?;
    let now = t0() + Duration::minutes(1);

    let before = resolve_context(&store, Some(raw.as_str()), now).unwrap();
    assert_eq!(admin_only.evaluate(before.session()).denial().map(|d| d.kind), Some(DenyKind::Forbidden));

    store.update_identity_role(user.id, Role::Admin)?;
    let after = resolve_context(&store, Some(raw.as_str()), now).unwrap();
    assert!(admin_only.evaluate(after.session()).is_allowed());
    Ok(())
}

#[test]
fn malformed_token_is_rejected_before_any_lookup() {
    let store = MemoryStore::new();
    let err = resolve_context(&store, Some("definitely-not-a-uuid"), t0()).unwrap_err();
    assert_eq!(err.kind, DenyKind::Unauthenticated);
}
