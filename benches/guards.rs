use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use driver_rewards::identity::{
    resolve_context, Identity, IdentityPolicy, IdentityStore, MemoryStore, OrganizationPolicy, OrganizationStore,
    Role, RolePolicy, Session, SessionManager,
};

struct Fixture {
    store: MemoryStore,
    sessions: Vec<Session>,
    drivers: Vec<i64>,
}

fn fixture(n: usize, seed: u64) -> Fixture {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = MemoryStore::new();
    let orgs: Vec<i64> = (0..8).map(|i| store.create_organization(&format!("org-{}", i)).unwrap()).collect();
    let sm = SessionManager::new(Arc::new(store.clone()));
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let mut sessions = Vec::with_capacity(n);
    let mut drivers = Vec::with_capacity(n);
    for i in 0..n {
        let org = orgs[rng.gen_range(0..orgs.len())];
        let role = if i % 4 == 0 { Role::Sponsor } else { Role::Driver };
        let p = Identity::new(0, format!("user{}@example.com", i), role).with_affiliations([org]);
        let id = store.create_identity(p).unwrap();
        let identity = store.get_identity_by_id(id).unwrap();
        if role == Role::Driver {
            drivers.push(id);
        }
        sessions.push(sm.create_at(identity, now).unwrap());
    }
    Fixture { store, sessions, drivers }
}

fn bench_guards(c: &mut Criterion) {
    let n = 10_000usize;
    let fx = fixture(n, 0xBEEF_CAFE);
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
    let tokens: Vec<String> = fx.sessions.iter().map(|s| s.token.to_string()).collect();

    let mut group = c.benchmark_group("guards");
    group.sample_size(20);
    group.throughput(Throughput::Elements(n as u64));

    group.bench_with_input(BenchmarkId::new("resolve_context", n), &n, |b, _| {
        b.iter(|| {
            let mut live = 0usize;
            for t in &tokens {
                if let Ok(ctx) = resolve_context(&fx.store, Some(t.as_str()), now) {
                    live += ctx.session().is_some() as usize;
                }
            }
            criterion::black_box(live);
        });
    });

    let sponsor_or_admin = RolePolicy::require([Role::Sponsor, Role::Admin]).unwrap();
    group.bench_with_input(BenchmarkId::new("role_then_org", n), &n, |b, _| {
        b.iter(|| {
            let mut allowed = 0usize;
            for s in &fx.sessions {
                let org = s.identity.affiliations.iter().next().copied().unwrap_or_default();
                let d = sponsor_or_admin
                    .evaluate(Some(s))
                    .and_then(|| OrganizationPolicy::member_of(org).with_admin_override().evaluate(Some(s)));
                allowed += d.is_allowed() as usize;
            }
            criterion::black_box(allowed);
        });
    });

    let mut rng = StdRng::seed_from_u64(0xFACE_FEED);
    let targets: Vec<i64> = (0..n).map(|_| fx.drivers[rng.gen_range(0..fx.drivers.len())]).collect();
    group.bench_with_input(BenchmarkId::new("identity_sponsor_override", n), &n, |b, _| {
        b.iter(|| {
            let mut allowed = 0usize;
            for (s, &target) in fx.sessions.iter().zip(&targets) {
                let d = IdentityPolicy::owner(target).with_sponsor_override().evaluate(Some(s), &fx.store);
                allowed += d.is_allowed() as usize;
            }
            criterion::black_box(allowed);
        });
    });

    group.bench_function("validate", |b| {
        let later = now + Duration::hours(4);
        b.iter(|| {
            let valid = fx.sessions.iter().filter(|s| SessionManager::validate(s, later)).count();
            criterion::black_box(valid);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_guards);
criterion_main!(benches);
