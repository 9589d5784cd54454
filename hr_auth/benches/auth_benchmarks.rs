use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use hr_auth::{
    config::AuthConfig,
    otp::{generate_code, hash_code},
    password::{PasswordManager, PasswordPolicy},
    permissions::{has_all, has_any, permission_matches},
    tokens::{TokenIssuer, TokenSubject, TokenType},
};
use std::hint::black_box;
use uuid::Uuid;

fn bench_config() -> AuthConfig {
    AuthConfig::new(
        "bench-access-secret-0123456789abcdef",
        "bench-refresh-secret-0123456789abcdef",
        "bench-pepper-0123456789",
    )
}

/// Held permission sets of the sizes a role bundle typically reaches
fn permission_set(size: usize) -> Vec<String> {
    let modules = ["employees", "attendance", "payroll", "leave", "reports"];
    (0..size)
        .map(|i| format!("{}.action{}", modules[i % modules.len()], i))
        .collect()
}

/// Benchmark single slug matching (exact, module wildcard, superuser)
fn bench_permission_matches(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_matches");
    for (name, held) in [
        ("exact", "payroll.view"),
        ("module_wildcard", "payroll.*"),
        ("superuser", "*"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| permission_matches(black_box(held), black_box("payroll.view")))
        });
    }
    group.finish();
}

/// Benchmark has_any / has_all against growing held sets (worst case: no match)
fn bench_permission_sets(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_sets");
    for size in [8, 64, 256] {
        let held = permission_set(size);
        group.bench_with_input(BenchmarkId::new("has_any_miss", size), &held, |b, held| {
            b.iter(|| has_any(black_box(held.as_slice()), black_box(&["settings.edit", "audit.view"])))
        });
        group.bench_with_input(BenchmarkId::new("has_all_hit", size), &held, |b, held| {
            b.iter(|| has_all(black_box(held.as_slice()), black_box(&["employees.action0"])))
        });
    }
    group.finish();
}

/// Benchmark access token validation, the per-request hot path
fn bench_token_validate(c: &mut Criterion) {
    let issuer = TokenIssuer::new(&bench_config().jwt);
    let roles = vec!["employee".to_string()];
    let permissions = permission_set(32);
    let pair = issuer
        .issue_pair(TokenSubject {
            id: Uuid::new_v4(),
            email: "bench@example.com",
            roles: &roles,
            permissions: &permissions,
        })
        .unwrap();

    c.bench_function("token_validate_access", |b| {
        b.iter(|| issuer.validate(black_box(&pair.access_token), TokenType::Access))
    });
}

/// Benchmark one-time code generation and hashing
fn bench_otp(c: &mut Criterion) {
    c.bench_function("otp_generate_and_hash", |b| {
        b.iter(|| hash_code(&generate_code(black_box(6))))
    });
}

/// Benchmark password policy checks and (reduced-cost) hashing
fn bench_password(c: &mut Criterion) {
    let policy = PasswordPolicy::default();
    c.bench_function("password_policy_validate", |b| {
        b.iter(|| policy.validate(black_box("Correct-Horse-9")))
    });

    let mut config = bench_config();
    config.security.argon2_time_cost = 1;
    config.security.argon2_memory_kib = 1024;
    let manager = PasswordManager::new(&config.security).unwrap();
    let hash = manager.hash("Correct-Horse-9").unwrap();

    let mut group = c.benchmark_group("password_hashing");
    group.sample_size(20);
    group.bench_function("verify", |b| {
        b.iter(|| manager.verify(black_box("Correct-Horse-9"), &hash))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_permission_matches,
    bench_permission_sets,
    bench_token_validate,
    bench_otp,
    bench_password
);
criterion_main!(benches);
