//! Integration tests for the authentication flows.
//!
//! Tests two-factor login, lockout, one-time code consumption, refresh
//! rotation and rate limiting against the in-memory backends.

use hr_auth::{
    auth::{
        AuthError, AuthService, ClientInfo, Identity, LoginOutcome, LoginRequest,
        TwoFactorRequest, VerifyOtpRequest,
    },
    cache::MemoryCache,
    config::{AuthConfig, RateLimitConfig, RateLimitRule},
    db::{MemoryCredentialStore, MemoryRoleStore, MemorySessionStore, RoleStore},
    otp::{OtpPurpose, RecordingDispatcher},
    rate_limit::RateLimiter,
};
use std::{sync::Arc, time::Duration};

const PASSWORD: &str = "Correct-Horse-9";

struct Harness {
    auth: AuthService,
    credentials: MemoryCredentialStore,
    mail: RecordingDispatcher,
}

fn test_config() -> AuthConfig {
    let mut config = AuthConfig::new(
        "access-secret-for-integration-tests".to_string(),
        "refresh-secret-for-integration-tests".to_string(),
        "integration-pepper".to_string(),
    );
    config.security.argon2_time_cost = 1;
    config.security.argon2_memory_kib = 1024;
    config
}

async fn setup() -> Harness {
    let credentials = MemoryCredentialStore::new();
    let roles = MemoryRoleStore::new();
    roles
        .define_role("employee", &["employees.view", "leave.request"])
        .await;
    let mail = RecordingDispatcher::new();

    let auth = AuthService::builder(test_config())
        .cache(Arc::new(MemoryCache::new()))
        .credentials(Arc::new(credentials.clone()))
        .sessions(Arc::new(MemorySessionStore::new()))
        .roles(Arc::new(roles))
        .dispatcher(Arc::new(mail.clone()))
        .build()
        .expect("Failed to build auth service");

    Harness {
        auth,
        credentials,
        mail,
    }
}

async fn create_identity(h: &Harness, email: &str, two_factor: bool) -> Identity {
    let hash = h.auth.passwords().hash(PASSWORD).unwrap();
    let identity = h.credentials.create(email, &hash).await;
    h.credentials
        .update(identity.id, |i| i.two_factor_enabled = two_factor)
        .await;
    identity
}

fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_two_factor_login() {
    let h = setup().await;
    let identity = create_identity(&h, "twofa@example.com", true).await;
    let client = ClientInfo::new(Some("10.1.1.1".into()), Some("integration".into()));

    let outcome = h
        .auth
        .login(login_request("twofa@example.com", PASSWORD), &client)
        .await
        .unwrap();
    let LoginOutcome::TwoFactorRequired { email } = outcome else {
        panic!("Two-factor identity should not receive tokens from the first step");
    };
    assert_eq!(email, "twofa@example.com");

    let code = h
        .mail
        .last_code("twofa@example.com", OtpPurpose::TwoFactor)
        .await
        .expect("Code should have been dispatched");

    let session = h
        .auth
        .verify_two_factor(
            TwoFactorRequest {
                email: "twofa@example.com".into(),
                code: code.clone(),
            },
            &client,
        )
        .await
        .unwrap();
    assert_eq!(session.identity.id, identity.id);
    assert!(session.identity.roles.is_empty());

    // The code is single use
    let replay = h
        .auth
        .verify_two_factor(
            TwoFactorRequest {
                email: "twofa@example.com".into(),
                code,
            },
            &client,
        )
        .await
        .unwrap_err();
    assert!(matches!(replay, AuthError::OtpExpired));
}

#[tokio::test]
async fn test_two_factor_wrong_code() {
    let h = setup().await;
    create_identity(&h, "twofa@example.com", true).await;

    h.auth
        .login(
            login_request("twofa@example.com", PASSWORD),
            &ClientInfo::default(),
        )
        .await
        .unwrap();
    let code = h
        .mail
        .last_code("twofa@example.com", OtpPurpose::TwoFactor)
        .await
        .unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let err = h
        .auth
        .verify_two_factor(
            TwoFactorRequest {
                email: "twofa@example.com".into(),
                code: wrong.into(),
            },
            &ClientInfo::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::OtpInvalid));

    // The right code still works after one miss
    assert!(
        h.auth
            .verify_two_factor(
                TwoFactorRequest {
                    email: "twofa@example.com".into(),
                    code,
                },
                &ClientInfo::default(),
            )
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_lockout_after_consecutive_failures() {
    let h = setup().await;
    let identity = create_identity(&h, "locked@example.com", false).await;

    for attempt in 1..=5 {
        let err = h
            .auth
            .login(
                login_request("locked@example.com", "Wrong-Horse-9"),
                &ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, AuthError::InvalidCredentials),
            "Attempt {attempt} should be rejected as invalid credentials"
        );
    }

    // Even the correct password is refused while locked
    let err = h
        .auth
        .login(
            login_request("locked@example.com", PASSWORD),
            &ClientInfo::default(),
        )
        .await
        .unwrap_err();
    match err {
        AuthError::AccountLocked { remaining } => {
            assert!(remaining <= Duration::from_secs(1800));
            assert!(remaining > Duration::from_secs(1700));
        }
        other => panic!("Expected lockout, got {other:?}"),
    }

    let stored = h.credentials.get(identity.id).await.unwrap();
    assert_eq!(stored.failed_attempts, 5);
    assert!(stored.locked_until.is_some());
}

#[tokio::test]
async fn test_successful_login_clears_failures() {
    let h = setup().await;
    create_identity(&h, "flaky@example.com", false).await;

    for _ in 0..4 {
        let _ = h
            .auth
            .login(
                login_request("flaky@example.com", "Wrong-Horse-9"),
                &ClientInfo::default(),
            )
            .await;
    }
    h.auth
        .login(
            login_request("flaky@example.com", PASSWORD),
            &ClientInfo::default(),
        )
        .await
        .unwrap();

    // Four more failures do not lock because the counter restarted
    for _ in 0..4 {
        let _ = h
            .auth
            .login(
                login_request("flaky@example.com", "Wrong-Horse-9"),
                &ClientInfo::default(),
            )
            .await;
    }
    assert!(
        h.auth
            .login(
                login_request("flaky@example.com", PASSWORD),
                &ClientInfo::default(),
            )
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_concurrent_otp_verification_consumes_once() {
    let h = setup().await;
    create_identity(&h, "race@example.com", false).await;

    h.auth
        .send_otp(hr_auth::auth::SendOtpRequest {
            email: "race@example.com".into(),
            purpose: OtpPurpose::EmailVerification,
        })
        .await
        .unwrap();
    let code = h
        .mail
        .last_code("race@example.com", OtpPurpose::EmailVerification)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let auth = h.auth.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            auth.verify_otp(VerifyOtpRequest {
                email: "race@example.com".into(),
                purpose: OtpPurpose::EmailVerification,
                code,
            })
            .await
            .is_ok()
        }));
    }

    let mut verified = 0;
    for handle in handles {
        if handle.await.unwrap() {
            verified += 1;
        }
    }
    assert_eq!(verified, 1, "A code must verify exactly once");
}

#[tokio::test]
async fn test_concurrent_refresh_rotates_once() {
    let h = setup().await;
    create_identity(&h, "rotate@example.com", false).await;

    let LoginOutcome::Authenticated(session) = h
        .auth
        .login(
            login_request("rotate@example.com", PASSWORD),
            &ClientInfo::default(),
        )
        .await
        .unwrap()
    else {
        panic!("Expected a session");
    };

    let mut handles = Vec::new();
    for _ in 0..4 {
        let auth = h.auth.clone();
        let token = session.tokens.refresh_token.clone();
        handles.push(tokio::spawn(async move {
            auth.refresh(&token, &ClientInfo::default()).await
        }));
    }

    let mut rotated = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => rotated += 1,
            Err(e) => assert!(matches!(e, AuthError::SessionRevoked)),
        }
    }
    assert_eq!(rotated, 1, "Only one refresh may win the rotation");
}

#[tokio::test]
async fn test_access_token_cannot_refresh() {
    let h = setup().await;
    create_identity(&h, "types@example.com", false).await;

    let LoginOutcome::Authenticated(session) = h
        .auth
        .login(
            login_request("types@example.com", PASSWORD),
            &ClientInfo::default(),
        )
        .await
        .unwrap()
    else {
        panic!("Expected a session");
    };

    assert!(matches!(
        h.auth
            .refresh(&session.tokens.access_token, &ClientInfo::default())
            .await,
        Err(AuthError::TokenInvalid)
    ));
    assert!(matches!(
        h.auth.authenticate(&session.tokens.refresh_token).await,
        Err(AuthError::TokenInvalid)
    ));
}

#[tokio::test]
async fn test_superuser_role_passes_every_gate() {
    let credentials = MemoryCredentialStore::new();
    let roles = MemoryRoleStore::new();
    roles.define_role("super_admin", &["*"]).await;

    let auth = AuthService::builder(test_config())
        .credentials(Arc::new(credentials.clone()))
        .sessions(Arc::new(MemorySessionStore::new()))
        .roles(Arc::new(roles.clone()))
        .build()
        .unwrap();

    let hash = auth.passwords().hash(PASSWORD).unwrap();
    let identity = credentials.create("root@example.com", &hash).await;
    roles.assign_role(identity.id, "super_admin").await.unwrap();

    let LoginOutcome::Authenticated(session) = auth
        .login(
            login_request("root@example.com", PASSWORD),
            &ClientInfo::default(),
        )
        .await
        .unwrap()
    else {
        panic!("Expected a session");
    };

    for permission in ["payroll.approve", "roles.manage", "reports.export"] {
        assert!(auth.require_permission(&session.identity, &[permission]).is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn test_login_endpoint_rate_limit_recovers() {
    let rules = RateLimitConfig {
        login: RateLimitRule::new(5, Duration::from_secs(60)),
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), rules);
    let rule = limiter.rules().login;

    for _ in 0..5 {
        assert!(
            limiter
                .check_endpoint("login", "192.0.2.7", rule)
                .await
                .unwrap()
                .allowed
        );
    }
    let blocked = limiter
        .check_endpoint("login", "192.0.2.7", rule)
        .await
        .unwrap();
    assert!(!blocked.allowed);
    assert!(blocked.retry_after <= Duration::from_secs(60));

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(
        limiter
            .check_endpoint("login", "192.0.2.7", rule)
            .await
            .unwrap()
            .allowed
    );
}
