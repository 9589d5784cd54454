//! Authentication flows, models and errors.

pub mod errors;
pub mod models;
pub mod service;

pub use errors::{AuthError, AuthResult};
pub use models::{
    AuthenticatedSession, ChangePasswordRequest, ClientInfo, CurrentIdentity, Identity,
    IdentityId, IdentityStatus, LoginOutcome, LoginRequest, PasswordResetConfirm,
    PasswordResetRequest, RefreshRequest, SendOtpRequest, SessionRecord, TwoFactorRequest,
    VerifyOtpRequest,
};
pub use service::{AuthService, AuthServiceBuilder, normalize_email};
