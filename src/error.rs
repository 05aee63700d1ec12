use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by account and skill-catalog operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Username or email already taken.
    #[error("{0}")]
    Conflict(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    /// No reset pending or the presented token does not match.
    #[error("password reset token is invalid")]
    TokenInvalid,

    #[error("password reset token has expired")]
    TokenExpired,

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),

    /// The user record was written but some catalog entries were not.
    #[error("skill catalog out of sync for user {user_id}: {failed_skills:?}")]
    SynchronizationPartialFailure {
        user_id: Uuid,
        failed_skills: Vec<String>,
    },
}

impl AccountError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors caused by caller input rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Conflict(_)
                | Self::InvalidCredentials
                | Self::TokenInvalid
                | Self::TokenExpired
                | Self::NotFound { .. }
        )
    }
}

pub type AccountResult<T> = Result<T, AccountError>;
