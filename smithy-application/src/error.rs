use smithy_domain::error::DomainError;
use smithy_domain::trigger::Mode;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method not allowed: {method} {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("already registered: {kind}={name}")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("mode mismatch: trigger={trigger}, expected={expected}, found={found}")]
    ModeMismatch {
        trigger: String,
        expected: Mode,
        found: Mode,
    },
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// 面向 HTTP 调用方的状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Domain(DomainError::Encoding { .. }) => 400,
            AppError::Domain(DomainError::NotFound { .. }) | AppError::NotFound(_) => 404,
            AppError::MethodNotAllowed { .. } => 405,
            AppError::AlreadyRegistered { .. } => 409,
            _ => 500,
        }
    }
}
