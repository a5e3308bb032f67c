//! 领域层统一错误定义
//!
//! 聚焦编码、调度解析、任务状态流转、批次停滞与触发器关停等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
//! 注意：投递失败（`DeliveryError`）不是这里的错误，它只作为 `Outcome`
//! 的数据随结果回报，不跨越 load/resolve 边界抛出。
//!
use crate::job::JobStatus;
use std::time::Duration;
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 编码/解码 ---
    #[error("encoding error: {reason}")]
    Encoding { reason: String },

    // --- 调度 ---
    #[error("invalid schedule: {reason}")]
    InvalidSchedule { reason: String },

    // --- 任务状态 ---
    #[error("invalid transition: job={job_id}, from={from}")]
    InvalidTransition { job_id: String, from: JobStatus },
    #[error("stalled batch: batch={batch_id}, unresolved={unresolved:?}")]
    StalledBatch {
        batch_id: String,
        unresolved: Vec<String>,
    },

    // --- 触发器 ---
    #[error("cancellation timeout: trigger={trigger}, waited={waited:?}")]
    CancellationTimeout { trigger: String, waited: Duration },
    #[error("channel closed: {reason}")]
    ChannelClosed { reason: String },

    // --- 协作方 ---
    #[error("store error: {reason}")]
    Store { reason: String },
    #[error("pubsub error: {reason}")]
    PubSub { reason: String },

    // --- 通用 ---
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn encoding(reason: impl Into<String>) -> Self {
        Self::Encoding {
            reason: reason.into(),
        }
    }

    pub fn pubsub(reason: impl Into<String>) -> Self {
        Self::PubSub {
            reason: reason.into(),
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Encoding {
            reason: err.to_string(),
        }
    }
}

impl From<cron::error::Error> for DomainError {
    fn from(err: cron::error::Error) -> Self {
        DomainError::InvalidSchedule {
            reason: err.to_string(),
        }
    }
}

impl From<humantime::DurationError> for DomainError {
    fn from(err: humantime::DurationError) -> Self {
        DomainError::InvalidSchedule {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_errors_become_encoding_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = DomainError::from(err);
        assert!(matches!(err, DomainError::Encoding { .. }));
        assert!(err.to_string().starts_with("encoding error:"));
    }

    #[test]
    fn stalled_batch_lists_unresolved_jobs() {
        let err = DomainError::StalledBatch {
            batch_id: "b-1".into(),
            unresolved: vec!["j-1".into()],
        };
        assert_eq!(
            err.to_string(),
            "stalled batch: batch=b-1, unresolved=[\"j-1\"]"
        );
    }
}
