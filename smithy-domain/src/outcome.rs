//! 投递结果（Outcome）
//!
//! `Action::load` 对一批任务回报的信号：
//! - `jobs` 为空表示“本批次的全部任务”；
//! - `error` 为空表示成功，否则按重试策略失败或丢弃；
//! - `force_discard` 无视已尝试次数，直接丢弃；
//! - `on_succeeded`/`on_failed`/`on_discarded` 为链式动作。
//!
//! 每个 `Outcome` 只会被裁决器消费一次，不做持久化。
//!
use crate::action::Action;
use crate::job::JobStatus;
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Builder, Clone, Default)]
pub struct Outcome {
    #[builder(default)]
    jobs: Vec<String>,
    error: Option<DeliveryError>,
    #[builder(default)]
    force_discard: bool,
    #[builder(default)]
    on_succeeded: Vec<Arc<dyn Action>>,
    #[builder(default)]
    on_failed: Vec<Arc<dyn Action>>,
    #[builder(default)]
    on_discarded: Vec<Arc<dyn Action>>,
}

impl Outcome {
    /// 整批成功
    pub fn succeeded() -> Self {
        Self::default()
    }

    /// 整批失败（按重试预算处理）
    pub fn failed(error: DeliveryError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        self.error.as_ref()
    }

    pub fn force_discard(&self) -> bool {
        self.force_discard
    }

    /// 某个状态对应的链式动作
    pub fn chained(&self, status: JobStatus) -> &[Arc<dyn Action>] {
        match status {
            JobStatus::Succeeded => &self.on_succeeded,
            JobStatus::Failed => &self.on_failed,
            JobStatus::Discarded => &self.on_discarded,
            JobStatus::Pending => &[],
        }
    }
}

fn identities(actions: &[Arc<dyn Action>]) -> Vec<&str> {
    actions.iter().map(|a| a.identity()).collect()
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("jobs", &self.jobs)
            .field("error", &self.error)
            .field("force_discard", &self.force_discard)
            .field("on_succeeded", &identities(&self.on_succeeded))
            .field("on_failed", &identities(&self.on_failed))
            .field("on_discarded", &identities(&self.on_discarded))
            .finish()
    }
}

/// 投递错误：状态码、可读信息与字段级校验
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryError {
    pub status_code: u16,
    #[builder(into)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub validations: Vec<Validation>,
}

impl DeliveryError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            validations: Vec::new(),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code, self.message)
    }
}

/// 字段级校验失败
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub message: String,
    pub path: Vec<String>,
}

impl Validation {
    pub fn new<P, S>(message: impl Into<String>, path: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message: message.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}
