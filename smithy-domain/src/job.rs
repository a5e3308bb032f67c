//! 任务（Job）与状态机
//!
//! 一个任务对应“一个事件 × 一个目的地 × 一个动作”的一次投递单元：
//! - 创建时为 `pending`；
//! - `succeeded` 与 `discarded` 为终态，终态任务不会再被投递或变更；
//! - `failed` 为等待重试的中间态，到达 `next_attempt_at` 后重新进入投递窗口；
//! - 尝试次数只增不减。
//!
use crate::error::{DomainError, DomainResult};
use crate::event::{Context, WirePayload};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Failed,
    Succeeded,
    Discarded,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Discarded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Failed => "failed",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Discarded => "discarded",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 裁决器对单个任务给出的判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Succeed,
    Discard,
    /// 计入一次失败；达到 `max_retries` 时丢弃，否则在 `retry_at` 重试
    Fail {
        max_retries: u32,
        retry_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    event_id: String,
    destination: String,
    action: String,
    context: Arc<Context>,
    payload: Vec<u8>,
    sent_at: Option<DateTime<Utc>>,
    attempts: u32,
    status: JobStatus,
    history: Vec<JobStatus>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    /// 创建待投递任务
    pub fn pending(
        event_id: impl Into<String>,
        destination: impl Into<String>,
        action: impl Into<String>,
        context: Arc<Context>,
        payload: Vec<u8>,
        sent_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            destination: destination.into(),
            action: action.into(),
            context,
            payload,
            sent_at,
            attempts: 0,
            status: JobStatus::Pending,
            history: vec![JobStatus::Pending],
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// 经历过的状态序列（首项为 `pending`）
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 是否处于可投递窗口
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// 解码任务数据
    pub fn data<D: DeserializeOwned>(&self) -> DomainResult<D> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// 带上下文的线上形态：`{"context", "data", "sent_at"}`
    pub fn to_wire(&self) -> DomainResult<Vec<u8>> {
        let data: Value = serde_json::from_slice(&self.payload)?;
        let wire = WirePayload {
            context: (*self.context).clone(),
            data,
            sent_at: self.sent_at.unwrap_or(self.created_at),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// 应用判定，返回新状态；终态任务拒绝任何变更
    pub fn apply(&mut self, verdict: &Verdict, now: DateTime<Utc>) -> DomainResult<JobStatus> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
            });
        }

        let next = match verdict {
            Verdict::Succeed => {
                self.next_attempt_at = None;
                JobStatus::Succeeded
            }
            Verdict::Discard => {
                self.next_attempt_at = None;
                JobStatus::Discarded
            }
            Verdict::Fail {
                max_retries,
                retry_at,
            } => {
                self.attempts = self.attempts.saturating_add(1);
                if self.attempts >= *max_retries {
                    self.next_attempt_at = None;
                    JobStatus::Discarded
                } else {
                    self.next_attempt_at = Some(*retry_at);
                    JobStatus::Failed
                }
            }
        };

        self.status = next;
        self.history.push(next);
        self.updated_at = now;
        Ok(next)
    }
}
