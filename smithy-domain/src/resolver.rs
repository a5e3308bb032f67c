//! 结果裁决（OutcomeResolver）
//!
//! 针对一个批次消费 `Outcome`，确定性地推进任务状态：
//! 1. 目标任务：`jobs` 非空时取其中属于本批次的 id，否则取整个批次；
//!    不属于本批次的 id 被忽略；
//! 2. 无错误：全部成功；
//! 3. 有错误且 `force_discard`：无视尝试次数，全部丢弃；
//! 4. 有错误：尝试次数 +1，达到 `max_retries` 时丢弃，否则失败并在下一个间隔重试；
//! 5. 每个实际到达的状态，其链式动作在本次 `Outcome` 中只派发一次，
//!    以第一个到达该状态的任务的上下文入队为新任务。
//!
//! 状态流转由存储保证按任务 id 原子；已处于终态的任务保持不变。
//!
use crate::action::Action;
use crate::delivery::Batch;
use crate::error::{DomainError, DomainResult};
use crate::event::Context;
use crate::job::{Job, JobStatus, Verdict};
use crate::outcome::Outcome;
use crate::persist::Store;
use crate::time::Clock;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct OutcomeResolver {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl OutcomeResolver {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn resolve(&self, batch: &Batch, outcome: &Outcome) -> DomainResult<Resolution> {
        let now = self.clock.now();
        let mut resolution = Resolution::default();

        let targets: Vec<String> = if outcome.jobs().is_empty() {
            batch.job_ids()
        } else {
            let mut targets = Vec::with_capacity(outcome.jobs().len());
            for id in outcome.jobs() {
                if batch.contains(id) {
                    targets.push(id.clone());
                } else {
                    tracing::debug!(batch_id = batch.id(), job_id = %id, "job not in batch, ignored");
                    resolution.ignored.push(id.clone());
                }
            }
            targets
        };

        let verdict = match outcome.error() {
            None => Verdict::Succeed,
            Some(_) if outcome.force_discard() => Verdict::Discard,
            Some(_) => Verdict::Fail {
                max_retries: batch.schedule().max_retries,
                retry_at: batch.schedule().interval.next_after(now).unwrap_or(now),
            },
        };

        // 每个状态第一个到达的任务，用于链式动作的上下文
        let mut first: [Option<Job>; 3] = [None, None, None];

        for id in targets {
            let job = match self.store.transition(&id, &verdict, now).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tracing::debug!(batch_id = batch.id(), job_id = %id, "job missing from store, ignored");
                    resolution.ignored.push(id);
                    continue;
                }
                Err(DomainError::InvalidTransition { from, .. }) => {
                    tracing::debug!(batch_id = batch.id(), job_id = %id, status = %from, "job already terminal");
                    resolution.unchanged.push(id);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let slot = match job.status() {
                JobStatus::Succeeded => {
                    resolution.succeeded.push(id);
                    0
                }
                JobStatus::Failed => {
                    tracing::debug!(
                        job_id = %id,
                        attempts = job.attempts(),
                        next_attempt_at = ?job.next_attempt_at(),
                        "job failed, will retry"
                    );
                    resolution.failed.push(id);
                    1
                }
                JobStatus::Discarded => {
                    tracing::warn!(
                        destination = batch.destination(),
                        action = batch.action(),
                        job_id = %id,
                        attempts = job.attempts(),
                        error = ?outcome.error().map(ToString::to_string),
                        "job discarded"
                    );
                    resolution.discarded.push(id);
                    2
                }
                JobStatus::Pending => continue,
            };

            if first[slot].is_none() {
                first[slot] = Some(job);
            }
        }

        let statuses = [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Discarded];
        for (status, job) in statuses.into_iter().zip(first) {
            let Some(job) = job else { continue };
            for action in outcome.chained(status) {
                resolution.chained.push(ChainedAction {
                    status,
                    destination: batch.destination().to_string(),
                    action: action.clone(),
                    context: job.context().clone(),
                    event_id: job.event_id().to_string(),
                    sent_at: job.sent_at(),
                });
            }
        }

        Ok(resolution)
    }
}

/// 单个 `Outcome` 的裁决结果
#[derive(Debug, Default)]
pub struct Resolution {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub discarded: Vec<String>,
    /// 本批次内但已处于终态的任务
    pub unchanged: Vec<String>,
    /// 不属于本批次（或存储中不存在）的 id
    pub ignored: Vec<String>,
    pub chained: Vec<ChainedAction>,
}

impl Resolution {
    /// 本次 `Outcome` 实际覆盖到的批次内任务
    pub fn addressed(&self) -> impl Iterator<Item = &str> {
        self.succeeded
            .iter()
            .chain(&self.failed)
            .chain(&self.discarded)
            .chain(&self.unchanged)
            .map(String::as_str)
    }
}

/// 待入队的链式动作
#[derive(Clone)]
pub struct ChainedAction {
    pub status: JobStatus,
    pub destination: String,
    pub action: Arc<dyn Action>,
    pub context: Arc<Context>,
    pub event_id: String,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChainedAction {
    /// 编码为新任务，拥有自己的重试预算
    pub fn to_job(&self, now: DateTime<Utc>) -> DomainResult<Job> {
        let payload = self.action.marshal()?;
        Ok(Job::pending(
            self.event_id.as_str(),
            self.destination.as_str(),
            self.action.identity(),
            self.context.clone(),
            payload,
            self.sent_at,
            now,
        ))
    }
}

impl fmt::Debug for ChainedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedAction")
            .field("status", &self.status)
            .field("destination", &self.destination)
            .field("action", &self.action.identity())
            .field("event_id", &self.event_id)
            .finish()
    }
}
