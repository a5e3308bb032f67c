use crate::error::DomainResult;
use crate::event::EventRecord;
use crate::job::{Job, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 事件与任务存储
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_event(&self, event: EventRecord) -> DomainResult<()>;

    async fn event(&self, event_id: &str) -> DomainResult<Option<EventRecord>>;

    async fn insert_jobs(&self, jobs: Vec<Job>) -> DomainResult<()>;

    async fn job(&self, job_id: &str) -> DomainResult<Option<Job>>;

    /// 拉取到期（`pending`，或已到重试时间的 `failed`）任务，按创建时间排序
    async fn due_jobs(
        &self,
        destination: &str,
        action: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DomainResult<Vec<Job>>;

    /// 原子地对单个任务应用判定
    ///
    /// - `Ok(None)`：任务不存在；
    /// - `Err(InvalidTransition)`：任务已处于终态，未作任何修改。
    async fn transition(
        &self,
        job_id: &str,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Job>>;
}
