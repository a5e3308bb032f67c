//! 内存版存储（InMemoryStore）
//!
//! 基于 `DashMap` 实现 `Store` 协议：
//! - `transition` 在持有任务所在分片写锁的情况下完成“读-判定-写”，
//!   因此对同一任务 id 的状态流转是原子的；
//! - 不同任务之间没有全局锁。
//!
//! 典型用途：测试环境、示例与本地开发。

use super::Store;
use crate::error::DomainResult;
use crate::event::EventRecord;
use crate::job::{Job, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    events: Arc<DashMap<String, EventRecord>>,
    jobs: Arc<DashMap<String, Job>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个事件派生出的全部任务（按创建时间）
    pub fn jobs_of_event(&self, event_id: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.event_id() == event_id)
            .map(|j| j.value().clone())
            .collect();
        jobs.sort_by(|a, b| (a.created_at(), a.id()).cmp(&(b.created_at(), b.id())));
        jobs
    }

    /// 全部任务快照
    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.iter().map(|j| j.value().clone()).collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_event(&self, event: EventRecord) -> DomainResult<()> {
        self.events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn event(&self, event_id: &str) -> DomainResult<Option<EventRecord>> {
        Ok(self.events.get(event_id).map(|e| e.value().clone()))
    }

    async fn insert_jobs(&self, jobs: Vec<Job>) -> DomainResult<()> {
        for job in jobs {
            self.jobs.insert(job.id().to_string(), job);
        }
        Ok(())
    }

    async fn job(&self, job_id: &str) -> DomainResult<Option<Job>> {
        Ok(self.jobs.get(job_id).map(|j| j.value().clone()))
    }

    async fn due_jobs(
        &self,
        destination: &str,
        action: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> DomainResult<Vec<Job>> {
        let mut due: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.destination() == destination && j.action() == action && j.is_due(now))
            .map(|j| j.value().clone())
            .collect();

        due.sort_by(|a, b| (a.created_at(), a.id()).cmp(&(b.created_at(), b.id())));
        due.truncate(limit);
        Ok(due)
    }

    async fn transition(
        &self,
        job_id: &str,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Job>> {
        let Some(mut entry) = self.jobs.get_mut(job_id) else {
            return Ok(None);
        };

        entry.apply(verdict, now)?;
        Ok(Some(entry.value().clone()))
    }
}
