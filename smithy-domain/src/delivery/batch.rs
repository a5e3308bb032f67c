use crate::error::DomainResult;
use crate::job::Job;
use crate::schedule::Schedule;
use serde::de::DeserializeOwned;

/// 一次 `load` 调用接收的任务批次
///
/// 同一批次中的任务属于同一个（目的地, 动作），共享该动作解析后的调度。
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    destination: String,
    action: String,
    schedule: Schedule,
    jobs: Vec<Job>,
}

impl Batch {
    pub fn new(
        destination: impl Into<String>,
        action: impl Into<String>,
        schedule: Schedule,
        jobs: Vec<Job>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            destination: destination.into(),
            action: action.into(),
            schedule,
            jobs,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.iter().any(|j| j.id() == job_id)
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.id().to_string()).collect()
    }

    /// 按批次顺序解码全部任务数据
    pub fn data<D: DeserializeOwned>(&self) -> DomainResult<Vec<D>> {
        self.jobs.iter().map(Job::data).collect()
    }
}
