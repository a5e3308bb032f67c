//! 实时通知（PubSub）协议
//!
//! 任务入队后，若其动作为实时调度，则发布一条 `JobNotice`，
//! 投递引擎订阅后立即对对应的（目的地, 动作）执行一次投递。
//! 通知只携带车道信息，任务本身始终从存储中拉取。
//!
use crate::error::DomainResult;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// 某个（目的地, 动作）有新任务
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobNotice {
    pub destination: String,
    pub action: String,
}

impl JobNotice {
    pub fn new(destination: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            action: action.into(),
        }
    }
}

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, notice: &JobNotice) -> DomainResult<()>;

    async fn publish_batch(&self, notices: &[JobNotice]) -> DomainResult<()> {
        for notice in notices {
            self.publish(notice).await?;
        }
        Ok(())
    }

    /// 返回一个 'static 生命周期的通知流，便于在 tokio::spawn 中使用
    async fn subscribe(&self) -> BoxStream<'static, DomainResult<JobNotice>>;
}
