//! 内存版实时通知（InMemoryPubSub）
//!
//! 基于 `tokio::sync::broadcast`：
//! - `publish`：广播通知，无订阅者时忽略；
//! - `subscribe`：返回 `'static` 通知流；订阅者落后导致的丢失以 `PubSub` 错误体现。
//!
//! 通知丢失不会丢任务：任务仍会在下一个周期窗口被投递。

use super::{JobNotice, PubSub};
use crate::error::{DomainError, DomainResult};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
pub struct InMemoryPubSub {
    tx: broadcast::Sender<JobNotice>,
}

impl InMemoryPubSub {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, notice: &JobNotice) -> DomainResult<()> {
        let _ = self.tx.send(notice.clone());
        Ok(())
    }

    async fn subscribe(&self) -> BoxStream<'static, DomainResult<JobNotice>> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::pubsub(e.to_string())));
        Box::pin(stream)
    }
}
