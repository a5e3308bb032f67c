//! 投递子系统（delivery）
//!
//! 提供任务从入队到结果落定的运行时：
//! - `Batch`：一次 `load` 接收的任务批次；
//! - `PubSub`：实时通知协议，`inmemory` 特性提供基于 broadcast 的实现；
//! - `collect`：收集 `load` 回报的结果、逐个裁决并识别停滞批次；
//! - `DeliveryEngine`：按（目的地, 动作）周期投递，并订阅实时通知立即投递；
//! - `enqueue`：写入新任务，并为实时车道发布通知。
//!
mod batch;
mod collector;
mod engine;
mod pubsub;
#[cfg(feature = "inmemory")]
mod pubsub_inmemory;

pub use batch::Batch;
pub use collector::{BatchReport, Interrupted, collect};
pub use engine::{DeliveryEngine, EngineConfig, EngineHandle};
pub use pubsub::{JobNotice, PubSub};
#[cfg(feature = "inmemory")]
pub use pubsub_inmemory::InMemoryPubSub;

use crate::destination::Destinations;
use crate::error::DomainResult;
use crate::job::Job;
use crate::persist::Store;
use std::collections::BTreeSet;

/// 写入新任务；对实时调度的车道各发布一次通知
///
/// 通知发布失败只记录日志：任务已落库，会在下一个周期窗口被投递。
pub async fn enqueue(
    store: &dyn Store,
    pubsub: &dyn PubSub,
    destinations: &Destinations,
    jobs: Vec<Job>,
) -> DomainResult<usize> {
    if jobs.is_empty() {
        return Ok(0);
    }

    let mut realtime = BTreeSet::new();
    for job in &jobs {
        let registered = destinations.action(job.destination(), job.action())?;
        if registered.schedule.realtime {
            realtime.insert(JobNotice::new(job.destination(), job.action()));
        }
    }

    let count = jobs.len();
    store.insert_jobs(jobs).await?;

    let notices: Vec<JobNotice> = realtime.into_iter().collect();
    if let Err(err) = pubsub.publish_batch(&notices).await {
        tracing::warn!(error = %err, "publish realtime notices failed");
    }

    Ok(count)
}
