//! 动作（Action）
//!
//! 投递的最小单元，对应 ETL 中的 “L”：
//! - `identity`：在目的地内唯一的稳定名称，用于路由与日志；
//! - `schedule`：可选的字段级调度覆盖；
//! - `marshal`：将类型化载荷编码为线上字节，失败则任务不会被创建；
//! - `load`：对一批任务执行真正的投递，通过 `Then` 回报一个或多个 `Outcome`。
//!
use crate::delivery::Batch;
use crate::error::{DomainError, DomainResult};
use crate::outcome::Outcome;
use crate::schedule::{Schedule, ScheduleOverride};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// 动作协议
#[async_trait]
pub trait Action: Send + Sync {
    /// 动作标识
    fn identity(&self) -> &str;

    /// 覆盖目的地默认调度，未设置的字段继承默认值
    fn schedule(&self) -> Option<ScheduleOverride> {
        None
    }

    /// 编码载荷
    fn marshal(&self) -> DomainResult<Vec<u8>>;

    /// 投递一批任务；只有该方法允许阻塞或耗时
    ///
    /// 返回时 `then` 被释放，调度器据此判断本次投递已结束；
    /// 若需在后台继续回报，可克隆 `then` 交给后台任务。
    async fn load(&self, batch: &Batch, then: Then);

    /// 解析该动作的最终调度
    fn resolve_schedule(&self, destination_default: &Schedule) -> Schedule {
        match self.schedule() {
            Some(over) => over.apply(destination_default),
            None => destination_default.clone(),
        }
    }
}

/// 以 JSON 编码任意可序列化的数据
pub fn marshal_json<T>(data: &T) -> DomainResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(data)?)
}

/// 结果回报通道（一次 load 可回报多个 `Outcome`）
#[derive(Clone, Debug)]
pub struct Then {
    tx: mpsc::UnboundedSender<Outcome>,
}

impl Then {
    pub fn channel() -> (Then, mpsc::UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Then { tx }, rx)
    }

    /// 回报结果；调度器已停止收集时返回 `ChannelClosed`
    pub fn send(&self, outcome: Outcome) -> DomainResult<()> {
        self.tx.send(outcome).map_err(|_| DomainError::ChannelClosed {
            reason: "outcome collector is gone".into(),
        })
    }
}
