use super::Batch;
use crate::error::{DomainError, DomainResult};
use crate::outcome::Outcome;
use crate::resolver::{OutcomeResolver, Resolution};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

/// 一个批次的收集结果
#[derive(Debug)]
pub enum BatchReport {
    /// 全部任务都被某个 `Outcome` 覆盖
    Resolved {
        batch_id: String,
        resolutions: Vec<Resolution>,
    },
    /// 超时或 `load` 结束时仍有任务未被覆盖，这些任务保持原状态
    Stalled {
        batch_id: String,
        resolutions: Vec<Resolution>,
        unresolved: Vec<String>,
    },
}

impl BatchReport {
    pub fn batch_id(&self) -> &str {
        match self {
            BatchReport::Resolved { batch_id, .. } | BatchReport::Stalled { batch_id, .. } => {
                batch_id
            }
        }
    }

    pub fn is_stalled(&self) -> bool {
        matches!(self, BatchReport::Stalled { .. })
    }

    pub fn resolutions(&self) -> &[Resolution] {
        match self {
            BatchReport::Resolved { resolutions, .. } | BatchReport::Stalled { resolutions, .. } => {
                resolutions
            }
        }
    }

    pub fn unresolved(&self) -> &[String] {
        match self {
            BatchReport::Resolved { .. } => &[],
            BatchReport::Stalled { unresolved, .. } => unresolved,
        }
    }

    /// 停滞的批次转换为 `StalledBatch` 错误
    pub fn into_result(self) -> DomainResult<Vec<Resolution>> {
        match self {
            BatchReport::Resolved { resolutions, .. } => Ok(resolutions),
            BatchReport::Stalled {
                batch_id,
                unresolved,
                ..
            } => Err(DomainError::StalledBatch {
                batch_id,
                unresolved,
            }),
        }
    }
}

/// 裁决中途出错；`resolutions` 中的裁决已经生效
#[derive(Debug)]
pub struct Interrupted {
    pub resolutions: Vec<Resolution>,
    pub error: DomainError,
}

impl From<Interrupted> for DomainError {
    fn from(interrupted: Interrupted) -> Self {
        interrupted.error
    }
}

/// 收集 `load` 回报的结果并逐个裁决
///
/// 以下任一情况发生时结束：
/// - 批次内所有任务都已被覆盖；
/// - 回报通道关闭（`load` 已返回且没有后台回报者）；
/// - 到达 `timeout`。
pub async fn collect(
    resolver: &OutcomeResolver,
    batch: &Batch,
    mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    timeout: Duration,
) -> Result<BatchReport, Interrupted> {
    let deadline = Instant::now() + timeout;
    let mut pending: BTreeSet<String> = batch.job_ids().into_iter().collect();
    let mut resolutions = Vec::new();

    while !pending.is_empty() {
        let outcome = match timeout_at(deadline, outcomes.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => break,
            Err(_elapsed) => {
                tracing::debug!(batch_id = batch.id(), ?timeout, "outcome collection timed out");
                break;
            }
        };

        let resolution = match resolver.resolve(batch, &outcome).await {
            Ok(resolution) => resolution,
            Err(error) => return Err(Interrupted { resolutions, error }),
        };
        for id in resolution.addressed() {
            pending.remove(id);
        }
        resolutions.push(resolution);
    }

    let batch_id = batch.id().to_string();
    if pending.is_empty() {
        return Ok(BatchReport::Resolved {
            batch_id,
            resolutions,
        });
    }

    let unresolved: Vec<String> = pending.into_iter().collect();
    tracing::warn!(
        destination = batch.destination(),
        action = batch.action(),
        batch_id = %batch_id,
        unresolved = unresolved.len(),
        "batch stalled"
    );
    Ok(BatchReport::Stalled {
        batch_id,
        resolutions,
        unresolved,
    })
}
