//! 流（Flow）与扇出
//!
//! 流是 ETL 中的 “T”：把一个事件转换为 `目的地 -> 有序动作列表`。
//! `transform` 必须是纯函数且确定：同一事件总是得到相同的目的地、动作与顺序，
//! 这是重试与重放正确性的前提。校验在上游解码时完成，`transform` 本身不会失败。
//!
//! `fan_out` 在摄取时对事件只调用一次：遍历启用的流，编码每个动作，并把事件的
//! 上下文显式盖印到派生出的每个任务上。任何编码错误都会在创建任务之前中止扇出。
//!
use crate::action::Action;
use crate::destination::Destinations;
use crate::error::DomainResult;
use crate::event::Event;
use crate::job::Job;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 扇出结果：目的地名称 -> 有序动作列表
pub type Actions = BTreeMap<String, Vec<Arc<dyn Action>>>;

/// 流选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowOptions {
    pub enabled: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub trait Flow: Send + Sync {
    fn name(&self) -> &str;

    /// 被禁用的流不会被调用
    fn options(&self) -> FlowOptions {
        FlowOptions::default()
    }

    fn transform(&self, event: &Event) -> Actions;
}

/// 事件扇出为待投递任务
///
/// 目的地或动作未注册时返回 `NotFound`，编码失败时返回 `Encoding`，
/// 两种情况下都不会产生任何任务。
pub fn fan_out(
    event: &Event,
    destinations: &Destinations,
    now: DateTime<Utc>,
) -> DomainResult<Vec<Job>> {
    let mut jobs = Vec::new();

    for flow in event.flows() {
        if !flow.options().enabled {
            tracing::debug!(flow = flow.name(), event_id = event.id(), "flow disabled, skipped");
            continue;
        }

        for (destination, actions) in flow.transform(event) {
            for action in actions {
                let registered = destinations.action(&destination, action.identity())?;
                let payload = action.marshal()?;

                jobs.push(Job::pending(
                    event.id(),
                    registered.destination.as_str(),
                    action.identity(),
                    event.context().clone(),
                    payload,
                    event.sent_at(),
                    now,
                ));
            }
        }
    }

    Ok(jobs)
}
