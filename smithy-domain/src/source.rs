//! 来源（Source）
//!
//! 一个来源是一组触发器的集合，提供来源级默认调度；
//! 定时触发器的间隔按 触发器覆盖 > 来源默认 > 网关默认 的顺序解析。
//!
use crate::schedule::ScheduleOverride;
use crate::trigger::Trigger;
use std::collections::BTreeMap;

/// 来源公共选项（被其下所有触发器共享，除非被覆盖）
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    pub default_schedule: ScheduleOverride,
}

pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn options(&self) -> SourceOptions;

    /// 触发器名称 -> 触发器
    fn triggers(&self) -> BTreeMap<String, Trigger>;
}
