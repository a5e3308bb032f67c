//! 调度（Schedule）
//!
//! 一个目的地（或动作）的调度决定：
//! - `realtime`：是否在任务创建后立即投递（通过 pub/sub 通知）；
//! - `interval`：周期性投递窗口，也是失败任务的重试间隔；
//! - `max_retries`：失败次数达到该值后任务被丢弃。
//!
//! 覆盖按字段进行：`ScheduleOverride` 中每个字段独立可选，未设置的字段
//! 回落到下层默认值（动作覆盖 > 目的地默认 > 来源默认）。
//! 显式的 `max_retries = Some(0)` 与“未覆盖”是可区分的。
//!
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const EVERY_PREFIX: &str = "@every ";

/// 间隔描述：固定周期（`@every 30m`）或 CRON 表达式（`0 0 10 * * *`、`@daily`）
#[derive(Clone)]
pub enum Interval {
    Every(Duration),
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
}

impl Interval {
    pub fn every(period: Duration) -> Self {
        Self::Every(period)
    }

    /// 计算 `after` 之后的下一个触发时间点
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Interval::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
            Interval::Cron { schedule, .. } => schedule.after(&after).next(),
        }
    }

    /// 距离下一个触发时间点的等待时长
    pub fn wait_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        let next = self.next_after(now)?;
        (next - now).to_std().ok()
    }
}

impl FromStr for Interval {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(period) = s.strip_prefix(EVERY_PREFIX) {
            return Ok(Interval::Every(humantime::parse_duration(period.trim())?));
        }

        let schedule = cron::Schedule::from_str(s)?;
        Ok(Interval::Cron {
            expression: s.to_string(),
            schedule: Box::new(schedule),
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Every(period) => {
                write!(f, "{EVERY_PREFIX}{}", humantime::format_duration(*period))
            }
            Interval::Cron { expression, .. } => f.write_str(expression),
        }
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interval({self})")
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Interval::Every(a), Interval::Every(b)) => a == b,
            (Interval::Cron { expression: a, .. }, Interval::Cron { expression: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Interval {}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 已解析的完整调度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub realtime: bool,
    pub interval: Interval,
    pub max_retries: u32,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            realtime: false,
            interval: Interval::Every(Duration::from_secs(60)),
            max_retries: 10,
        }
    }
}

impl Schedule {
    /// 按顺序叠加覆盖，靠后的覆盖优先级更高
    pub fn layered<'a>(base: &Schedule, overrides: impl IntoIterator<Item = &'a ScheduleOverride>) -> Schedule {
        overrides
            .into_iter()
            .fold(base.clone(), |acc, layer| layer.apply(&acc))
    }
}

/// 部分覆盖：未设置的字段继承下层默认值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl ScheduleOverride {
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.realtime.is_none() && self.interval.is_none() && self.max_retries.is_none()
    }

    /// 字段级合并：覆盖中设置的字段优先，其余取自 `base`
    pub fn apply(&self, base: &Schedule) -> Schedule {
        Schedule {
            realtime: self.realtime.unwrap_or(base.realtime),
            interval: self.interval.clone().unwrap_or_else(|| base.interval.clone()),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
        }
    }
}

/// 解析 `@every` 或 CRON 间隔的便捷函数
pub fn interval(spec: &str) -> DomainResult<Interval> {
    spec.parse()
}
