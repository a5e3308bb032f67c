//! 事件（Event）与共享上下文
//!
//! 每次触发器成功提取都会创建一个不可变的 `Event`，其上下文以 `Arc` 共享给
//! 所有由它派生的任务。事件的扇出在摄取时只计算一次（见 `flow::fan_out`）。

mod context;
mod payload;

pub use context::{Context, Library};
pub use payload::{Payload, WirePayload, decode_payload};

use crate::flow::Flow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// 已摄取的事件
#[derive(Clone)]
pub struct Event {
    id: String,
    source: String,
    trigger: String,
    context: Arc<Context>,
    data: Value,
    sent_at: Option<DateTime<Utc>>,
    received_at: DateTime<Utc>,
    flows: Vec<Arc<dyn Flow>>,
}

impl Event {
    pub fn new(
        source: impl Into<String>,
        trigger: impl Into<String>,
        payload: Payload,
        received_at: DateTime<Utc>,
    ) -> Self {
        let (context, data, sent_at, flows) = payload.into_parts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            trigger: trigger.into(),
            context: Arc::new(context),
            data,
            sent_at,
            received_at,
            flows,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn flows(&self) -> &[Arc<dyn Flow>] {
        &self.flows
    }

    /// 持久化形态（不含流）
    pub fn record(&self) -> EventRecord {
        EventRecord {
            id: self.id.clone(),
            source: self.source.clone(),
            trigger: self.trigger.clone(),
            context: (*self.context).clone(),
            data: self.data.clone(),
            sent_at: self.sent_at,
            received_at: self.received_at,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("trigger", &self.trigger)
            .field("context", &self.context)
            .field("data", &self.data)
            .field("sent_at", &self.sent_at)
            .field("received_at", &self.received_at)
            .field(
                "flows",
                &self.flows.iter().map(|flow| flow.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// 事件在存储层的标准形态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub source: String,
    pub trigger: String,
    pub context: Context,
    pub data: Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}
