use super::Context;
use crate::error::DomainResult;
use crate::flow::Flow;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// 线上载荷形态：所有触发器与动作统一使用 `context`/`data`/`sent_at` 三个顶层键
///
/// 三个键都是必填的，未知的顶层键会被拒绝。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WirePayload<D> {
    pub context: Context,
    pub data: D,
    pub sent_at: DateTime<Utc>,
}

/// 解码线上载荷，形状不符时返回 `DomainError::Encoding`
pub fn decode_payload<D>(bytes: &[u8]) -> DomainResult<WirePayload<D>>
where
    D: DeserializeOwned,
{
    Ok(serde_json::from_slice(bytes)?)
}

/// 触发器提取的结果：上下文、数据与需要执行的流
#[derive(Builder, Clone)]
pub struct Payload {
    #[builder(default)]
    context: Context,
    #[builder(default)]
    data: Value,
    sent_at: Option<DateTime<Utc>>,
    #[builder(default)]
    flows: Vec<Arc<dyn Flow>>,
}

impl Payload {
    /// 由已解码的线上载荷构造，`data` 会被重新编码为 JSON 值
    pub fn from_wire<D: Serialize>(
        wire: WirePayload<D>,
        flows: Vec<Arc<dyn Flow>>,
    ) -> DomainResult<Self> {
        Ok(Self {
            context: wire.context,
            data: serde_json::to_value(&wire.data)?,
            sent_at: Some(wire.sent_at),
            flows,
        })
    }

    /// 补上入站请求的网络来源；载荷自带的 `context.ip` 优先
    pub fn with_origin(mut self, ip: Option<IpAddr>) -> Self {
        self.context.fill_ip(ip);
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn flows(&self) -> &[Arc<dyn Flow>] {
        &self.flows
    }

    pub(crate) fn into_parts(self) -> (Context, Value, Option<DateTime<Utc>>, Vec<Arc<dyn Flow>>) {
        (self.context, self.data, self.sent_at, self.flows)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("context", &self.context)
            .field("data", &self.data)
            .field("sent_at", &self.sent_at)
            .field(
                "flows",
                &self.flows.iter().map(|flow| flow.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct User {
        email: String,
    }

    #[test]
    fn decodes_the_three_top_level_keys() {
        let raw = br#"{
            "context": {"locale": "fr-FR", "library": {"name": "smithy-js"}},
            "data": {"email": "x@y.com"},
            "sent_at": "2024-01-01T00:00:00Z"
        }"#;

        let wire: WirePayload<User> = decode_payload(raw).unwrap();
        assert_eq!(wire.context.locale(), Some("fr-FR"));
        assert_eq!(
            wire.context.library().and_then(|l| l.name()),
            Some("smithy-js")
        );
        assert_eq!(wire.data.email, "x@y.com");
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let raw = br#"{
            "context": {},
            "data": {"email": "x@y.com"},
            "sent_at": "2024-01-01T00:00:00Z",
            "extra": true
        }"#;

        let err = decode_payload::<User>(raw).unwrap_err();
        assert!(matches!(err, DomainError::Encoding { .. }));
    }

    #[test]
    fn rejects_missing_keys_and_type_mismatches() {
        let missing = br#"{"context": {}, "data": {"email": "x@y.com"}}"#;
        assert!(decode_payload::<User>(missing).is_err());

        let mismatch = br#"{"context": {}, "data": {"email": 42}, "sent_at": "2024-01-01T00:00:00Z"}"#;
        assert!(decode_payload::<User>(mismatch).is_err());
    }

    #[test]
    fn origin_only_fills_a_missing_ip() {
        let origin: IpAddr = "10.0.0.7".parse().unwrap();

        let anonymous = Payload::builder().build().with_origin(Some(origin));
        assert_eq!(anonymous.context().ip(), Some(origin));

        let declared: Context = serde_json::from_str(r#"{"ip": "192.0.2.1"}"#).unwrap();
        let payload = Payload::builder()
            .context(declared)
            .build()
            .with_origin(Some(origin));
        assert_eq!(payload.context().ip(), "192.0.2.1".parse().ok());
    }

    #[test]
    fn payload_from_wire_keeps_sent_at() {
        let wire = WirePayload {
            context: Context::default(),
            data: User {
                email: "x@y.com".into(),
            },
            sent_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let payload = Payload::from_wire(wire, vec![]).unwrap();
        assert_eq!(payload.data()["email"], "x@y.com");
        assert_eq!(payload.sent_at().map(|t| t.timestamp()), Some(1_700_000_000));
    }
}
