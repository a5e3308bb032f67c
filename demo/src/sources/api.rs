//! `api` 来源：通过 HTTP 接收注册请求
use crate::flows::OnRegister;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smithy_domain::error::DomainResult;
use smithy_domain::event::{Payload, decode_payload};
use smithy_domain::flow::Flow;
use smithy_domain::source::{Source, SourceOptions};
use smithy_domain::trigger::{HttpTrigger, Request, Route, Trigger};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 注册请求中的用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

pub struct Api;

impl Source for Api {
    fn name(&self) -> &str {
        "api"
    }

    fn options(&self) -> SourceOptions {
        SourceOptions::default()
    }

    fn triggers(&self) -> BTreeMap<String, Trigger> {
        BTreeMap::from([("register".to_string(), Trigger::Http(Arc::new(Register)))])
    }
}

/// `POST /register`
pub struct Register;

#[async_trait]
impl HttpTrigger for Register {
    fn name(&self) -> &str {
        "register"
    }

    fn route(&self) -> Route {
        Route {
            methods: vec!["POST".into()],
            path: "/register".into(),
            show_meta: true,
            show_data: false,
        }
    }

    async fn extract(&self, request: &Request) -> DomainResult<Payload> {
        let wire = decode_payload::<User>(request.body())?;
        let flow = OnRegister::from_user(&wire.data);
        Payload::from_wire(wire, vec![Arc::new(flow) as Arc<dyn Flow>])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smithy_domain::error::DomainError;

    fn request(body: serde_json::Value) -> Request {
        Request::builder()
            .method("POST")
            .path("/register")
            .body(serde_json::to_vec(&body).unwrap())
            .build()
    }

    #[tokio::test]
    async fn extracts_user_and_register_flow() {
        let payload = Register
            .extract(&request(serde_json::json!({
                "context": {"locale": "fr-FR"},
                "data": {
                    "username": "jdoe",
                    "first_name": "Jane",
                    "last_name": "Doe",
                    "email": "Jane@Example.com",
                },
                "sent_at": "2024-01-01T00:00:00Z",
            })))
            .await
            .unwrap();

        assert_eq!(payload.context().locale(), Some("fr-FR"));
        assert_eq!(payload.data()["username"], "jdoe");
        assert_eq!(payload.flows().len(), 1);
        assert_eq!(payload.flows()[0].name(), "on-register");
    }

    #[tokio::test]
    async fn unknown_user_fields_are_rejected() {
        let err = Register
            .extract(&request(serde_json::json!({
                "context": {},
                "data": {
                    "username": "jdoe",
                    "first_name": "Jane",
                    "last_name": "Doe",
                    "email": "jane@example.com",
                    "admin": true,
                },
                "sent_at": "2024-01-01T00:00:00Z",
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Encoding { .. }));
    }
}
