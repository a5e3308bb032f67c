//! `crm` 目的地
//!
//! `register` 只接受白名单域名的邮箱，结果通过 `notify` 链式通知用户；
//! `notify` 不走实时通道，按批次发送。
use super::locked;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smithy_domain::action::{Action, Then, marshal_json};
use smithy_domain::delivery::Batch;
use smithy_domain::destination::{Destination, DestinationOptions};
use smithy_domain::error::DomainResult;
use smithy_domain::event::decode_payload;
use smithy_domain::outcome::{DeliveryError, Outcome, Validation};
use smithy_domain::schedule::{Interval, Schedule, ScheduleOverride};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub email: String,
    pub message: String,
}

pub struct Crm {
    allowed_domains: Arc<Vec<String>>,
    outbox: Arc<Mutex<Vec<Notification>>>,
}

impl Crm {
    pub fn new<I, S>(allowed_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_domains: Arc::new(
                allowed_domains
                    .into_iter()
                    .map(|d| d.into().to_lowercase())
                    .collect(),
            ),
            outbox: Arc::default(),
        }
    }

    /// 已发送的通知
    pub fn outbox(&self) -> Arc<Mutex<Vec<Notification>>> {
        self.outbox.clone()
    }
}

impl Destination for Crm {
    fn name(&self) -> &str {
        "crm"
    }

    fn options(&self) -> DestinationOptions {
        DestinationOptions {
            default_schedule: Schedule {
                realtime: true,
                interval: Interval::every(Duration::from_secs(20)),
                max_retries: 50,
            },
        }
    }

    fn actions(&self) -> BTreeMap<String, Arc<dyn Action>> {
        BTreeMap::from([
            (
                "register".to_string(),
                Arc::new(Register {
                    allowed_domains: self.allowed_domains.clone(),
                    ..Default::default()
                }) as Arc<dyn Action>,
            ),
            (
                "notify".to_string(),
                Arc::new(Notify {
                    outbox: self.outbox.clone(),
                    ..Default::default()
                }) as Arc<dyn Action>,
            ),
        ])
    }
}

/// 在 CRM 中创建用户
#[derive(Clone, Default)]
pub struct Register {
    pub data: User,
    allowed_domains: Arc<Vec<String>>,
}

impl Register {
    pub fn new(data: User) -> Self {
        Self {
            data,
            allowed_domains: Arc::default(),
        }
    }

    fn authorized(&self, email: &str) -> bool {
        email
            .rsplit_once('@')
            .is_some_and(|(_, domain)| self.allowed_domains.iter().any(|d| d == domain))
    }
}

#[async_trait]
impl Action for Register {
    fn identity(&self) -> &str {
        "register"
    }

    fn marshal(&self) -> DomainResult<Vec<u8>> {
        marshal_json(&self.data)
    }

    async fn load(&self, batch: &Batch, then: Then) {
        for job in batch.jobs() {
            // CRM 接口接收带上下文的线上载荷，校验路径相对于该载荷
            let request = job.to_wire().and_then(|body| decode_payload::<User>(&body));
            let outcome = match request.map(|wire| wire.data) {
                Ok(user) if self.authorized(&user.email) => {
                    tracing::info!(job_id = job.id(), email = %user.email, "user registered in crm");
                    Outcome::builder()
                        .jobs(vec![job.id().to_string()])
                        .on_succeeded(vec![notify(&user.email, "Successfully registered")])
                        .build()
                }
                Ok(user) => Outcome::builder()
                    .jobs(vec![job.id().to_string()])
                    .error(
                        DeliveryError::builder()
                            .status_code(401)
                            .message("Not authorized")
                            .validations(vec![Validation::new(
                                "Email address not authorized",
                                ["request", "payload", "data", "email"],
                            )])
                            .build(),
                    )
                    .force_discard(true)
                    .on_discarded(vec![notify(&user.email, "Failed to register")])
                    .build(),
                Err(err) => Outcome::builder()
                    .jobs(vec![job.id().to_string()])
                    .error(DeliveryError::new(400, err.to_string()))
                    .force_discard(true)
                    .build(),
            };

            if then.send(outcome).is_err() {
                tracing::warn!(batch_id = batch.id(), "collector gone, stop reporting");
                return;
            }
        }
    }
}

fn notify(email: &str, message: &str) -> Arc<dyn Action> {
    Arc::new(Notify::new(Notification {
        email: email.to_string(),
        message: message.to_string(),
    }))
}

/// 向用户发送通知
#[derive(Clone, Default)]
pub struct Notify {
    pub data: Notification,
    outbox: Arc<Mutex<Vec<Notification>>>,
}

impl Notify {
    pub fn new(data: Notification) -> Self {
        Self {
            data,
            outbox: Arc::default(),
        }
    }
}

#[async_trait]
impl Action for Notify {
    fn identity(&self) -> &str {
        "notify"
    }

    fn schedule(&self) -> Option<ScheduleOverride> {
        Some(ScheduleOverride::default().realtime(false))
    }

    fn marshal(&self) -> DomainResult<Vec<u8>> {
        marshal_json(&self.data)
    }

    async fn load(&self, batch: &Batch, then: Then) {
        let outcome = match batch.data::<Notification>() {
            Ok(notifications) => {
                tracing::info!(
                    batch_id = batch.id(),
                    count = notifications.len(),
                    ?notifications,
                    "notifications sent"
                );
                locked(&self.outbox).extend(notifications);
                Outcome::succeeded()
            }
            Err(err) => Outcome::builder()
                .error(DeliveryError::new(400, err.to_string()))
                .force_discard(true)
                .build(),
        };
        let _ = then.send(outcome);
    }
}
