use super::locked;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smithy_domain::action::{Action, Then, marshal_json};
use smithy_domain::delivery::Batch;
use smithy_domain::destination::{Destination, DestinationOptions};
use smithy_domain::error::DomainResult;
use smithy_domain::outcome::{DeliveryError, Outcome};
use smithy_domain::schedule::{Interval, Schedule, ScheduleOverride};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// `postgres` 目的地，默认每两小时批量写入
#[derive(Default)]
pub struct Postgres {
    table: Arc<Mutex<Vec<User>>>,
}

impl Postgres {
    /// 已写入的用户
    pub fn table(&self) -> Arc<Mutex<Vec<User>>> {
        self.table.clone()
    }
}

impl Destination for Postgres {
    fn name(&self) -> &str {
        "postgres"
    }

    fn options(&self) -> DestinationOptions {
        DestinationOptions {
            default_schedule: Schedule {
                realtime: false,
                interval: Interval::every(Duration::from_secs(2 * 60 * 60)),
                max_retries: 20,
            },
        }
    }

    fn actions(&self) -> BTreeMap<String, Arc<dyn Action>> {
        BTreeMap::from([(
            "register".to_string(),
            Arc::new(Register {
                table: self.table.clone(),
                ..Default::default()
            }) as Arc<dyn Action>,
        )])
    }
}

/// 写入用户表；实时投递，最多重试 3 次
#[derive(Clone, Default)]
pub struct Register {
    pub data: User,
    table: Arc<Mutex<Vec<User>>>,
}

impl Register {
    pub fn new(data: User) -> Self {
        Self {
            data,
            table: Arc::default(),
        }
    }
}

#[async_trait]
impl Action for Register {
    fn identity(&self) -> &str {
        "register"
    }

    fn schedule(&self) -> Option<ScheduleOverride> {
        Some(
            ScheduleOverride::default()
                .realtime(true)
                .interval(Interval::every(Duration::from_secs(60)))
                .max_retries(3),
        )
    }

    fn marshal(&self) -> DomainResult<Vec<u8>> {
        marshal_json(&self.data)
    }

    async fn load(&self, batch: &Batch, then: Then) {
        let outcome = match batch.data::<User>() {
            Ok(users) => {
                tracing::info!(batch_id = batch.id(), rows = users.len(), "users inserted");
                locked(&self.table).extend(users);
                Outcome::succeeded()
            }
            Err(err) => Outcome::failed(DeliveryError::new(400, err.to_string())),
        };
        let _ = then.send(outcome);
    }
}
