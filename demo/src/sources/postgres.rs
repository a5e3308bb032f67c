//! `postgres` 来源：一个定时触发器与一个持续监听触发器
use async_trait::async_trait;
use smithy_domain::error::DomainResult;
use smithy_domain::event::Payload;
use smithy_domain::schedule::{Interval, ScheduleOverride};
use smithy_domain::source::{Source, SourceOptions};
use smithy_domain::trigger::{CdcTrigger, CronTrigger, Notifier, Trigger};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Postgres;

impl Source for Postgres {
    fn name(&self) -> &str {
        "postgres"
    }

    fn options(&self) -> SourceOptions {
        SourceOptions {
            default_schedule: every(Duration::from_secs(30 * 60)),
        }
    }

    fn triggers(&self) -> BTreeMap<String, Trigger> {
        BTreeMap::from([
            ("dummy-cron".to_string(), Trigger::Cron(Arc::new(DummyCron))),
            ("dummy-cdc".to_string(), Trigger::Cdc(Arc::new(DummyCdc))),
        ])
    }
}

fn every(period: Duration) -> ScheduleOverride {
    ScheduleOverride::default().interval(Interval::every(period))
}

/// 每分钟轮询一次，目前没有数据
pub struct DummyCron;

#[async_trait]
impl CronTrigger for DummyCron {
    fn name(&self) -> &str {
        "dummy-cron"
    }

    fn schedule(&self) -> Option<ScheduleOverride> {
        Some(every(Duration::from_secs(60)))
    }

    async fn extract(&self) -> DomainResult<Option<Payload>> {
        Ok(None)
    }
}

/// 只等待关停并确认
pub struct DummyCdc;

#[async_trait]
impl CdcTrigger for DummyCdc {
    fn name(&self) -> &str {
        "dummy-cdc"
    }

    async fn extract(&self, notifier: Notifier) {
        notifier.shutting_down().await;
        tracing::debug!("dummy-cdc releasing replication slot");
        notifier.acknowledge();
    }
}
