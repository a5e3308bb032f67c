//! smithy 示例应用
//!
//! - 来源：`api`（HTTP `POST /register`）、`postgres`（定时 `dummy-cron` 与持续监听 `dummy-cdc`）；
//! - 流：`OnRegister` 把注册事件扇出到 `crm/register` 与 `postgres/register`；
//! - 目的地：`crm`（注册后通过 `notify` 链式通知）与 `postgres`。
//!
pub mod destinations;
pub mod flows;
pub mod sources;

use destinations::crm::{Crm, Notification};
use destinations::postgres::{self as pg, Postgres};
use smithy_application::{AppResult, Gateway, GatewayConfig, Registry};
use smithy_domain::delivery::{DeliveryEngine, EngineConfig, InMemoryPubSub};
use smithy_domain::destination::{Destination, Destinations};
use smithy_domain::persist::InMemoryStore;
use std::sync::{Arc, Mutex};

/// 装配完成的应用
pub struct App {
    pub gateway: Arc<Gateway>,
    pub engine: Arc<DeliveryEngine>,
    pub store: Arc<InMemoryStore>,
    /// crm 发出的通知
    pub notifications: Arc<Mutex<Vec<Notification>>>,
    /// postgres 中写入的用户
    pub users: Arc<Mutex<Vec<pg::User>>>,
}

/// 使用内存存储与内存广播装配应用；`allowed_domains` 为 crm 接受注册的邮箱域名
pub fn build<I, S>(allowed_domains: I, engine: EngineConfig, gateway: GatewayConfig) -> AppResult<App>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let store = Arc::new(InMemoryStore::new());
    let pubsub = Arc::new(InMemoryPubSub::default());

    let crm = Crm::new(allowed_domains);
    let notifications = crm.outbox();
    let postgres = Postgres::default();
    let users = postgres.table();

    let destinations = Destinations::new(vec![
        Arc::new(crm) as Arc<dyn Destination>,
        Arc::new(postgres) as Arc<dyn Destination>,
    ]);

    let registry = Arc::new(Registry::new(destinations.clone()));
    registry.register_source(Arc::new(sources::api::Api))?;
    registry.register_source(Arc::new(sources::postgres::Postgres))?;

    let gateway = Arc::new(
        Gateway::builder()
            .registry(registry)
            .store(store.clone())
            .pubsub(pubsub.clone())
            .config(gateway)
            .build(),
    );
    let engine = Arc::new(
        DeliveryEngine::builder()
            .store(store.clone())
            .pubsub(pubsub)
            .destinations(destinations)
            .config(engine)
            .build(),
    );

    Ok(App {
        gateway,
        engine,
        store,
        notifications,
        users,
    })
}
