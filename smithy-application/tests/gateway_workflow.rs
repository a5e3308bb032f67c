use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smithy_application::{AppError, Gateway, GatewayConfig, Registry};
use smithy_domain::action::{Action, Then, marshal_json};
use smithy_domain::delivery::{Batch, DeliveryEngine, EngineConfig, InMemoryPubSub};
use smithy_domain::destination::{Destination, DestinationOptions, Destinations};
use smithy_domain::error::{DomainError, DomainResult};
use smithy_domain::event::{Context, Event, Payload, decode_payload};
use smithy_domain::flow::{Actions, Flow};
use smithy_domain::job::JobStatus;
use smithy_domain::outcome::Outcome;
use smithy_domain::persist::{InMemoryStore, Store};
use smithy_domain::schedule::{Schedule, ScheduleOverride, interval};
use smithy_domain::source::{Source, SourceOptions};
use smithy_domain::trigger::{
    CdcTrigger, CronTrigger, HttpTrigger, Notifier, Request, Route, Trigger,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Serialize, Deserialize)]
struct Signup {
    email: String,
}

// --- 目的地 ---

#[derive(Clone, Default)]
struct Welcome {
    email: String,
    welcomed: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

#[async_trait]
impl Action for Welcome {
    fn identity(&self) -> &str {
        "welcome"
    }
    fn marshal(&self) -> DomainResult<Vec<u8>> {
        marshal_json(&Signup {
            email: self.email.clone(),
        })
    }
    async fn load(&self, batch: &Batch, then: Then) {
        for job in batch.jobs() {
            if let Ok(data) = job.data::<Signup>() {
                let locale = job.context().locale().map(str::to_string);
                self.welcomed.lock().unwrap().push((data.email, locale));
            }
        }
        let _ = then.send(Outcome::succeeded());
    }
}

struct Crm {
    welcome: Welcome,
}

impl Destination for Crm {
    fn name(&self) -> &str {
        "crm"
    }
    fn options(&self) -> DestinationOptions {
        DestinationOptions {
            default_schedule: Schedule {
                realtime: true,
                interval: interval("@every 1h").unwrap(),
                max_retries: 5,
            },
        }
    }
    fn actions(&self) -> BTreeMap<String, Arc<dyn Action>> {
        BTreeMap::from([(
            "welcome".to_string(),
            Arc::new(self.welcome.clone()) as Arc<dyn Action>,
        )])
    }
}

// --- 流 ---

struct OnSignup;

impl Flow for OnSignup {
    fn name(&self) -> &str {
        "on-signup"
    }
    fn transform(&self, event: &Event) -> Actions {
        let email = event.data()["email"].as_str().unwrap_or_default();
        BTreeMap::from([(
            "crm".to_string(),
            vec![Arc::new(Welcome {
                email: email.to_string(),
                ..Default::default()
            }) as Arc<dyn Action>],
        )])
    }
}

fn signup(email: &str) -> Payload {
    Payload::builder()
        .context(Context::builder().locale("en-US").build())
        .data(serde_json::json!({ "email": email }))
        .flows(vec![Arc::new(OnSignup) as Arc<dyn Flow>])
        .build()
}

// --- 触发器 ---

struct SignupHook;

#[async_trait]
impl HttpTrigger for SignupHook {
    fn name(&self) -> &str {
        "signup"
    }
    fn route(&self) -> Route {
        Route {
            methods: vec!["POST".into()],
            path: "/signup".into(),
            show_meta: true,
            show_data: false,
        }
    }
    async fn extract(&self, request: &Request) -> DomainResult<Payload> {
        let wire = decode_payload::<Signup>(request.body())?;
        Payload::from_wire(wire, vec![Arc::new(OnSignup) as Arc<dyn Flow>])
    }
}

#[derive(Default)]
struct Nightly {
    ticks: AtomicUsize,
}

#[async_trait]
impl CronTrigger for Nightly {
    fn name(&self) -> &str {
        "nightly"
    }
    fn schedule(&self) -> Option<ScheduleOverride> {
        Some(ScheduleOverride::default().interval(interval("@every 20ms").unwrap()))
    }
    async fn extract(&self) -> DomainResult<Option<Payload>> {
        // 只有第一次 tick 有事件
        if self.ticks.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Some(signup("cron@example.com")))
        } else {
            Ok(None)
        }
    }
}

/// 第一次 tick 编码失败，之后产出一个事件
#[derive(Default)]
struct Flaky {
    ticks: AtomicUsize,
}

#[async_trait]
impl CronTrigger for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn schedule(&self) -> Option<ScheduleOverride> {
        Some(ScheduleOverride::default().interval(interval("@every 20ms").unwrap()))
    }
    async fn extract(&self) -> DomainResult<Option<Payload>> {
        match self.ticks.fetch_add(1, Ordering::SeqCst) {
            0 => Err(DomainError::encoding("expected value at line 1 column 1")),
            1 => Ok(Some(signup("retry@example.com"))),
            _ => Ok(None),
        }
    }
}

#[derive(Default)]
struct Feed {
    name: &'static str,
    stubborn: bool,
    acknowledged: AtomicBool,
    stopping_seen_at: Mutex<Option<Instant>>,
}

#[async_trait]
impl CdcTrigger for Feed {
    fn name(&self) -> &str {
        self.name
    }
    async fn extract(&self, notifier: Notifier) {
        let _ = notifier.emit(signup("cdc@example.com")).await;
        if self.stubborn {
            std::future::pending::<()>().await;
        }
        notifier.shutting_down().await;
        *self.stopping_seen_at.lock().unwrap() = Some(Instant::now());
        self.acknowledged.store(true, Ordering::SeqCst);
        notifier.acknowledge();
    }
}

struct Users {
    nightly: Arc<Nightly>,
    feed: Arc<Feed>,
}

impl Source for Users {
    fn name(&self) -> &str {
        "users"
    }
    fn options(&self) -> SourceOptions {
        SourceOptions {
            default_schedule: ScheduleOverride::default()
                .interval(interval("@every 30m").unwrap()),
        }
    }
    fn triggers(&self) -> BTreeMap<String, Trigger> {
        BTreeMap::from([
            ("signup".to_string(), Trigger::Http(Arc::new(SignupHook))),
            (
                "nightly".to_string(),
                Trigger::Cron(self.nightly.clone() as Arc<dyn CronTrigger>),
            ),
            (
                "feed".to_string(),
                Trigger::Cdc(self.feed.clone() as Arc<dyn CdcTrigger>),
            ),
        ])
    }
}

/// 只有给定触发器的来源
struct Only {
    name: &'static str,
    triggers: Vec<(&'static str, Trigger)>,
}

impl Source for Only {
    fn name(&self) -> &str {
        self.name
    }
    fn options(&self) -> SourceOptions {
        SourceOptions::default()
    }
    fn triggers(&self) -> BTreeMap<String, Trigger> {
        self.triggers
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect()
    }
}

// --- 装配 ---

/// 不带投递引擎的网关
fn gateway_for(source: Only, shutdown_timeout: Duration) -> AnyResult<(Arc<InMemoryStore>, Arc<Gateway>)> {
    let store = Arc::new(InMemoryStore::new());
    let destinations = Destinations::new(vec![Arc::new(Crm {
        welcome: Welcome::default(),
    })]);
    let registry = Arc::new(Registry::new(destinations));
    registry.register_source(Arc::new(source))?;

    let gateway = Gateway::builder()
        .registry(registry)
        .store(store.clone())
        .pubsub(Arc::new(InMemoryPubSub::default()))
        .config(GatewayConfig {
            shutdown_timeout,
            ..GatewayConfig::default()
        })
        .build();
    Ok((store, Arc::new(gateway)))
}

struct Harness {
    store: Arc<InMemoryStore>,
    gateway: Arc<Gateway>,
    engine: Arc<DeliveryEngine>,
    welcomed: Arc<Mutex<Vec<(String, Option<String>)>>>,
    feed: Arc<Feed>,
}

fn harness(stubborn: bool) -> AnyResult<Harness> {
    let store = Arc::new(InMemoryStore::new());
    let pubsub = Arc::new(InMemoryPubSub::default());
    let welcome = Welcome::default();
    let welcomed = welcome.welcomed.clone();
    let destinations = Destinations::new(vec![Arc::new(Crm { welcome })]);

    let feed = Arc::new(Feed {
        name: "feed",
        stubborn,
        ..Default::default()
    });
    let registry = Arc::new(Registry::new(destinations.clone()));
    registry.register_source(Arc::new(Users {
        nightly: Arc::new(Nightly::default()),
        feed: feed.clone(),
    }))?;

    let gateway = Arc::new(
        Gateway::builder()
            .registry(registry)
            .store(store.clone())
            .pubsub(pubsub.clone())
            .config(GatewayConfig {
                shutdown_timeout: Duration::from_millis(200),
                ..GatewayConfig::default()
            })
            .build(),
    );
    let engine = Arc::new(
        DeliveryEngine::builder()
            .store(store.clone())
            .pubsub(pubsub)
            .destinations(destinations)
            .config(EngineConfig {
                realtime_debounce: Duration::from_millis(5),
                ..EngineConfig::default()
            })
            .build(),
    );

    Ok(Harness {
        store,
        gateway,
        engine,
        welcomed,
        feed,
    })
}

impl Harness {
    fn welcomed_emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = self
            .welcomed
            .lock()
            .unwrap()
            .iter()
            .map(|(e, _)| e.clone())
            .collect();
        emails.sort();
        emails
    }

    async fn wait_for(&self, emails: &[&str]) {
        let _ = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                let got = self.welcomed_emails();
                if emails.iter().all(|e| got.iter().any(|g| g == e)) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }
}

fn signup_request(body: serde_json::Value) -> Request {
    Request::builder()
        .method("POST")
        .path("/signup")
        .body(serde_json::to_vec(&body).unwrap())
        .build()
}

#[tokio::test(flavor = "multi_thread")]
async fn http_signup_is_delivered_in_realtime() -> AnyResult<()> {
    let h = harness(false)?;
    let engine = h.engine.clone().start().await;

    let ingested = h
        .gateway
        .handle(&signup_request(serde_json::json!({
            "context": {"locale": "en-US", "library": {"name": "smithy-js", "version": "1.0.0"}},
            "data": {"email": "jane@example.com"},
            "sent_at": "2024-01-01T00:00:00Z",
        })))
        .await?;
    assert_eq!(ingested.jobs.len(), 1);

    h.wait_for(&["jane@example.com"]).await;
    engine.shutdown();
    engine.join().await;

    let job = h
        .store
        .job(&ingested.jobs[0])
        .await?
        .ok_or_else(|| anyhow::anyhow!("job missing"))?;
    assert_eq!(job.status(), JobStatus::Succeeded);
    assert_eq!(
        h.welcomed.lock().unwrap().clone(),
        vec![("jane@example.com".to_string(), Some("en-US".to_string()))]
    );
    assert!(h.store.event(&ingested.event_id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn malformed_requests_are_returned_to_the_caller() -> AnyResult<()> {
    let h = harness(false)?;

    let err = h
        .gateway
        .handle(&signup_request(serde_json::json!({
            "context": {},
            "data": {"email": "jane@example.com"},
            "sent_at": "2024-01-01T00:00:00Z",
            "extra": true,
        })))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::Encoding { .. })));
    assert_eq!(err.status_code(), 400);
    assert!(h.store.all_jobs().is_empty());

    let wrong_method = Request::builder().method("GET").path("/signup").build();
    assert!(matches!(
        h.gateway.handle(&wrong_method).await,
        Err(AppError::MethodNotAllowed { .. })
    ));

    assert!(matches!(
        h.gateway.tick("users", "signup").await,
        Err(AppError::ModeMismatch { .. })
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn background_triggers_ingest_and_acknowledge_shutdown() -> AnyResult<()> {
    let h = harness(false)?;
    let engine = h.engine.clone().start().await;
    let gateway = h.gateway.clone().start();

    h.wait_for(&["cdc@example.com", "cron@example.com"]).await;
    gateway.shutdown().await?;
    engine.shutdown();
    engine.join().await;

    assert!(h.feed.acknowledged.load(Ordering::SeqCst));
    assert_eq!(
        h.welcomed_emails(),
        vec!["cdc@example.com".to_string(), "cron@example.com".to_string()]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unacknowledged_cdc_trigger_times_out() -> AnyResult<()> {
    let h = harness(true)?;
    let gateway = h.gateway.clone().start();

    // 等 CDC 载荷落库后再关停
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while h.store.all_jobs().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let err = gateway.shutdown().await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Domain(DomainError::CancellationTimeout { .. })
    ));
    assert!(!h.feed.acknowledged.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stubborn_cdc_trigger_does_not_hold_back_the_others() -> AnyResult<()> {
    let stubborn = Arc::new(Feed {
        name: "a-stubborn",
        stubborn: true,
        ..Default::default()
    });
    let polite = Arc::new(Feed {
        name: "b-polite",
        ..Default::default()
    });
    let (store, gateway) = gateway_for(
        Only {
            name: "feeds",
            triggers: vec![
                ("a-stubborn", Trigger::Cdc(stubborn.clone() as Arc<dyn CdcTrigger>)),
                ("b-polite", Trigger::Cdc(polite.clone() as Arc<dyn CdcTrigger>)),
            ],
        },
        Duration::from_millis(500),
    )?;
    let handle = gateway.clone().start();

    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while store.all_jobs().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let started = Instant::now();
    let err = handle.shutdown().await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        AppError::Domain(DomainError::CancellationTimeout { trigger, .. }) => {
            assert_eq!(trigger, "a-stubborn")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(polite.acknowledged.load(Ordering::SeqCst));
    assert!(!stubborn.acknowledged.load(Ordering::SeqCst));

    // 礼貌的触发器立即收到关停信号，整体只等待一个超时
    let seen = polite.stopping_seen_at.lock().unwrap().expect("polite trigger saw shutdown");
    assert!(seen.duration_since(started) < Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(1000));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_cron_tick_is_skipped_and_trigger_keeps_running() -> AnyResult<()> {
    let flaky = Arc::new(Flaky::default());
    let (store, gateway) = gateway_for(
        Only {
            name: "users",
            triggers: vec![("flaky", Trigger::Cron(flaky.clone() as Arc<dyn CronTrigger>))],
        },
        Duration::from_millis(200),
    )?;
    let handle = gateway.clone().start();

    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while flaky.ticks.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.shutdown().await?;

    assert!(flaky.ticks.load(Ordering::SeqCst) >= 3);
    // 只有第二次 tick 的事件被摄取
    let jobs = store.all_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].data::<Signup>()?.email, "retry@example.com");
    Ok(())
}

#[tokio::test]
async fn request_origin_fills_missing_context_ip() -> AnyResult<()> {
    let h = harness(false)?;
    let origin: std::net::IpAddr = "203.0.113.9".parse()?;

    let anonymous = Request::builder()
        .method("POST")
        .path("/signup")
        .body(serde_json::to_vec(&serde_json::json!({
            "context": {"locale": "en-US"},
            "data": {"email": "jane@example.com"},
            "sent_at": "2024-01-01T00:00:00Z",
        }))?)
        .remote_addr(origin)
        .build();
    let ingested = h.gateway.handle(&anonymous).await?;
    let event = h
        .store
        .event(&ingested.event_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("event missing"))?;
    assert_eq!(event.context.ip(), Some(origin));
    let job = h
        .store
        .job(&ingested.jobs[0])
        .await?
        .ok_or_else(|| anyhow::anyhow!("job missing"))?;
    assert_eq!(job.context().ip(), Some(origin));

    // 载荷自带的来源优先
    let declared = Request::builder()
        .method("POST")
        .path("/signup")
        .body(serde_json::to_vec(&serde_json::json!({
            "context": {"ip": "192.0.2.1"},
            "data": {"email": "john@example.com"},
            "sent_at": "2024-01-01T00:00:00Z",
        }))?)
        .remote_addr(origin)
        .build();
    let ingested = h.gateway.handle(&declared).await?;
    let event = h
        .store
        .event(&ingested.event_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("event missing"))?;
    assert_eq!(event.context.ip(), "192.0.2.1".parse().ok());
    Ok(())
}
