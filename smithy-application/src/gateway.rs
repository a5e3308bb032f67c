//! 摄取网关（Gateway）
//!
//! 按触发器模式运行触发器并摄取载荷：
//! - HTTP：每个请求调用一次 `extract`，错误原样返回给调用方；
//! - 定时：每个触发器一个任务，按解析后的间隔 tick；编码错误记录后跳过本次 tick；
//! - CDC：每个触发器一个任务，监督其通知通道，关停时等待确认直到超时。
//!
//! 摄取 = 创建事件 → 扇出 → 写入事件记录 → 任务入队（实时车道发布通知）。
//!
use crate::error::{AppError, AppResult};
use crate::registry::{RegisteredTrigger, Registry};
use bon::Builder;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use smithy_domain::delivery::{PubSub, enqueue};
use smithy_domain::error::DomainError;
use smithy_domain::event::{Event, Payload};
use smithy_domain::flow::fan_out;
use smithy_domain::persist::Store;
use smithy_domain::schedule::{Interval, Schedule};
use smithy_domain::time::{Clock, SystemClock};
use smithy_domain::trigger::{self, CdcTrigger, Mode, Request, Trigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Builder)]
pub struct Gateway {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    pubsub: Arc<dyn PubSub>,
    #[builder(default = system_clock())]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: GatewayConfig,
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// 一次成功摄取的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingested {
    pub event_id: String,
    pub jobs: Vec<String>,
}

impl Gateway {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 处理一个入站 HTTP 请求
    pub async fn handle(&self, request: &Request) -> AppResult<Ingested> {
        let registered = self.registry.route(request.method(), request.path())?;
        let Trigger::Http(t) = &registered.trigger else {
            return Err(mode_mismatch(&registered, Mode::Http));
        };

        let payload = match t.extract(request).await {
            Ok(payload) => payload,
            Err(err) => {
                let diagnostics = t.route().diagnostics(request);
                tracing::debug!(
                    source = %registered.source,
                    trigger = t.name(),
                    error = %err,
                    ?diagnostics,
                    "request rejected"
                );
                return Err(err.into());
            }
        };

        // 网络来源由入站边界负责
        let payload = payload.with_origin(request.remote_addr());
        self.ingest(&registered.source, t.name(), payload).await
    }

    /// 手动执行一次定时触发器
    ///
    /// `Ok(None)` 表示本次 tick 没有事件。
    pub async fn tick(&self, source: &str, trigger: &str) -> AppResult<Option<Ingested>> {
        let registered = self.registry.trigger(source, trigger)?;
        let Trigger::Cron(t) = &registered.trigger else {
            return Err(mode_mismatch(&registered, Mode::Cron));
        };

        match t.extract().await? {
            Some(payload) => Ok(Some(self.ingest(source, trigger, payload).await?)),
            None => {
                tracing::debug!(source, trigger, "empty tick");
                Ok(None)
            }
        }
    }

    /// 摄取一个载荷：创建事件、扇出、写入并入队
    ///
    /// 扇出失败（编码错误或未知目的地）时事件与任务都不会写入。
    pub async fn ingest(&self, source: &str, trigger: &str, payload: Payload) -> AppResult<Ingested> {
        let now = self.clock.now();
        let event = Event::new(source, trigger, payload, now);
        let jobs = fan_out(&event, self.registry.destinations(), now)?;
        let job_ids: Vec<String> = jobs.iter().map(|j| j.id().to_string()).collect();

        self.store.insert_event(event.record()).await?;
        enqueue(
            self.store.as_ref(),
            self.pubsub.as_ref(),
            self.registry.destinations(),
            jobs,
        )
        .await?;

        tracing::info!(
            source,
            trigger,
            event_id = event.id(),
            jobs = job_ids.len(),
            "event ingested"
        );
        Ok(Ingested {
            event_id: event.id().to_string(),
            jobs: job_ids,
        })
    }

    /// 启动定时与 CDC 触发器
    pub fn start(self: Arc<Self>) -> GatewayHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut continuous: Vec<Continuous> = Vec::new();

        for registered in self.registry.triggers() {
            match &registered.trigger {
                Trigger::Http(_) => {}
                Trigger::Cron(_) => {
                    let schedule = registered.schedule(&self.config.default_schedule);
                    tracing::info!(
                        source = %registered.source,
                        trigger = registered.name(),
                        interval = %schedule.interval,
                        "cron trigger started"
                    );
                    tasks.push(Self::spawn_cron(
                        self.clone(),
                        token.clone(),
                        registered.source.clone(),
                        registered.name().to_string(),
                        schedule.interval,
                    ));
                }
                Trigger::Cdc(t) => {
                    tracing::info!(source = %registered.source, trigger = t.name(), "cdc trigger started");
                    continuous.push(self.clone().spawn_cdc(&registered.source, t.clone()));
                }
            }
        }

        GatewayHandle {
            token,
            tasks,
            continuous,
            shutdown_timeout: self.config.shutdown_timeout,
        }
    }

    fn spawn_cron(
        self: Arc<Self>,
        token: CancellationToken,
        source: String,
        trigger: String,
        interval: Interval,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            match &interval {
                Interval::Every(period) => {
                    let period = (*period).max(MIN_PERIOD);
                    // 首次 tick 在一个周期之后
                    let mut ticker = time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => self.tick_logged(&source, &trigger).await,
                        }
                    }
                }
                Interval::Cron { .. } => loop {
                    let Some(wait) = interval.wait_from(self.clock.now()) else {
                        tracing::warn!(%source, %trigger, %interval, "cron has no upcoming fire time");
                        break;
                    };

                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(wait) => self.tick_logged(&source, &trigger).await,
                    }
                },
            }
        })
    }

    async fn tick_logged(&self, source: &str, trigger: &str) {
        if let Err(err) = self.tick(source, trigger).await {
            tracing::warn!(source, trigger, error = %err, "tick skipped");
        }
    }

    fn spawn_cdc(self: Arc<Self>, source: &str, t: Arc<dyn CdcTrigger>) -> Continuous {
        let (notifier, supervision) = trigger::notifier(self.config.cdc_buffer.max(1));
        let name = t.name().to_string();

        let extract = tokio::spawn(async move { t.extract(notifier).await });
        let supervise = tokio::spawn(Self::supervise(
            self,
            source.to_string(),
            name.clone(),
            supervision.payloads,
            supervision.errors,
        ));

        Continuous {
            name,
            shutdown: supervision.shutdown,
            done: supervision.done,
            extract,
            supervise,
        }
    }

    /// 监督 CDC 通道，直到触发器释放通知端
    async fn supervise(
        self: Arc<Self>,
        source: String,
        trigger: String,
        mut payloads: mpsc::Receiver<Payload>,
        mut errors: mpsc::Receiver<DomainError>,
    ) {
        loop {
            tokio::select! {
                Some(payload) = payloads.recv() => {
                    if let Err(err) = self.ingest(&source, &trigger, payload).await {
                        tracing::warn!(%source, %trigger, error = %err, "cdc payload dropped");
                    }
                }
                Some(err) = errors.recv() => {
                    tracing::warn!(%source, %trigger, error = %err, "cdc trigger reported error");
                }
                else => break,
            }
        }
    }
}

fn mode_mismatch(registered: &RegisteredTrigger, expected: Mode) -> AppError {
    AppError::ModeMismatch {
        trigger: format!("{}/{}", registered.source, registered.name()),
        expected,
        found: registered.trigger.mode(),
    }
}

/// 网关配置
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// 关停时等待每个 CDC 触发器确认的最长时间
    pub shutdown_timeout: Duration,
    /// 来源与触发器都未指定时的定时调度
    pub default_schedule: Schedule,
    /// CDC 通知通道容量
    pub cdc_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
            default_schedule: Schedule::default(),
            cdc_buffer: 64,
        }
    }
}

struct Continuous {
    name: String,
    shutdown: CancellationToken,
    done: oneshot::Receiver<()>,
    extract: JoinHandle<()>,
    supervise: JoinHandle<()>,
}

/// 网关运行句柄
pub struct GatewayHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    continuous: Vec<Continuous>,
    shutdown_timeout: Duration,
}

impl GatewayHandle {
    /// 停止定时触发器，通知 CDC 触发器关停并等待确认
    ///
    /// 所有 CDC 触发器同时收到关停信号并共享同一个超时；
    /// 任一触发器未在超时内确认时返回第一个 `CancellationTimeout`，其余触发器照常关停。
    pub async fn shutdown(mut self) -> AppResult<()> {
        self.token.cancel();
        for t in std::mem::take(&mut self.tasks) {
            let _ = t.await;
        }

        let continuous = std::mem::take(&mut self.continuous);
        for run in &continuous {
            run.shutdown.cancel();
        }

        let waited = self.shutdown_timeout;
        let deadline = Instant::now() + waited;
        let acks = continuous.into_iter().map(|run| async move {
            match time::timeout_at(deadline, run.done).await {
                Ok(Ok(())) => {
                    tracing::info!(trigger = %run.name, "cdc trigger acknowledged shutdown");
                    let _ = run.supervise.await;
                    let _ = run.extract.await;
                    None
                }
                Ok(Err(_)) => {
                    tracing::warn!(trigger = %run.name, "cdc trigger stopped without acknowledging");
                    let _ = run.supervise.await;
                    let _ = run.extract.await;
                    None
                }
                Err(_) => {
                    tracing::error!(trigger = %run.name, ?waited, "cdc trigger did not acknowledge shutdown");
                    run.extract.abort();
                    run.supervise.abort();
                    Some(AppError::Domain(DomainError::CancellationTimeout {
                        trigger: run.name,
                        waited,
                    }))
                }
            }
        });
        let first_err = join_all(acks).await.into_iter().flatten().next();

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.token.cancel();
        for run in &self.continuous {
            run.shutdown.cancel();
        }
    }
}
