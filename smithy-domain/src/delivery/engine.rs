//! 投递引擎（DeliveryEngine）
//!
//! 统一编排每个（目的地, 动作）车道的长驻任务：
//! - 按动作解析后的间隔周期拉取到期任务并批量投递（同时承担失败重试）；
//! - 订阅实时通知，对实时车道在短暂去抖后立即投递；
//! - 收集 `load` 回报的结果交给裁决器，停滞的批次中止 `load` 并记录；
//! - 链式动作作为新任务入队；
//! - 提供关闭与等待的 `EngineHandle`。
//!
//! 同一车道的投递通过车道锁串行，不同车道之间互不阻塞。
//!
use super::{Batch, BatchReport, JobNotice, PubSub, collect, enqueue};
use crate::action::Then;
use crate::destination::{Destinations, RegisteredAction};
use crate::error::{DomainError, DomainResult};
use crate::persist::Store;
use crate::resolver::{OutcomeResolver, Resolution};
use crate::schedule::Interval;
use crate::time::{Clock, SystemClock};
use bon::Builder;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::delivery_engine_builder::{IsUnset, SetLanes, State as BuilderState};

/// tokio 的 interval 不接受零周期
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Builder)]
pub struct DeliveryEngine {
    store: Arc<dyn Store>,
    pubsub: Arc<dyn PubSub>,
    #[builder(setters(vis = "pub(crate)"))]
    lanes: Lanes,
    #[builder(default = system_clock())]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: EngineConfig,
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

// 自定义 Builder 方法：接收目的地查找表，为每个已注册动作建立车道。
// 受 typestate 限制，只能调用一次。
impl<S: BuilderState> DeliveryEngineBuilder<S> {
    pub fn destinations(self, destinations: Destinations) -> DeliveryEngineBuilder<SetLanes<S>>
    where
        <S as BuilderState>::Lanes: IsUnset,
    {
        self.lanes(Lanes::new(destinations))
    }
}

impl DeliveryEngine {
    pub fn destinations(&self) -> &Destinations {
        &self.lanes.destinations
    }

    /// 启动投递引擎，返回可用于关闭/等待的句柄
    ///
    /// 返回前已完成实时通知的订阅，此后发布的通知不会丢失。
    pub async fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // 周期车道
        for registered in self.lanes.destinations.registered() {
            let engine = self.clone();
            let destination = registered.destination.clone();
            let action = registered.action.identity().to_string();
            let interval = registered.schedule.interval.clone();

            tracing::debug!(%destination, %action, %interval, realtime = registered.schedule.realtime, "lane scheduled");
            tasks.push(Self::spawn_periodic(
                token.clone(),
                interval,
                self.clock.clone(),
                move || {
                    let engine = engine.clone();
                    let destination = destination.clone();
                    let action = action.clone();
                    async move {
                        engine.flush_logged(&destination, &action).await;
                    }
                },
            ));
        }

        // 实时通知（长循环）
        let notices = self.pubsub.subscribe().await;
        tasks.push(tokio::spawn(Self::subscribe_loop(
            self.clone(),
            token.clone(),
            notices,
        )));

        tracing::info!(lanes = tasks.len() - 1, "delivery engine started");
        EngineHandle { token, tasks }
    }

    /// 立即投递一个车道的到期任务
    ///
    /// 满批时继续拉取下一批，直到不足一批或出现停滞批次。
    pub async fn flush(&self, destination: &str, action: &str) -> DomainResult<Vec<BatchReport>> {
        let registered = self.lanes.destinations.action(destination, action)?;
        let lock = self
            .lanes
            .lock(destination, action)
            .ok_or_else(|| DomainError::not_found(format!("lane {destination}/{action}")))?;
        let _guard = lock.lock().await;

        let batch_size = self.config.batch_size.max(1);
        let mut reports = Vec::new();

        loop {
            let now = self.clock.now();
            let jobs = self
                .store
                .due_jobs(destination, action, now, batch_size)
                .await?;
            if jobs.is_empty() {
                break;
            }

            let full = jobs.len() >= batch_size;
            let batch = Batch::new(destination, action, registered.schedule.clone(), jobs);
            let report = self.deliver(registered, batch).await?;
            let stalled = report.is_stalled();
            reports.push(report);

            if stalled || !full {
                break;
            }
        }

        Ok(reports)
    }

    async fn flush_logged(&self, destination: &str, action: &str) {
        match self.flush(destination, action).await {
            Ok(reports) if !reports.is_empty() => {
                tracing::debug!(destination, action, batches = reports.len(), "lane flushed");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(destination, action, error = %err, "lane flush failed");
            }
        }
    }

    async fn deliver(&self, registered: &RegisteredAction, batch: Batch) -> DomainResult<BatchReport> {
        let batch = Arc::new(batch);
        let (then, outcomes) = Then::channel();

        tracing::info!(
            destination = batch.destination(),
            action = batch.action(),
            batch_id = batch.id(),
            jobs = batch.len(),
            "delivering batch"
        );

        let load = {
            let action = registered.action.clone();
            let batch = batch.clone();
            tokio::spawn(async move { action.load(&batch, then).await })
        };

        let resolver = OutcomeResolver::new(self.store.clone(), self.clock.clone());
        let report = match collect(&resolver, &batch, outcomes, self.config.collect_timeout).await {
            Ok(report) => report,
            Err(interrupted) => {
                load.abort();
                // 出错前已生效的裁决仍需派发链式动作
                self.dispatch_chained(&interrupted.resolutions).await;
                return Err(interrupted.error);
            }
        };

        // 停滞时不再等待 load
        if report.is_stalled() {
            load.abort();
        }
        self.dispatch_chained(report.resolutions()).await;
        Ok(report)
    }

    /// 链式动作入队；单个链式动作失败不影响原任务的结果
    async fn dispatch_chained(&self, resolutions: &[Resolution]) {
        let now = self.clock.now();
        let mut jobs = Vec::new();

        for chained in resolutions.iter().flat_map(|r| r.chained.iter()) {
            let identity = chained.action.identity();
            if let Err(err) = self.lanes.destinations.action(&chained.destination, identity) {
                tracing::warn!(destination = %chained.destination, action = identity, error = %err, "chained action skipped");
                continue;
            }
            match chained.to_job(now) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(destination = %chained.destination, action = identity, error = %err, "chained action skipped");
                }
            }
        }

        if jobs.is_empty() {
            return;
        }

        match enqueue(
            self.store.as_ref(),
            self.pubsub.as_ref(),
            &self.lanes.destinations,
            jobs,
        )
        .await
        {
            Ok(count) => tracing::debug!(count, "chained actions enqueued"),
            Err(err) => tracing::warn!(error = %err, "enqueue chained actions failed"),
        }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Interval,
        clock: Arc<dyn Clock>,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            match &interval {
                Interval::Every(period) => {
                    let mut ticker = time::interval((*period).max(MIN_PERIOD));
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => f().await,
                        }
                    }
                }
                Interval::Cron { .. } => loop {
                    let Some(wait) = interval.wait_from(clock.now()) else {
                        tracing::warn!(%interval, "cron has no upcoming fire time");
                        break;
                    };

                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(wait) => f().await,
                    }
                },
            }
        })
    }

    async fn subscribe_loop(
        self: Arc<Self>,
        token: CancellationToken,
        mut notices: BoxStream<'static, DomainResult<JobNotice>>,
    ) {
        let mut inflight: JoinSet<JobNotice> = JoinSet::new();
        // 去抖窗口内或正在投递的车道；投递期间到达的通知记入 `again`，结束后再投递一次
        let mut scheduled: HashSet<JobNotice> = HashSet::new();
        let mut again: HashSet<JobNotice> = HashSet::new();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(done) = inflight.join_next(), if !inflight.is_empty() => {
                    let Ok(notice) = done else { continue };
                    scheduled.remove(&notice);
                    if again.remove(&notice) {
                        scheduled.insert(notice.clone());
                        self.spawn_realtime(&mut inflight, notice);
                    }
                }
                maybe_notice = notices.next() => {
                    match maybe_notice {
                        Some(Ok(notice)) => {
                            if scheduled.contains(&notice) {
                                again.insert(notice);
                                continue;
                            }
                            let realtime = self
                                .lanes
                                .destinations
                                .action(&notice.destination, &notice.action)
                                .is_ok_and(|r| r.schedule.realtime);
                            if !realtime {
                                tracing::debug!(destination = %notice.destination, action = %notice.action, "notice for non-realtime lane ignored");
                                continue;
                            }
                            scheduled.insert(notice.clone());
                            self.spawn_realtime(&mut inflight, notice);
                        }
                        Some(Err(err)) => {
                            // 丢失的通知由周期车道兜底
                            tracing::debug!(error = %err, "realtime notice lost");
                        }
                        None => break,
                    }
                }
            }
        }

        while inflight.join_next().await.is_some() {}
    }

    fn spawn_realtime(self: &Arc<Self>, inflight: &mut JoinSet<JobNotice>, notice: JobNotice) {
        let engine = self.clone();
        let debounce = self.config.realtime_debounce;
        inflight.spawn(async move {
            time::sleep(debounce).await;
            engine
                .flush_logged(&notice.destination, &notice.action)
                .await;
            notice
        });
    }
}

/// 车道：目的地查找表 + 每个（目的地, 动作）一把投递锁
struct Lanes {
    destinations: Destinations,
    locks: BTreeMap<(String, String), Arc<Mutex<()>>>,
}

impl Lanes {
    fn new(destinations: Destinations) -> Self {
        let locks = destinations
            .registered()
            .map(|r| {
                (
                    (r.destination.clone(), r.action.identity().to_string()),
                    Arc::new(Mutex::new(())),
                )
            })
            .collect();
        Self {
            destinations,
            locks,
        }
    }

    fn lock(&self, destination: &str, action: &str) -> Option<Arc<Mutex<()>>> {
        self.locks
            .get(&(destination.to_string(), action.to_string()))
            .cloned()
    }
}

/// 投递引擎配置
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// 单批次最多任务数
    pub batch_size: usize,
    /// 等待 `load` 回报结果的最长时间，超时后批次视为停滞
    pub collect_timeout: Duration,
    /// 实时通知的去抖时长，窗口内同一车道的通知合并为一次投递
    pub realtime_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            collect_timeout: Duration::from_secs(30),
            realtime_debounce: Duration::from_millis(100),
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
