//! 触发器（Trigger）
//!
//! 触发器是 ETL 中的 “E”：从外部信号提取载荷。三种互斥的模式：
//! - `Http`：每个入站请求同步调用一次，产出至多一个载荷或错误，错误原样返回给调用方；
//! - `Cron`：按自身解析出的间隔周期调用，每次产出至多一个载荷，空 tick 合法；
//! - `Cdc`：只调用一次并长驻运行，通过 `Notifier` 持续回报载荷与错误，
//!   收到关停信号后必须调用 `Notifier::acknowledge` 确认完成。
//!
//! CDC 触发器不确认关停会导致关停一直等待到超时（`CancellationTimeout`），
//! 这是触发器实现方需要满足的活性要求。
//!
use crate::error::{DomainError, DomainResult};
use crate::event::Payload;
use crate::schedule::ScheduleOverride;
use async_trait::async_trait;
use bon::Builder;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// HTTP 路由声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub methods: Vec<String>,
    pub path: String,
    /// 诊断信息中是否回显请求元信息
    pub show_meta: bool,
    /// 诊断信息中是否回显请求体
    pub show_data: bool,
}

impl Route {
    pub fn allows(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// 按路由声明收集请求的诊断信息
    pub fn diagnostics(&self, request: &Request) -> Diagnostics {
        let (headers, remote_addr) = if self.show_meta {
            (Some(request.headers().clone()), request.remote_addr())
        } else {
            (None, None)
        };
        let body = self
            .show_data
            .then(|| String::from_utf8_lossy(request.body()).into_owned());

        Diagnostics {
            method: request.method().to_string(),
            path: request.path().to_string(),
            headers,
            remote_addr,
            body,
        }
    }
}

/// 请求诊断信息；元信息与请求体只在路由声明允许时出现
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub method: String,
    pub path: String,
    pub headers: Option<BTreeMap<String, String>>,
    pub remote_addr: Option<IpAddr>,
    pub body: Option<String>,
}

/// 入站请求（由外部 HTTP 服务转换而来）
#[derive(Builder, Debug, Clone, Default)]
pub struct Request {
    #[builder(into)]
    method: String,
    #[builder(into)]
    path: String,
    #[builder(default)]
    headers: BTreeMap<String, String>,
    #[builder(default)]
    body: Vec<u8>,
    remote_addr: Option<IpAddr>,
}

impl Request {
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }
}

#[async_trait]
pub trait HttpTrigger: Send + Sync {
    fn name(&self) -> &str;

    fn route(&self) -> Route;

    async fn extract(&self, request: &Request) -> DomainResult<Payload>;
}

#[async_trait]
pub trait CronTrigger: Send + Sync {
    fn name(&self) -> &str;

    /// 覆盖来源的默认间隔
    fn schedule(&self) -> Option<ScheduleOverride> {
        None
    }

    /// `Ok(None)` 表示本次 tick 没有事件
    async fn extract(&self) -> DomainResult<Option<Payload>>;
}

#[async_trait]
pub trait CdcTrigger: Send + Sync {
    fn name(&self) -> &str;

    /// 长驻运行，直到收到关停信号并确认
    async fn extract(&self, notifier: Notifier);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Http,
    Cron,
    Cdc,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Http => "http",
            Mode::Cron => "cron",
            Mode::Cdc => "cdc",
        })
    }
}

/// 触发器的封闭枚举
#[derive(Clone)]
pub enum Trigger {
    Http(Arc<dyn HttpTrigger>),
    Cron(Arc<dyn CronTrigger>),
    Cdc(Arc<dyn CdcTrigger>),
}

impl Trigger {
    pub fn name(&self) -> &str {
        match self {
            Trigger::Http(t) => t.name(),
            Trigger::Cron(t) => t.name(),
            Trigger::Cdc(t) => t.name(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Trigger::Http(_) => Mode::Http,
            Trigger::Cron(_) => Mode::Cron,
            Trigger::Cdc(_) => Mode::Cdc,
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name())
            .field("mode", &self.mode())
            .finish()
    }
}

/// 创建一对 CDC 通知端：触发器持有 `Notifier`，监督方持有 `Supervision`
pub fn notifier(capacity: usize) -> (Notifier, Supervision) {
    let (payload_tx, payload_rx) = mpsc::channel(capacity);
    let (error_tx, error_rx) = mpsc::channel(capacity);
    let (done_tx, done_rx) = oneshot::channel();
    let shutdown = CancellationToken::new();

    (
        Notifier {
            payloads: payload_tx,
            errors: error_tx,
            shutdown: shutdown.clone(),
            done: done_tx,
        },
        Supervision {
            payloads: payload_rx,
            errors: error_rx,
            shutdown,
            done: done_rx,
        },
    )
}

/// 触发器侧：回报载荷与错误，监听关停并确认完成
///
/// `acknowledge` 会消费自身，因此确认只能发生一次，确认之后也无法再回报载荷。
#[derive(Debug)]
pub struct Notifier {
    payloads: mpsc::Sender<Payload>,
    errors: mpsc::Sender<DomainError>,
    shutdown: CancellationToken,
    done: oneshot::Sender<()>,
}

impl Notifier {
    pub async fn emit(&self, payload: Payload) -> DomainResult<()> {
        self.payloads
            .send(payload)
            .await
            .map_err(|_| DomainError::ChannelClosed {
                reason: "payload receiver dropped".into(),
            })
    }

    pub async fn error(&self, error: DomainError) -> DomainResult<()> {
        self.errors
            .send(error)
            .await
            .map_err(|_| DomainError::ChannelClosed {
                reason: "error receiver dropped".into(),
            })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 等待关停信号
    pub async fn shutting_down(&self) {
        self.shutdown.cancelled().await
    }

    /// 确认已完成关停
    pub fn acknowledge(self) {
        let _ = self.done.send(());
    }
}

/// 监督侧：接收载荷与错误，发出关停信号并等待确认
#[derive(Debug)]
pub struct Supervision {
    pub payloads: mpsc::Receiver<Payload>,
    pub errors: mpsc::Receiver<DomainError>,
    pub shutdown: CancellationToken,
    pub done: oneshot::Receiver<()>,
}

impl Supervision {
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }
}
