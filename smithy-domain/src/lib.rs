//! ETL 事件投递核心（smithy-domain）
//!
//! 提供事件从“摄取”到“投递结果落定”的核心抽象与状态机：
//! - 触发器（`trigger`）：HTTP 请求、定时（CRON）与持续监听（CDC）三种模式；
//! - 事件（`event`）：共享上下文 `Context`、线上载荷与不可变的 `Event`；
//! - 流（`flow`）：事件到各目的地动作列表的纯函数扇出；
//! - 动作（`action`）：标识、调度覆盖、序列化（marshal）与加载（load）；
//! - 结果裁决（`resolver`）：根据 `Outcome` 推进任务状态、重试、丢弃与链式动作；
//! - 持久化与广播协议（`persist`、`delivery::pubsub`）及投递引擎（`delivery`）。
//!
//! 存储与消息中间件只以 trait 形式出现，`inmemory` 特性提供内存实现，
//! 便于在测试与本地开发中完整运行整条链路。
//!
//! 典型用法：
//! 1. 实现 `Source`/`Destination`，在其中注册触发器与动作；
//! 2. 在触发器中返回携带 `Flow` 的 `Payload`；
//! 3. 使用 `delivery::DeliveryEngine` 周期性（或实时）批量投递任务；
//! 4. 在 `Action::load` 中通过 `Then` 回报 `Outcome`，由 `OutcomeResolver` 落定状态。
//!
pub mod action;
pub mod delivery;
pub mod destination;
pub mod error;
pub mod event;
pub mod flow;
pub mod job;
pub mod outcome;
pub mod persist;
pub mod resolver;
pub mod schedule;
pub mod source;
pub mod time;
pub mod trigger;
