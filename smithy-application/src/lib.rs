//! 摄取层（smithy-application）
//!
//! 负责把外部信号变成已落库的事件与待投递任务：
//! - `Registry`：启动时注册的来源、触发器与路由查找表；
//! - `Gateway`：按触发器模式运行触发器（HTTP 请求、定时 tick、CDC 长驻），
//!   摄取载荷、扇出并入队；
//! - `GatewayHandle`：关停定时触发器并等待 CDC 触发器确认。
//!
pub mod error;
pub mod gateway;
pub mod registry;

pub use error::{AppError, AppResult};
pub use gateway::{Gateway, GatewayConfig, GatewayHandle, Ingested};
pub use registry::{RegisteredTrigger, Registry};
