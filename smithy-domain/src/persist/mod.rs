//! 持久化（persist）
//!
//! 定义事件与任务存储的协议 `Store`：
//! - 写入事件记录与扇出得到的任务；
//! - 按（目的地, 动作）拉取到期任务；
//! - 对单个任务原子地应用裁决（`transition`）。
//!
//! 该模块只定义协议，具体存储后端由上层注入；`inmemory` 特性提供内存实现。
//!
mod store;
#[cfg(feature = "inmemory")]
mod store_inmemory;

pub use store::Store;
#[cfg(feature = "inmemory")]
pub use store_inmemory::InMemoryStore;
