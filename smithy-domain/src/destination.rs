//! 目的地（Destination）
//!
//! 一个目的地是一组动作的集合，提供目的地级默认调度；
//! 动作可按字段覆盖该默认值。`Destinations` 是启动时确定的查找表。
//!
use crate::action::Action;
use crate::error::{DomainError, DomainResult};
use crate::schedule::Schedule;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 目的地公共选项（被其下所有动作共享，除非被覆盖）
#[derive(Debug, Clone, Default)]
pub struct DestinationOptions {
    pub default_schedule: Schedule,
}

pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    fn options(&self) -> DestinationOptions;

    /// 动作标识 -> 动作实现；查找表以 `Action::identity` 为准
    fn actions(&self) -> BTreeMap<String, Arc<dyn Action>>;
}

/// 已注册的单个动作及其解析后的调度
#[derive(Clone)]
pub struct RegisteredAction {
    pub destination: String,
    pub action: Arc<dyn Action>,
    pub schedule: Schedule,
}

/// 启动时固定的目的地/动作查找表
#[derive(Clone, Default)]
pub struct Destinations {
    by_name: BTreeMap<String, Arc<dyn Destination>>,
    actions: BTreeMap<(String, String), RegisteredAction>,
}

impl Destinations {
    pub fn new(destinations: Vec<Arc<dyn Destination>>) -> Self {
        let mut by_name = BTreeMap::new();
        let mut actions = BTreeMap::new();

        for d in destinations {
            let name = d.name().to_string();
            let default = d.options().default_schedule;

            for (key, action) in d.actions() {
                let identity = action.identity().to_string();
                if key != identity {
                    tracing::warn!(destination = %name, %key, %identity, "action registered under its identity instead of map key");
                }
                let schedule = action.resolve_schedule(&default);
                let replaced = actions.insert(
                    (name.clone(), identity.clone()),
                    RegisteredAction {
                        destination: name.clone(),
                        action,
                        schedule,
                    },
                );
                if replaced.is_some() {
                    tracing::warn!(destination = %name, %identity, "duplicate action identity, last one wins");
                }
            }

            by_name.insert(name, d);
        }

        Self { by_name, actions }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// 查找目的地下的动作
    pub fn action(&self, destination: &str, identity: &str) -> DomainResult<&RegisteredAction> {
        if !self.by_name.contains_key(destination) {
            return Err(DomainError::not_found(format!("destination {destination}")));
        }
        self.actions
            .get(&(destination.to_string(), identity.to_string()))
            .ok_or_else(|| DomainError::not_found(format!("action {destination}/{identity}")))
    }

    /// 全部（目的地, 动作）组合，按名称排序
    pub fn registered(&self) -> impl Iterator<Item = &RegisteredAction> {
        self.actions.values()
    }
}
