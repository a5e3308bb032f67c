use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use smithy_domain::destination::Destinations;
use smithy_domain::schedule::{Schedule, ScheduleOverride};
use smithy_domain::source::Source;
use smithy_domain::trigger::{Route, Trigger};
use std::sync::Arc;

/// 已注册的触发器及其所属来源的默认调度
#[derive(Clone, Debug)]
pub struct RegisteredTrigger {
    pub source: String,
    pub trigger: Trigger,
    pub source_schedule: ScheduleOverride,
}

impl RegisteredTrigger {
    pub fn name(&self) -> &str {
        self.trigger.name()
    }

    /// 解析定时间隔：触发器覆盖 > 来源默认 > `fallback`
    pub fn schedule(&self, fallback: &Schedule) -> Schedule {
        let trigger_override = match &self.trigger {
            Trigger::Cron(t) => t.schedule().unwrap_or_default(),
            _ => ScheduleOverride::default(),
        };
        Schedule::layered(fallback, [&self.source_schedule, &trigger_override])
    }
}

#[derive(Clone)]
struct RouteEntry {
    route: Route,
    source: String,
    trigger: String,
}

/// 来源/触发器/路由查找表
///
/// - 通过名称注册来源，同名来源或重复的路由路径会被拒绝；
/// - 目的地查找表在构造时固定。
pub struct Registry {
    destinations: Destinations,
    sources: DashMap<String, Arc<dyn Source>>,
    triggers: DashMap<(String, String), RegisteredTrigger>,
    routes: DashMap<String, RouteEntry>,
}

impl Registry {
    pub fn new(destinations: Destinations) -> Self {
        Self {
            destinations,
            sources: DashMap::new(),
            triggers: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    /// 注册来源及其全部触发器
    ///
    /// 同名来源的并发注册只有一个能成功；路由冲突时撤回本次已占用的路由。
    pub fn register_source(&self, source: Arc<dyn Source>) -> AppResult<()> {
        let name = source.name().to_string();
        // 持有来源条目直到注册完成
        let Entry::Vacant(slot) = self.sources.entry(name.clone()) else {
            return Err(AppError::AlreadyRegistered {
                kind: "source",
                name,
            });
        };

        let options = source.options();
        let triggers = source.triggers();

        let mut claimed: Vec<String> = Vec::new();
        for (trigger_name, trigger) in &triggers {
            let Trigger::Http(t) = trigger else {
                continue;
            };
            let route = t.route();
            let path = route.path.clone();
            let free = match self.routes.entry(path.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(v) => {
                    v.insert(RouteEntry {
                        route,
                        source: name.clone(),
                        trigger: trigger_name.clone(),
                    });
                    true
                }
            };

            if !free {
                for p in &claimed {
                    self.routes.remove(p);
                }
                return Err(AppError::AlreadyRegistered {
                    kind: "route",
                    name: path,
                });
            }
            claimed.push(path);
        }

        for (trigger_name, trigger) in triggers {
            tracing::debug!(source = %name, trigger = %trigger_name, mode = %trigger.mode(), "trigger registered");
            self.triggers.insert(
                (name.clone(), trigger_name),
                RegisteredTrigger {
                    source: name.clone(),
                    trigger,
                    source_schedule: options.default_schedule.clone(),
                },
            );
        }
        slot.insert(source);
        Ok(())
    }

    pub fn trigger(&self, source: &str, trigger: &str) -> AppResult<RegisteredTrigger> {
        self.triggers
            .get(&(source.to_string(), trigger.to_string()))
            .map(|t| t.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("trigger {source}/{trigger}")))
    }

    /// 全部触发器，按（来源, 名称）排序
    pub fn triggers(&self) -> Vec<RegisteredTrigger> {
        let mut all: Vec<RegisteredTrigger> =
            self.triggers.iter().map(|t| t.value().clone()).collect();
        all.sort_by(|a, b| (&a.source, a.name()).cmp(&(&b.source, b.name())));
        all
    }

    /// 匹配路由：路径不存在为 `NotFound`，方法不匹配为 `MethodNotAllowed`
    pub fn route(&self, method: &str, path: &str) -> AppResult<RegisteredTrigger> {
        let entry = self
            .routes
            .get(path)
            .map(|r| r.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("route {path}")))?;

        if !entry.route.allows(method) {
            return Err(AppError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        self.trigger(&entry.source, &entry.trigger)
    }

    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use smithy_domain::error::DomainResult;
    use smithy_domain::event::Payload;
    use smithy_domain::schedule::interval;
    use smithy_domain::source::SourceOptions;
    use smithy_domain::trigger::{CronTrigger, HttpTrigger, Request};
    use std::collections::BTreeMap;

    struct Register;

    #[async_trait]
    impl HttpTrigger for Register {
        fn name(&self) -> &str {
            "register"
        }
        fn route(&self) -> Route {
            Route {
                methods: vec!["POST".into()],
                path: "/register".into(),
                show_meta: true,
                show_data: false,
            }
        }
        async fn extract(&self, _request: &Request) -> DomainResult<Payload> {
            Ok(Payload::builder().build())
        }
    }

    struct Every(Option<&'static str>);

    #[async_trait]
    impl CronTrigger for Every {
        fn name(&self) -> &str {
            "tick"
        }
        fn schedule(&self) -> Option<ScheduleOverride> {
            self.0
                .map(|spec| ScheduleOverride::default().interval(interval(spec).unwrap()))
        }
        async fn extract(&self) -> DomainResult<Option<Payload>> {
            Ok(None)
        }
    }

    struct Api {
        name: &'static str,
        cron: Option<&'static str>,
    }

    impl Source for Api {
        fn name(&self) -> &str {
            self.name
        }
        fn options(&self) -> SourceOptions {
            SourceOptions {
                default_schedule: ScheduleOverride::default()
                    .interval(interval("@every 30m").unwrap()),
            }
        }
        fn triggers(&self) -> BTreeMap<String, Trigger> {
            BTreeMap::from([
                ("register".to_string(), Trigger::Http(Arc::new(Register))),
                ("tick".to_string(), Trigger::Cron(Arc::new(Every(self.cron)))),
            ])
        }
    }

    #[test]
    fn routes_resolve_by_path_then_method() {
        let registry = Registry::new(Destinations::default());
        registry
            .register_source(Arc::new(Api {
                name: "api",
                cron: None,
            }))
            .unwrap();

        let found = registry.route("POST", "/register").unwrap();
        assert_eq!(found.source, "api");
        assert_eq!(found.name(), "register");

        assert!(matches!(
            registry.route("GET", "/register"),
            Err(AppError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            registry.route("POST", "/unknown"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn duplicate_sources_and_routes_are_rejected() {
        let registry = Registry::new(Destinations::default());
        registry
            .register_source(Arc::new(Api {
                name: "api",
                cron: None,
            }))
            .unwrap();

        assert!(matches!(
            registry.register_source(Arc::new(Api {
                name: "api",
                cron: None
            })),
            Err(AppError::AlreadyRegistered { kind: "source", .. })
        ));
        assert!(matches!(
            registry.register_source(Arc::new(Api {
                name: "api-v2",
                cron: None
            })),
            Err(AppError::AlreadyRegistered { kind: "route", .. })
        ));
        // 校验失败时不留下半注册的触发器
        assert!(registry.trigger("api-v2", "tick").is_err());
        assert_eq!(registry.sources(), vec!["api".to_string()]);
    }

    #[test]
    fn concurrent_registration_of_one_source_admits_one() {
        let registry = Registry::new(Destinations::default());

        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        registry
                            .register_source(Arc::new(Api {
                                name: "api",
                                cron: None,
                            }))
                            .is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join())
                .filter(|joined| matches!(joined, Ok(true)))
                .count()
        });
        assert_eq!(admitted, 1);
        assert_eq!(registry.sources(), vec!["api".to_string()]);
        assert!(registry.route("POST", "/register").is_ok());
    }

    #[test]
    fn cron_interval_precedence() {
        let fallback = Schedule::default();
        let registry = Registry::new(Destinations::default());
        registry
            .register_source(Arc::new(Api {
                name: "api",
                cron: None,
            }))
            .unwrap();
        let inherited = registry.trigger("api", "tick").unwrap().schedule(&fallback);
        assert_eq!(inherited.interval, interval("@every 30m").unwrap());
        assert_eq!(inherited.max_retries, fallback.max_retries);

        let registry = Registry::new(Destinations::default());
        registry
            .register_source(Arc::new(Api {
                name: "api",
                cron: Some("@every 1m"),
            }))
            .unwrap();
        let overridden = registry.trigger("api", "tick").unwrap().schedule(&fallback);
        assert_eq!(overridden.interval, interval("@every 1m").unwrap());
    }
}
