use bon::Builder;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// 共享上下文：在一次摄取派生出的所有事件、动作与任务之间共享
///
/// 创建后不可变，通过 `Arc<Context>` 在下游传递。
#[derive(Builder, Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// 网络来源
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<IpAddr>,
    /// 语言区域
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    locale: Option<String>,
    /// 时区
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    timezone: Option<String>,
    /// 发起请求的库
    #[serde(default, skip_serializing_if = "Option::is_none")]
    library: Option<Library>,
}

impl Context {
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// 未设置网络来源时使用 `ip`
    pub(crate) fn fill_ip(&mut self, ip: Option<IpAddr>) {
        if self.ip.is_none() {
            self.ip = ip;
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn library(&self) -> Option<&Library> {
        self.library.as_ref()
    }
}

/// 发起请求的库信息
#[derive(Builder, Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    version: Option<String>,
}

impl Library {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}
