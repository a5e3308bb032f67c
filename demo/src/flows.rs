use crate::destinations::{crm, postgres};
use crate::sources::api::User;
use smithy_domain::action::Action;
use smithy_domain::event::Event;
use smithy_domain::flow::{Actions, Flow};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 注册事件：姓氏统一大写，邮箱统一小写
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnRegister {
    pub username: String,
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl OnRegister {
    pub fn from_user(user: &User) -> Self {
        let last_name = user.last_name.to_uppercase();
        Self {
            username: user.username.clone(),
            full_name: format!("{} {}", user.first_name, last_name),
            first_name: user.first_name.clone(),
            last_name,
            email: user.email.to_lowercase(),
        }
    }
}

impl Flow for OnRegister {
    fn name(&self) -> &str {
        "on-register"
    }

    fn transform(&self, _event: &Event) -> Actions {
        BTreeMap::from([
            (
                "crm".to_string(),
                vec![Arc::new(crm::Register::new(crm::User {
                    full_name: self.full_name.clone(),
                    email: self.email.clone(),
                })) as Arc<dyn Action>],
            ),
            (
                "postgres".to_string(),
                vec![Arc::new(postgres::Register::new(postgres::User {
                    first_name: self.first_name.clone(),
                    last_name: self.last_name.clone(),
                    email: self.email.clone(),
                })) as Arc<dyn Action>],
            ),
        ])
    }
}
