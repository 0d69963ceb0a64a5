//! 演示控制器
//!
//! 控制器通过 inventory 在编译时登记，启动时由 `Registry::from_inventory()` 收集。

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::{json, Value};
use waypoint_web::prelude::*;

use crate::models::{CreateUserRequest, User};

static USERS: Lazy<RwLock<Vec<User>>> = Lazy::new(|| {
    let joined = Utc::now().format("%Y-%m-%d").to_string();
    RwLock::new(vec![
        User {
            id: 1,
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            joined: joined.clone(),
        },
        User {
            id: 2,
            name: "Bob".to_string(),
            email: "bob@example.com".to_string(),
            joined,
        },
    ])
});

// ==================== 页面 ====================

pub struct PageController {
    greeting: String,
}

impl PageController {
    fn from_args(args: &[Value]) -> anyhow::Result<Self> {
        let greeting = match args.first() {
            None => "Hi".to_string(),
            Some(Value::String(greeting)) => greeting.clone(),
            Some(other) => anyhow::bail!("greeting must be a string, found {}", other),
        };
        Ok(Self { greeting })
    }

    fn hello(&self, exchange: &mut Exchange<'_>) -> WebResult<String> {
        let name = exchange.request.param("name").unwrap_or("stranger");
        Ok(format!("{}, {}!", self.greeting, name))
    }

    /// 会话中的访问计数
    fn visits(&self, exchange: &mut Exchange<'_>) -> WebResult<Value> {
        let session = exchange.session()?;
        let visits = session
            .get("visits")?
            .and_then(|value| value.as_u64())
            .unwrap_or(0)
            + 1;
        session.set("visits", json!(visits))?;
        Ok(json!({ "session": session.id().as_str(), "visits": visits }))
    }
}

fn register_pages(registry: &mut Registry) {
    registry
        .controller("pages", PageController::from_args)
        .action("hello", PageController::hello)
        .action("visits", PageController::visits);
}

waypoint_web::inventory::submit! {
    ControllerRegistration::new("pages", register_pages)
}

// ==================== 用户 ====================

pub struct UserController {
    limit: usize,
}

impl UserController {
    const DEFAULT_LIMIT: usize = 50;

    fn from_args(args: &[Value]) -> anyhow::Result<Self> {
        let limit = match args.first().and_then(|options| options.get("limit")) {
            None => Self::DEFAULT_LIMIT,
            Some(limit) => limit
                .as_u64()
                .map(|limit| limit as usize)
                .ok_or_else(|| anyhow::anyhow!("limit must be a positive integer"))?,
        };
        Ok(Self { limit })
    }

    fn index(&self, _exchange: &mut Exchange<'_>) -> WebResult<Reply> {
        let users: Vec<User> = USERS.read().iter().take(self.limit).cloned().collect();
        Reply::json(&users)
    }

    fn show(&self, exchange: &mut Exchange<'_>) -> WebResult<Reply> {
        match find_user(exchange) {
            Some(user) => Reply::json(&user),
            None => {
                exchange.response.set_status(StatusCode::NOT_FOUND);
                Ok(Reply::Json(json!({ "error": "user not found" })))
            }
        }
    }

    /// 用模板渲染用户页面
    fn page(&self, exchange: &mut Exchange<'_>) -> WebResult<Reply> {
        match find_user(exchange) {
            Some(user) => {
                let html = exchange.render("users/page.html", &json!({ "user": user }))?;
                Ok(Reply::Text(html))
            }
            None => {
                exchange.response.set_status(StatusCode::NOT_FOUND);
                Ok(Reply::Text("user not found".to_string()))
            }
        }
    }

    fn search(&self, exchange: &mut Exchange<'_>) -> WebResult<Reply> {
        let name = exchange
            .request
            .query("name")
            .map(str::to_lowercase)
            .unwrap_or_default();
        let users: Vec<User> = USERS
            .read()
            .iter()
            .filter(|user| user.name.to_lowercase().contains(&name))
            .take(self.limit)
            .cloned()
            .collect();
        Reply::json(&json!({ "total": users.len(), "data": users }))
    }

    fn create(&self, exchange: &mut Exchange<'_>) -> WebResult<Reply> {
        let request: CreateUserRequest =
            serde_json::from_value(Value::Object(exchange.request.data().clone()))
                .map_err(|e| ValidationError::field_error("body", e.to_string()))?;
        request.validate()?;

        let user = {
            let mut users = USERS.write();
            let user = User {
                id: users.iter().map(|user| user.id).max().unwrap_or(0) + 1,
                name: request.name,
                email: request.email,
                joined: Utc::now().format("%Y-%m-%d").to_string(),
            };
            users.push(user.clone());
            user
        };

        tracing::info!(id = user.id, name = %user.name, "User created");
        exchange.response.set_status(StatusCode::CREATED);
        Reply::json(&user)
    }
}

fn find_user(exchange: &Exchange<'_>) -> Option<User> {
    let id: u32 = exchange.request.param("id")?.parse().ok()?;
    USERS.read().iter().find(|user| user.id == id).cloned()
}

fn register_users(registry: &mut Registry) {
    registry
        .controller("users", UserController::from_args)
        .action("index", UserController::index)
        .action("show", UserController::show)
        .action("page", UserController::page)
        .action("search", UserController::search)
        .action("create", UserController::create);
}

waypoint_web::inventory::submit! {
    ControllerRegistration::new("users", register_users)
}
