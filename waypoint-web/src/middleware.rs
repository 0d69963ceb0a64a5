//! 内置中间件
//!
//! 以稳定的标识提交到 inventory，路由表可以直接引用：
//!
//! | 标识 | 作用 |
//! |---|---|
//! | `request_log` | 下游完成后记录方法、路径、状态和耗时 |
//! | `request_id` | 分配（或沿用传入的）`X-Request-ID` |
//! | `json_body` | 解析 JSON 对象请求体到 `request.data`，可选去除字符串首尾空白 |
//! | `session` | 通过会话存储开始或恢复会话，新会话下发 cookie |
//!
//! 构造参数为第一个参数表，例如 `{ name = "json_body", args = [{ trim = false }] }`。

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use serde_json::Value;
use waypoint_validator::ValidationError;

use crate::exception_handler::{WebError, WebResult};
use crate::pipeline::{Exchange, Middleware, Next};
use crate::registry::{ensure_default_entry, MiddlewareRegistration};
use crate::route::MiddlewareRef;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";
pub const DEFAULT_SESSION_COOKIE: &str = "session";

/// 读取第一个参数表中的选项
fn option<'a>(reference: &'a MiddlewareRef, key: &str) -> Option<&'a Value> {
    reference.args.first().and_then(|args| args.get(key))
}

/// 请求日志中间件
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLog;

impl RequestLog {
    pub fn create(reference: &MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>> {
        ensure_default_entry(reference)?;
        Ok(Arc::new(RequestLog))
    }
}

impl Middleware for RequestLog {
    fn handle(&self, exchange: &mut Exchange<'_>, next: Next<'_>) -> WebResult<()> {
        let method = exchange.request.method();
        let path = exchange.request.path().to_string();
        let start = Instant::now();

        let result = next.run(exchange);

        let elapsed = start.elapsed();
        match &result {
            Ok(()) => tracing::info!(
                method = %method,
                path = %path,
                status = %exchange.response.status().as_u16(),
                elapsed = ?elapsed,
                "Request completed"
            ),
            Err(error) => tracing::warn!(
                method = %method,
                path = %path,
                error = %error,
                elapsed = ?elapsed,
                "Request failed"
            ),
        }

        result
    }
}

/// 请求 ID，存放在请求扩展中
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// 请求 ID 中间件
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdMiddleware;

impl RequestIdMiddleware {
    pub fn create(reference: &MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>> {
        ensure_default_entry(reference)?;
        Ok(Arc::new(RequestIdMiddleware))
    }
}

impl Middleware for RequestIdMiddleware {
    fn handle(&self, exchange: &mut Exchange<'_>, next: Next<'_>) -> WebResult<()> {
        let request_id = exchange
            .request
            .header(REQUEST_ID_HEADER)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        exchange
            .request
            .extensions_mut()
            .insert(RequestId(request_id.clone()));
        exchange.response.set_header(REQUEST_ID_HEADER, request_id);

        next.run(exchange)
    }
}

/// JSON 请求体中间件
///
/// 请求体为空时不做任何处理；非法 JSON 或非对象请求体返回字段 `body` 上的验证错误
#[derive(Debug, Clone, Copy)]
pub struct JsonBody {
    pub trim: bool,
}

impl Default for JsonBody {
    fn default() -> Self {
        Self { trim: true }
    }
}

impl JsonBody {
    pub fn create(reference: &MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>> {
        ensure_default_entry(reference)?;
        let trim = match option(reference, "trim") {
            None => true,
            Some(value) => value
                .as_bool()
                .context("json_body option 'trim' must be a boolean")?,
        };
        Ok(Arc::new(JsonBody { trim }))
    }
}

impl Middleware for JsonBody {
    fn handle(&self, exchange: &mut Exchange<'_>, next: Next<'_>) -> WebResult<()> {
        if exchange.request.body().iter().all(u8::is_ascii_whitespace) {
            return next.run(exchange);
        }

        let parsed = exchange
            .request
            .json()
            .map_err(|e| ValidationError::field_error("body", e.to_string()))?;
        let Value::Object(fields) = parsed else {
            return Err(ValidationError::field_error("body", "JSON body must be an object").into());
        };

        let mut fields = fields.clone();
        if self.trim {
            fields.values_mut().for_each(trim_strings);
        }
        exchange.request.data_mut().extend(fields);

        next.run(exchange)
    }
}

/// 递归去除字符串值的首尾空白
fn trim_strings(value: &mut Value) {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.len() != text.len() {
                *text = trimmed.to_string();
            }
        }
        Value::Array(items) => items.iter_mut().for_each(trim_strings),
        Value::Object(fields) => fields.values_mut().for_each(trim_strings),
        _ => {}
    }
}

/// 会话中间件
///
/// 以 cookie 中的会话 ID 恢复会话，缺失或未知时新建并下发 cookie
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub cookie: String,
}

impl Default for SessionStart {
    fn default() -> Self {
        Self {
            cookie: DEFAULT_SESSION_COOKIE.to_string(),
        }
    }
}

impl SessionStart {
    pub fn create(reference: &MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>> {
        ensure_default_entry(reference)?;
        let cookie = match option(reference, "cookie") {
            None => DEFAULT_SESSION_COOKIE.to_string(),
            Some(value) => value
                .as_str()
                .filter(|name| !name.is_empty())
                .context("session option 'cookie' must be a non-empty string")?
                .to_string(),
        };
        Ok(Arc::new(SessionStart { cookie }))
    }
}

impl Middleware for SessionStart {
    fn handle(&self, exchange: &mut Exchange<'_>, next: Next<'_>) -> WebResult<()> {
        let store = exchange
            .services()
            .session_store()
            .ok_or_else(|| WebError::configuration("session middleware requires a session store"))?;

        let started = store.start(exchange.request.cookie(&self.cookie))?;
        if started.created {
            exchange.response.set_header(
                "Set-Cookie",
                format!("{}={}; Path=/; HttpOnly; SameSite=Lax", self.cookie, started.id),
            );
        }
        exchange.request.extensions_mut().insert(started.id);

        next.run(exchange)
    }
}

inventory::submit! {
    MiddlewareRegistration::new("request_log", RequestLog::create)
}

inventory::submit! {
    MiddlewareRegistration::new("request_id", RequestIdMiddleware::create)
}

inventory::submit! {
    MiddlewareRegistration::new("json_body", JsonBody::create)
}

inventory::submit! {
    MiddlewareRegistration::new("session", SessionStart::create)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::HttpMethod;
    use crate::pipeline::{terminal_fn, Pipeline};
    use crate::request::Request;
    use crate::services::{MemorySessionStore, Services, SessionId};
    use serde_json::json;

    fn run(
        unit: Arc<dyn Middleware>,
        request: Request,
        services: &Services,
    ) -> (WebResult<()>, Exchange<'_>) {
        let pipeline = Pipeline::compose(
            &[unit],
            Vec::new(),
            terminal_fn(|exchange| {
                let data = serde_json::Value::Object(exchange.request.data().clone());
                exchange.response.set_body(crate::response::Body::Json(data));
                Ok(())
            }),
        );
        let mut exchange = Exchange::new(request, services);
        let result = pipeline.run(&mut exchange);
        (result, exchange)
    }

    #[test]
    fn test_json_body_trims_strings() {
        let request = Request::builder(HttpMethod::Post, "/")
            .body(r#"{"first":1,"second":"  two   "}"#)
            .build();
        let unit = JsonBody::create(&MiddlewareRef::new("json_body")).unwrap();
        let services = Services::new();

        let (result, exchange) = run(unit, request, &services);
        result.unwrap();
        assert_eq!(exchange.request.data()["first"], json!(1));
        assert_eq!(exchange.request.data()["second"], json!("two"));
        assert_eq!(exchange.response.send().body, r#"{"first":1,"second":"two"}"#);
    }

    #[test]
    fn test_json_body_trim_disabled() {
        let request = Request::builder(HttpMethod::Post, "/")
            .json(&json!({"name": " ada ", "tags": [" x "]}))
            .build();
        let reference = MiddlewareRef::new("json_body").arg(json!({"trim": false}));
        let services = Services::new();

        let (result, exchange) = run(JsonBody::create(&reference).unwrap(), request, &services);
        result.unwrap();
        assert_eq!(exchange.request.data()["name"], json!(" ada "));
    }

    #[test]
    fn test_json_body_trims_nested_values() {
        let mut value = json!({"a": [" x ", {"b": " y"}], "n": 3});
        if let Value::Object(fields) = &mut value {
            fields.values_mut().for_each(trim_strings);
        }
        assert_eq!(value, json!({"a": ["x", {"b": "y"}], "n": 3}));
    }

    #[test]
    fn test_json_body_malformed_is_validation_error() {
        let services = Services::new();
        let unit = JsonBody::create(&MiddlewareRef::new("json_body")).unwrap();
        let request = Request::builder(HttpMethod::Post, "/").body("{not json").build();

        let (result, _) = run(unit, request, &services);
        match result {
            Err(WebError::Validation(ValidationError::FieldErrors(fields))) => {
                assert!(fields.contains_key("body"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_body_rejects_non_object() {
        let services = Services::new();
        let unit = JsonBody::create(&MiddlewareRef::new("json_body")).unwrap();
        let request = Request::builder(HttpMethod::Post, "/").body("[1,2]").build();

        let (result, _) = run(unit, request, &services);
        assert!(matches!(result, Err(WebError::Validation(_))));
    }

    #[test]
    fn test_json_body_bad_option() {
        let reference = MiddlewareRef::new("json_body").arg(json!({"trim": "yes"}));
        assert!(JsonBody::create(&reference).is_err());
    }

    #[test]
    fn test_request_id_generated_and_reused() {
        let services = Services::new();
        let (result, exchange) = run(
            RequestIdMiddleware::create(&MiddlewareRef::new("request_id")).unwrap(),
            Request::builder(HttpMethod::Get, "/").build(),
            &services,
        );
        result.unwrap();
        let generated = exchange.response.header(REQUEST_ID_HEADER).unwrap().to_string();
        assert_eq!(generated.len(), 36);
        assert_eq!(
            exchange.request.extensions().get::<RequestId>(),
            Some(&RequestId(generated))
        );

        let (_, exchange) = run(
            Arc::new(RequestIdMiddleware),
            Request::builder(HttpMethod::Get, "/")
                .header("x-request-id", "abc")
                .build(),
            &services,
        );
        assert_eq!(exchange.response.header(REQUEST_ID_HEADER), Some("abc"));
    }

    #[test]
    fn test_session_sets_cookie_once() {
        let services = Services::new().with_session_store(MemorySessionStore::new());
        let unit = SessionStart::create(&MiddlewareRef::new("session").arg(json!({"cookie": "sid"})))
            .unwrap();

        let (result, exchange) = run(
            Arc::clone(&unit),
            Request::builder(HttpMethod::Get, "/").build(),
            &services,
        );
        result.unwrap();
        let cookie = exchange.response.header("set-cookie").unwrap().to_string();
        assert!(cookie.starts_with("sid="));
        let id = exchange.request.extensions().get::<SessionId>().unwrap().clone();

        let (result, exchange) = run(
            unit,
            Request::builder(HttpMethod::Get, "/")
                .header("Cookie", format!("sid={}", id))
                .build(),
            &services,
        );
        result.unwrap();
        assert!(exchange.response.header("set-cookie").is_none());
        assert_eq!(exchange.request.extensions().get::<SessionId>(), Some(&id));
        exchange.session().unwrap().set("seen", json!(true)).unwrap();
    }

    #[test]
    fn test_session_without_store() {
        let services = Services::new();
        let (result, _) = run(
            Arc::new(SessionStart::default()),
            Request::builder(HttpMethod::Get, "/").build(),
            &services,
        );
        assert!(matches!(result, Err(WebError::Configuration(_))));
    }
}
