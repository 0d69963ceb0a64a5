//! 全局异常处理模块
//!
//! 分发过程中的所有失败（错误和 panic）都在内核边界被捕获，
//! 经由 [`ExceptionHandlerRegistry`] 转换为一个完整的错误响应。
//!
//! ## 错误分类
//!
//! 1. **配置错误** - 缺失的控制器、动作、中间件，或未确定的处理器（500）
//! 2. **验证错误** - 应用层返回的字段验证失败（400）
//! 3. **未处理错误** - 协作者失败或 panic（500）
//!
//! 404 / 405 是匹配结果，不属于错误。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use waypoint_validator::ValidationError;

use crate::response::{Body, Response, JSON_CONTENT_TYPE};

/// 生产模式下 500 响应的通用消息
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// 请求处理阶段的错误
#[derive(Error, Debug)]
pub enum WebError {
    /// 路由配置错误 - 500 Internal Server Error
    #[error("Route configuration error: {0}")]
    Configuration(String),

    /// 验证失败 - 400 Bad Request
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 未处理的失败 - 500 Internal Server Error
    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl WebError {
    pub fn configuration(message: impl Into<String>) -> Self {
        WebError::Configuration(message.into())
    }

    /// 获取错误对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Validation(_) => StatusCode::BAD_REQUEST,
            WebError::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取错误详情（用于 JSON 响应）
    pub fn details(&self) -> Option<Value> {
        match self {
            WebError::Validation(error) => serde_json::to_value(error.details()).ok(),
            _ => None,
        }
    }

    /// 将 `catch_unwind` 捕获的 panic 负载转换为未处理错误
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        WebError::Unhandled(anyhow::anyhow!("handler panicked: {}", message))
    }
}

impl From<serde_json::Error> for WebError {
    fn from(error: serde_json::Error) -> Self {
        WebError::Unhandled(error.into())
    }
}

pub type WebResult<T> = Result<T, WebError>;

/// 标准错误响应格式
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub timestamp: String,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Unknown Error").to_string(),
            message: message.into(),
            path: path.into(),
            trace: None,
            details: None,
        }
    }

    pub fn with_trace(mut self, trace: String) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 转换为 JSON 响应（错误响应总是新建，不沿用管道中的响应状态）
    pub fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Response::with_status(status);
        response.set_content_type(JSON_CONTENT_TYPE);
        match serde_json::to_value(&self) {
            Ok(body) => response.set_body(Body::Json(body)),
            Err(_) => response.write(self.message),
        };
        response
    }
}

/// 全局异常处理器
///
/// 实现此 trait 可以接管特定错误的响应格式，返回 `None` 时交给下一个处理器
pub trait ExceptionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 优先级，数字越小优先级越高
    fn priority(&self) -> i32 {
        100
    }

    /// 判断是否可以处理该错误
    fn can_handle(&self, error: &WebError) -> bool;

    fn handle_error(&self, error: &WebError, request_path: &str) -> Option<ErrorResponse>;
}

/// 异常处理器注册表
#[derive(Clone, Default)]
pub struct ExceptionHandlerRegistry {
    handlers: Vec<Arc<dyn ExceptionHandler>>,
    debug: bool,
}

impl ExceptionHandlerRegistry {
    pub fn new(debug: bool) -> Self {
        Self {
            handlers: Vec::new(),
            debug,
        }
    }

    pub fn register<H: ExceptionHandler + 'static>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| h.priority());
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 处理错误，返回标准化的错误响应
    ///
    /// 依次尝试已注册的处理器，都不处理时使用默认处理。
    /// 处理器 panic 时跳过该处理器。
    pub fn handle_error(&self, error: &WebError, request_path: &str) -> ErrorResponse {
        for handler in &self.handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if handler.can_handle(error) {
                    handler.handle_error(error, request_path)
                } else {
                    None
                }
            }));
            match outcome {
                Ok(Some(response)) => {
                    tracing::debug!(
                        handler = handler.name(),
                        error = %error,
                        "Error handled by custom handler"
                    );
                    return response;
                }
                Ok(None) => {}
                Err(_) => tracing::error!(
                    handler = handler.name(),
                    path = request_path,
                    "Exception handler panicked, skipping it"
                ),
            }
        }

        self.default_error_response(error, request_path)
    }

    /// 默认错误响应；非调试模式下 500 只返回通用消息
    fn default_error_response(&self, error: &WebError, request_path: &str) -> ErrorResponse {
        let status = error.status_code();

        match error {
            WebError::Validation(validation) => {
                tracing::warn!(path = request_path, error = %validation, "Request validation failed");
                let response = ErrorResponse::new(status, validation.to_string(), request_path);
                match error.details() {
                    Some(details) => response.with_details(details),
                    None => response,
                }
            }
            WebError::Configuration(_) => {
                tracing::error!(path = request_path, error = %error, "Route configuration fault");
                let message = if self.debug {
                    error.to_string()
                } else {
                    GENERIC_ERROR_MESSAGE.to_string()
                };
                ErrorResponse::new(status, message, request_path)
            }
            WebError::Unhandled(cause) => {
                tracing::error!(path = request_path, error = ?cause, "Unhandled error");
                if self.debug {
                    ErrorResponse::new(status, cause.to_string(), request_path)
                        .with_trace(format!("{:?}", cause))
                } else {
                    ErrorResponse::new(status, GENERIC_ERROR_MESSAGE, request_path)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            WebError::configuration("missing").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WebError::from(ValidationError::field_error("name", "required")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebError::from(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_validation_response_lists_fields() {
        let registry = ExceptionHandlerRegistry::new(false);
        let error = WebError::from(ValidationError::field_error("body", "malformed"));
        let response = registry.handle_error(&error, "/api");

        assert_eq!(response.status, 400);
        assert_eq!(response.error, "Bad Request");
        assert_eq!(
            response.details,
            Some(serde_json::json!({"errors": {"body": ["malformed"]}}))
        );
    }

    #[test]
    fn test_unhandled_hidden_in_production() {
        let error = WebError::from(anyhow::anyhow!("db down").context("loading user"));

        let production = ExceptionHandlerRegistry::new(false).handle_error(&error, "/u");
        assert_eq!(production.message, GENERIC_ERROR_MESSAGE);
        assert!(production.trace.is_none());

        let debug = ExceptionHandlerRegistry::new(true).handle_error(&error, "/u");
        assert_eq!(debug.message, "loading user");
        assert!(debug.trace.unwrap().contains("db down"));
    }

    #[test]
    fn test_configuration_detail_only_in_debug() {
        let error = WebError::configuration("controller 'users' is not registered");
        let production = ExceptionHandlerRegistry::new(false).handle_error(&error, "/");
        assert_eq!(production.message, GENERIC_ERROR_MESSAGE);

        let debug = ExceptionHandlerRegistry::new(true).handle_error(&error, "/");
        assert!(debug.message.contains("users"));
    }

    #[test]
    fn test_from_panic() {
        let payload = std::panic::catch_unwind(|| panic!("exploded")).unwrap_err();
        let error = WebError::from_panic(payload);
        assert!(error.to_string().contains("exploded"));
    }

    struct TeapotHandler;

    impl ExceptionHandler for TeapotHandler {
        fn name(&self) -> &str {
            "TeapotHandler"
        }

        fn can_handle(&self, error: &WebError) -> bool {
            matches!(error, WebError::Unhandled(_))
        }

        fn handle_error(&self, _error: &WebError, request_path: &str) -> Option<ErrorResponse> {
            Some(ErrorResponse::new(StatusCode::IM_A_TEAPOT, "short and stout", request_path))
        }
    }

    #[test]
    fn test_custom_handler_takes_precedence() {
        let mut registry = ExceptionHandlerRegistry::new(false);
        registry.register(TeapotHandler);

        let response = registry
            .handle_error(&WebError::from(anyhow::anyhow!("x")), "/tea")
            .into_response();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.content_type(), JSON_CONTENT_TYPE);

        let validation = registry.handle_error(
            &WebError::from(ValidationError::new("nope")),
            "/tea",
        );
        assert_eq!(validation.status, 400);
    }

    struct PanickingHandler;

    impl ExceptionHandler for PanickingHandler {
        fn name(&self) -> &str {
            "PanickingHandler"
        }

        fn priority(&self) -> i32 {
            -10
        }

        fn can_handle(&self, _error: &WebError) -> bool {
            true
        }

        fn handle_error(&self, _error: &WebError, _request_path: &str) -> Option<ErrorResponse> {
            panic!("handler bug")
        }
    }

    #[test]
    fn test_panicking_handler_falls_through() {
        let mut registry = ExceptionHandlerRegistry::new(false);
        registry.register(PanickingHandler);
        registry.register(TeapotHandler);

        let teapot = registry.handle_error(&WebError::from(anyhow::anyhow!("x")), "/tea");
        assert_eq!(teapot.status, 418);

        let fallback = registry.handle_error(&WebError::configuration("missing"), "/tea");
        assert_eq!(fallback.status, 500);
        assert_eq!(fallback.message, GENERIC_ERROR_MESSAGE);
    }
}
