//! Web 服务器模块
//!
//! 基于 Axum 的宿主桥接：所有路径都交给一个 fallback 处理器，
//! 把 `http::Request` 转换为 [`Request`]，在阻塞线程池上执行内核分发，
//! 再把 [`SentResponse`] 转换回 `http::Response`。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::Router;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use waypoint_core::{
    ApplicationError, ApplicationResult, Environment, SERVER_HOST, SERVER_MAX_BODY_BYTES,
    SERVER_PORT,
};

use crate::kernel::Kernel;
use crate::method::HttpMethod;
use crate::request::Request;
use crate::response::SentResponse;

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 请求体大小上限（字节）
    pub max_body_bytes: usize,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> ApplicationResult<Self> {
        let defaults = Self::default();
        let max_body_bytes = match env.get_i64(SERVER_MAX_BODY_BYTES) {
            None => defaults.max_body_bytes,
            Some(limit) => usize::try_from(limit).map_err(|_| ApplicationError::InvalidConfig {
                key: SERVER_MAX_BODY_BYTES.to_string(),
                message: format!("{} is not a valid size", limit),
            })?,
        };

        Ok(Self {
            host: env.get_string_or(SERVER_HOST, &defaults.host),
            port: env.get_port_or(SERVER_PORT, defaults.port)?,
            max_body_bytes,
        })
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServerState {
    kernel: Arc<Kernel>,
    max_body_bytes: usize,
}

/// Waypoint Web 服务器
pub struct WebServer {
    kernel: Arc<Kernel>,
    properties: ServerProperties,
}

impl WebServer {
    pub fn new(kernel: Kernel, properties: ServerProperties) -> Self {
        Self {
            kernel: Arc::new(kernel),
            properties,
        }
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.properties
    }

    /// 构建 Axum 路由：所有请求都经过 fallback 交给内核
    pub fn router(&self) -> Router {
        let state = ServerState {
            kernel: Arc::clone(&self.kernel),
            max_body_bytes: self.properties.max_body_bytes,
        };
        Router::new()
            .fallback(dispatch)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// 启动服务器，收到 Ctrl-C 后优雅退出
    pub async fn run(self) -> ApplicationResult<()> {
        let addr = self.properties.address();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!("Starting Waypoint web server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ApplicationError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("Server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApplicationError::Server(format!("Server error: {}", e)))?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn dispatch(
    State(state): State<ServerState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: axum::extract::Request,
) -> HttpResponse {
    let client_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let request = match into_request(request, client_addr, state.max_body_bytes).await {
        Ok(request) => request,
        Err(response) => return response,
    };

    let kernel = Arc::clone(&state.kernel);
    match tokio::task::spawn_blocking(move || kernel.handle(request).send()).await {
        Ok(sent) => into_http_response(sent),
        Err(e) => {
            tracing::error!(error = %e, "Kernel dispatch task failed");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// `http::Request` → [`Request`]；不支持的方法返回 501，请求体超限返回 413
async fn into_request(
    request: axum::extract::Request,
    client_addr: Option<SocketAddr>,
    max_body_bytes: usize,
) -> Result<Request, HttpResponse> {
    let (parts, body) = request.into_parts();

    let method = HttpMethod::try_from(&parts.method)
        .map_err(|e| plain(StatusCode::NOT_IMPLEMENTED, &e.to_string()))?;

    let bytes = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Failed to read request body");
            plain(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
        })?;

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut builder = Request::builder(method, target)
        .body(bytes.to_vec())
        .scheme(request_scheme(&parts));
    for (name, value) in parts.headers.iter() {
        match value.to_str() {
            Ok(value) => builder = builder.header(name.as_str(), value),
            Err(_) => tracing::debug!(header = %name, "Skipping non-ASCII header value"),
        }
    }
    if let Some(addr) = client_addr {
        builder = builder.client_addr(addr);
    }

    Ok(builder.build())
}

/// 服务端收到的请求 URI 通常不带 scheme；经反向代理时以 `X-Forwarded-Proto` 为准
fn request_scheme(parts: &http::request::Parts) -> String {
    parts
        .headers
        .get(FORWARDED_PROTO_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|proto| proto.trim().to_ascii_lowercase())
        .filter(|proto| !proto.is_empty())
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string())
}

/// [`SentResponse`] → `http::Response`
fn into_http_response(sent: SentResponse) -> HttpResponse {
    let mut builder = http::Response::builder().status(sent.status);
    for (name, value) in &sent.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(sent.body)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid response produced by kernel");
        plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}

fn plain(status: StatusCode, message: &str) -> HttpResponse {
    (status, message.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Exchange;
    use crate::registry::Registry;
    use crate::route::{Group, Handler, Route};
    use crate::exception_handler::WebResult;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use waypoint_core::{ConfigValue, MapPropertySource};

    struct Inspect;

    impl Inspect {
        fn show(&self, exchange: &mut Exchange<'_>) -> WebResult<Value> {
            Ok(json!({
                "id": exchange.request.param("id"),
                "q": exchange.request.query("q"),
                "agent": exchange.request.header("user-agent"),
                "scheme": exchange.request.transport().scheme,
                "data": Value::Object(exchange.request.data().clone()),
            }))
        }
    }

    fn server() -> WebServer {
        let mut registry = Registry::from_inventory();
        registry
            .controller("inspect", |_args: &[Value]| Ok(Inspect))
            .action("show", Inspect::show);

        let kernel = Kernel::builder()
            .routes(
                Group::root().route(
                    Route::new(
                        [HttpMethod::Get, HttpMethod::Post],
                        "/items/{id}",
                        Handler::controller("inspect", "show"),
                    )
                    .middleware("json_body"),
                ),
            )
            .registry(registry)
            .global_middleware("request_id")
            .build()
            .unwrap();

        WebServer::new(
            kernel,
            ServerProperties {
                max_body_bytes: 64,
                ..ServerProperties::default()
            },
        )
    }

    async fn body_string(response: HttpResponse) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_through_router() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/items/7?q=rust")
            .header("user-agent", "tests")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":" widget "}"#))
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert!(response.headers().contains_key("x-request-id"));

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body,
            json!({
                "id": "7",
                "q": "rust",
                "agent": "tests",
                "scheme": "http",
                "data": {"name": "widget"}
            })
        );
    }

    #[tokio::test]
    async fn test_scheme_from_forwarded_proto() {
        let request = http::Request::builder()
            .method("GET")
            .uri("/items/9")
            .header("x-forwarded-proto", "HTTPS, http")
            .body(Body::empty())
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["scheme"], json!("https"));
    }

    #[tokio::test]
    async fn test_method_not_allowed_through_router() {
        let request = http::Request::builder()
            .method("DELETE")
            .uri("/items/7")
            .body(Body::empty())
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("allow").unwrap(), "GET, POST");
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let request = http::Request::builder()
            .method("OPTIONS")
            .uri("/items/7")
            .body(Body::empty())
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let request = http::Request::builder()
            .method("POST")
            .uri("/items/7")
            .body(Body::from("x".repeat(1024)))
            .unwrap();

        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(SERVER_HOST, ConfigValue::String("127.0.0.1".to_string()))
                .with_property(SERVER_PORT, ConfigValue::Int(3000)),
        );
        let properties = ServerProperties::from_environment(&env).unwrap();
        assert_eq!(properties.address(), "127.0.0.1:3000");
        assert_eq!(properties.max_body_bytes, ServerProperties::default().max_body_bytes);

        let bad = Environment::new().with_source(
            MapPropertySource::new("test").with_property(SERVER_PORT, ConfigValue::Int(70000)),
        );
        assert!(ServerProperties::from_environment(&bad).is_err());
    }
}
