//! # Waypoint Web
//!
//! 路由分组、模式匹配调度与中间件管道
//!
//! ## 核心组件
//!
//! - **路由与路由组** - 声明式的路由树，启动时展开为有序路由列表
//! - **调度器** - 编译路由模式，解析 (方法, 路径) 并提取命名参数
//! - **管道** - 全局 → 路由组 → 路由中间件，最后是终端处理器
//! - **内核** - 每个请求的匹配、分发和失败转换
//! - **宿主桥接** - 基于 Axum 的 HTTP 服务器
//!
//! ```ignore
//! use waypoint_web::prelude::*;
//!
//! let kernel = Kernel::builder()
//!     .route_config(RouteConfig::from_file("routes.toml")?)
//!     .registry(Registry::from_inventory())
//!     .services(Services::new().with_renderer(TeraRenderer::new("templates/**/*")?))
//!     .build()?;
//!
//! WebServer::new(kernel, ServerProperties::default()).run().await?;
//! ```

pub mod controller;
pub mod dispatcher;
pub mod exception_handler;
pub mod headers;
pub mod kernel;
pub mod method;
pub mod middleware;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod response;
pub mod route;
pub mod route_config;
pub mod server;
pub mod services;
pub mod template;

pub use inventory;

pub mod prelude {
    //! 预导入模块

    pub use crate::controller::Reply;
    pub use crate::dispatcher::{Match, RouteError, RouteTable};
    pub use crate::exception_handler::{
        ErrorResponse, ExceptionHandler, WebError, WebResult,
    };
    pub use crate::headers::Headers;
    pub use crate::kernel::{Kernel, KernelBuilder, KernelSettings};
    pub use crate::method::HttpMethod;
    pub use crate::middleware::{JsonBody, RequestId, RequestIdMiddleware, RequestLog, SessionStart};
    pub use crate::pipeline::{middleware_fn, terminal_fn, Exchange, Middleware, Next, Terminal};
    pub use crate::registry::{ControllerRegistration, MiddlewareRegistration, Registry};
    pub use crate::request::{Params, Request};
    pub use crate::response::{Body, Response, SentResponse};
    pub use crate::route::{flatten, Group, Handler, MiddlewareRef, Route};
    pub use crate::route_config::RouteConfig;
    pub use crate::server::{ServerProperties, WebServer};
    pub use crate::services::{
        MemorySessionStore, QueryExecutor, Row, Services, Session, SessionStore, TemplateRenderer,
    };
    pub use crate::template::TeraRenderer;

    pub use http::StatusCode;
    pub use waypoint_validator::{Validate, ValidationError, ValidationRules, Validator};
}
