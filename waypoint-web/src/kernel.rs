//! 内核
//!
//! 启动时展开路由组、编译路由表并解析全局中间件；之后每个请求：
//!
//! ```text
//! RECEIVED → MATCHING → { FOUND | NOT_FOUND | METHOD_NOT_ALLOWED } → DISPATCHING → FINALIZED
//! ```
//!
//! - FOUND：写入命名参数，构造终端处理器和中间件链并执行
//! - NOT_FOUND：404，渲染未找到页面
//! - METHOD_NOT_ALLOWED：405，`Allow` 头列出允许的方法，渲染对应页面
//!
//! 分发过程中的错误和 panic 都在这里被捕获并转换为错误响应，不会继续执行链条。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use serde_json::Value;
use waypoint_core::{
    Environment, APP_DEBUG, APP_ENABLED, TEMPLATES_METHOD_NOT_ALLOWED, TEMPLATES_NOT_FOUND,
    TEMPLATES_UNAVAILABLE,
};

use crate::controller::{template_variables, TemplateTerminal};
use crate::dispatcher::{Match, RouteError, RouteTable};
use crate::exception_handler::{ExceptionHandler, ExceptionHandlerRegistry, WebError, WebResult};
use crate::method::join_methods;
use crate::pipeline::{Exchange, Middleware, Pipeline, Terminal};
use crate::registry::Registry;
use crate::request::Request;
use crate::response::Response;
use crate::route::{flatten, Group, Handler, MiddlewareRef, Route};
use crate::route_config::RouteConfig;
use crate::services::Services;

/// 内核配置
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSettings {
    /// 调试模式下 500 响应包含错误详情
    pub debug: bool,
    /// 为 false 时所有请求返回 503
    pub enabled: bool,
    pub not_found_template: String,
    pub method_not_allowed_template: String,
    pub unavailable_template: String,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            debug: false,
            enabled: true,
            not_found_template: "errors/404.html".to_string(),
            method_not_allowed_template: "errors/405.html".to_string(),
            unavailable_template: "errors/503.html".to_string(),
        }
    }
}

impl KernelSettings {
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            debug: env.get_bool_or(APP_DEBUG, defaults.debug),
            enabled: env.get_bool_or(APP_ENABLED, defaults.enabled),
            not_found_template: env
                .get_string(TEMPLATES_NOT_FOUND)
                .unwrap_or(defaults.not_found_template),
            method_not_allowed_template: env
                .get_string(TEMPLATES_METHOD_NOT_ALLOWED)
                .unwrap_or(defaults.method_not_allowed_template),
            unavailable_template: env
                .get_string(TEMPLATES_UNAVAILABLE)
                .unwrap_or(defaults.unavailable_template),
        }
    }
}

enum GlobalMiddleware {
    Reference(MiddlewareRef),
    Instance(Arc<dyn Middleware>),
}

/// 内核构建器
pub struct KernelBuilder {
    root: Group,
    global: Vec<GlobalMiddleware>,
    registry: Registry,
    services: Services,
    settings: KernelSettings,
    exception_handlers: Vec<Arc<dyn ExceptionHandler>>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self {
            root: Group::root(),
            global: Vec::new(),
            registry: Registry::new(),
            services: Services::new(),
            settings: KernelSettings::default(),
            exception_handlers: Vec::new(),
        }
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置根路由组
    pub fn routes(mut self, root: Group) -> Self {
        self.root = root;
        self
    }

    /// 使用加载的路由表：根路由组 + 追加其全局中间件
    pub fn route_config(mut self, config: RouteConfig) -> Self {
        self.root = config.root;
        self.global
            .extend(config.middleware.into_iter().map(GlobalMiddleware::Reference));
        self
    }

    /// 追加一个按标识解析的全局中间件（构建时解析）
    pub fn global_middleware(mut self, reference: impl Into<MiddlewareRef>) -> Self {
        self.global.push(GlobalMiddleware::Reference(reference.into()));
        self
    }

    /// 追加一个全局中间件实例
    pub fn global(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.global.push(GlobalMiddleware::Instance(middleware));
        self
    }

    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn settings(mut self, settings: KernelSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn exception_handler(mut self, handler: impl ExceptionHandler + 'static) -> Self {
        self.exception_handlers.push(Arc::new(handler));
        self
    }

    /// 展开并编译路由，解析全局中间件
    pub fn build(self) -> Result<Kernel, RouteError> {
        let table = RouteTable::build(flatten(&self.root))?;

        let mut global = Vec::with_capacity(self.global.len());
        for unit in self.global {
            match unit {
                GlobalMiddleware::Instance(middleware) => global.push(middleware),
                GlobalMiddleware::Reference(reference) => {
                    let middleware = self.registry.resolve_middleware(&reference).map_err(|e| {
                        RouteError::GlobalMiddleware {
                            name: reference.name.clone(),
                            message: e.to_string(),
                        }
                    })?;
                    global.push(middleware);
                }
            }
        }

        warn_unresolved(&table, &self.registry);

        let mut exceptions = ExceptionHandlerRegistry::new(self.settings.debug);
        for handler in self.exception_handlers {
            exceptions.register_arc(handler);
        }

        tracing::info!(
            routes = table.len(),
            global_middleware = global.len(),
            debug = self.settings.debug,
            "Kernel built"
        );

        Ok(Kernel {
            table,
            registry: self.registry,
            services: self.services,
            global,
            settings: self.settings,
            exceptions,
        })
    }
}

/// 启动时提示注册表中缺失的标识；这些路由只在被选中时失败
fn warn_unresolved(table: &RouteTable, registry: &Registry) {
    for route in table.routes() {
        for reference in route.middleware_refs() {
            if !registry.contains_middleware(&reference.name) {
                tracing::warn!(
                    pattern = route.pattern(),
                    middleware = %reference.name,
                    "Route references unregistered middleware"
                );
            }
        }
        match route.handler() {
            Handler::Controller(reference)
                if !registry.contains_action(&reference.controller, &reference.action) =>
            {
                tracing::warn!(
                    pattern = route.pattern(),
                    controller = %reference.controller,
                    action = %reference.action,
                    "Route references unregistered controller action"
                );
            }
            Handler::Undetermined => {
                tracing::warn!(pattern = route.pattern(), "Route has an undetermined handler");
            }
            _ => {}
        }
    }
}

/// 请求分发内核，构建后只读，可在线程间共享
pub struct Kernel {
    table: RouteTable,
    registry: Registry,
    services: Services,
    global: Vec<Arc<dyn Middleware>>,
    settings: KernelSettings,
    exceptions: ExceptionHandlerRegistry,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub fn routes(&self) -> &[Route] {
        self.table.routes()
    }

    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// 处理一个请求，总是返回一个完整的响应
    pub fn handle(&self, request: Request) -> Response {
        let span = tracing::debug_span!(
            "request",
            method = %request.method(),
            path = %request.path()
        );
        let _enter = span.enter();
        let start = Instant::now();
        let path = request.path().to_string();

        let response = match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(request))) {
            Ok(response) => response,
            Err(payload) => self.error_response(&WebError::from_panic(payload), &path),
        };

        tracing::debug!(
            status = response.status().as_u16(),
            elapsed = ?start.elapsed(),
            "Request finalized"
        );
        response
    }

    fn dispatch(&self, request: Request) -> Response {
        if !self.settings.enabled {
            return self.status_page(
                StatusCode::SERVICE_UNAVAILABLE,
                &self.settings.unavailable_template,
                &request,
            );
        }

        match self.table.match_route(request.method(), request.path()) {
            Match::NotFound => {
                tracing::debug!("No route matched");
                self.status_page(StatusCode::NOT_FOUND, &self.settings.not_found_template, &request)
            }
            Match::MethodNotAllowed { allowed } => {
                let allow = join_methods(&allowed);
                tracing::debug!(allow = %allow, "Method not allowed");
                let mut response = self.status_page(
                    StatusCode::METHOD_NOT_ALLOWED,
                    &self.settings.method_not_allowed_template,
                    &request,
                );
                response.set_header("Allow", allow);
                response
            }
            Match::Found { route, index, named } => {
                tracing::debug!(route = index, pattern = route.pattern(), "Route matched");
                let path = request.path().to_string();
                let mut request = request;
                request.attach_named(named);
                match self.run_route(route, request) {
                    Ok(response) => response,
                    Err(error) => self.error_response(&error, &path),
                }
            }
        }
    }

    fn run_route(&self, route: &Route, request: Request) -> WebResult<Response> {
        let terminal: Arc<dyn Terminal> = match route.handler() {
            Handler::Undetermined => {
                return Err(WebError::configuration(format!(
                    "Route '{}' has no handler",
                    route.pattern()
                )))
            }
            Handler::Template(name) => Arc::new(TemplateTerminal::new(name.as_str())),
            Handler::Controller(reference) => self.registry.resolve_action(reference)?,
        };

        let middleware = route
            .middleware_refs()
            .iter()
            .map(|reference| self.registry.resolve_middleware(reference))
            .collect::<WebResult<Vec<_>>>()?;

        let pipeline = Pipeline::compose(&self.global, middleware, terminal);
        let mut exchange = Exchange::new(request, &self.services);
        pipeline.run(&mut exchange)?;
        Ok(exchange.response)
    }

    /// 渲染状态页；模板渲染失败时回退到纯文本
    fn status_page(&self, status: StatusCode, template: &str, request: &Request) -> Response {
        let mut variables = template_variables(request);
        if let Value::Object(fields) = &mut variables {
            fields.insert("status".to_string(), Value::from(status.as_u16()));
        }

        let mut response = Response::with_status(status);
        match self.services.render(template, &variables) {
            Ok(html) => {
                response.write(html);
            }
            Err(error) => {
                tracing::debug!(template, error = %error, "Status page template unavailable, using plain text");
                response
                    .set_content_type("text/plain")
                    .write(status.canonical_reason().unwrap_or("Error"));
            }
        }
        response
    }

    fn error_response(&self, error: &WebError, path: &str) -> Response {
        self.exceptions.handle_error(error, path).into_response()
    }
}
