//! 中间件与控制器注册表
//!
//! 路由表通过稳定的标识引用中间件和控制器，注册表把标识映射到类型化的工厂。
//! 在路由被选中时才按标识查找并构造，查找只是一次哈希表访问。
//!
//! 除了手动注册外，还可以通过 `inventory` 在编译时提交注册信息：
//!
//! ```ignore
//! inventory::submit! {
//!     MiddlewareRegistration::new("request_log", RequestLog::create)
//! }
//!
//! let registry = Registry::from_inventory();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::controller::{ActionFn, ActionTerminal, Reply};
use crate::exception_handler::{WebError, WebResult};
use crate::pipeline::{Exchange, Middleware, Terminal};
use crate::route::{ControllerRef, MiddlewareRef, DEFAULT_ENTRY};

/// 中间件工厂：根据引用（入口名 + 构造参数）构造中间件实例
pub type MiddlewareFactory =
    Arc<dyn Fn(&MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>> + Send + Sync>;

/// 控制器工厂：根据路由表中的构造参数构造控制器
pub type ControllerFactory<C> = Arc<dyn Fn(&[Value]) -> anyhow::Result<C> + Send + Sync>;

/// 中间件编译时注册信息
pub struct MiddlewareRegistration {
    pub name: &'static str,
    pub create: fn(&MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>>,
}

impl MiddlewareRegistration {
    pub const fn new(
        name: &'static str,
        create: fn(&MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>>,
    ) -> Self {
        Self { name, create }
    }
}

inventory::collect!(MiddlewareRegistration);

/// 控制器编译时注册信息
///
/// `register` 负责在注册表中登记控制器及其动作
pub struct ControllerRegistration {
    pub name: &'static str,
    pub register: fn(&mut Registry),
}

impl ControllerRegistration {
    pub const fn new(name: &'static str, register: fn(&mut Registry)) -> Self {
        Self { name, register }
    }
}

inventory::collect!(ControllerRegistration);

/// 要求中间件引用使用默认入口，供只有一个入口的中间件使用
pub fn ensure_default_entry(reference: &MiddlewareRef) -> anyhow::Result<()> {
    if reference.entry != DEFAULT_ENTRY {
        anyhow::bail!(
            "middleware '{}' has no entry point '{}'",
            reference.name,
            reference.entry
        );
    }
    Ok(())
}

#[derive(Default)]
struct ControllerEntry {
    actions: HashMap<String, ActionFn>,
}

/// 中间件与控制器注册表
#[derive(Default)]
pub struct Registry {
    middleware: HashMap<String, MiddlewareFactory>,
    controllers: HashMap<String, ControllerEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 inventory 收集所有编译时注册的中间件和控制器
    pub fn from_inventory() -> Self {
        let mut registry = Self::new();

        tracing::info!("Discovering middleware and controllers from inventory");

        for registration in inventory::iter::<MiddlewareRegistration> {
            registry.register_middleware(registration.name, registration.create);
            tracing::debug!(name = registration.name, "Registered middleware");
        }

        for registration in inventory::iter::<ControllerRegistration> {
            (registration.register)(&mut registry);
            tracing::debug!(name = registration.name, "Registered controller");
        }

        tracing::info!(
            middleware = registry.middleware.len(),
            controllers = registry.controllers.len(),
            "Registry discovery completed"
        );

        registry
    }

    /// 注册中间件工厂；同名注册会覆盖之前的工厂
    pub fn register_middleware<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&MiddlewareRef) -> anyhow::Result<Arc<dyn Middleware>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.middleware.insert(name.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(name = %name, "Middleware registration replaced");
        }
        self
    }

    /// 注册一个无参中间件实例，每次解析都返回同一个实例
    pub fn register_middleware_instance(
        &mut self,
        name: impl Into<String>,
        middleware: Arc<dyn Middleware>,
    ) -> &mut Self {
        self.register_middleware(name, move |reference: &MiddlewareRef| {
            ensure_default_entry(reference)?;
            Ok(Arc::clone(&middleware))
        })
    }

    /// 开始注册控制器
    ///
    /// ```ignore
    /// registry
    ///     .controller("users", |_args| Ok(UserController::default()))
    ///     .action("show", UserController::show)
    ///     .action("create", UserController::create);
    /// ```
    pub fn controller<C, F>(&mut self, name: impl Into<String>, constructor: F) -> ControllerBuilder<'_, C>
    where
        C: 'static,
        F: Fn(&[Value]) -> anyhow::Result<C> + Send + Sync + 'static,
    {
        let name = name.into();
        self.controllers.entry(name.clone()).or_default();
        ControllerBuilder {
            registry: self,
            name,
            constructor: Arc::new(constructor),
        }
    }

    pub fn contains_middleware(&self, name: &str) -> bool {
        self.middleware.contains_key(name)
    }

    pub fn contains_controller(&self, name: &str) -> bool {
        self.controllers.contains_key(name)
    }

    pub fn contains_action(&self, controller: &str, action: &str) -> bool {
        self.controllers
            .get(controller)
            .is_some_and(|entry| entry.actions.contains_key(action))
    }

    /// 按引用构造中间件；标识未注册或构造失败都属于配置错误
    pub fn resolve_middleware(&self, reference: &MiddlewareRef) -> WebResult<Arc<dyn Middleware>> {
        let factory = self.middleware.get(&reference.name).ok_or_else(|| {
            WebError::configuration(format!("Middleware '{}' is not registered", reference.name))
        })?;
        factory(reference).map_err(|e| {
            WebError::configuration(format!(
                "Failed to construct middleware '{}': {:#}",
                reference.name, e
            ))
        })
    }

    /// 按引用解析控制器动作，返回调用该动作的终端处理器
    pub fn resolve_action(&self, reference: &ControllerRef) -> WebResult<Arc<dyn Terminal>> {
        let entry = self.controllers.get(&reference.controller).ok_or_else(|| {
            WebError::configuration(format!(
                "Controller '{}' is not registered",
                reference.controller
            ))
        })?;
        let action = entry.actions.get(&reference.action).ok_or_else(|| {
            WebError::configuration(format!(
                "Controller '{}' has no action '{}'",
                reference.controller, reference.action
            ))
        })?;
        Ok(Arc::new(ActionTerminal::new(
            Arc::clone(action),
            reference.args.clone(),
        )))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut middleware: Vec<_> = self.middleware.keys().collect();
        middleware.sort();
        let mut controllers: Vec<_> = self.controllers.keys().collect();
        controllers.sort();
        f.debug_struct("Registry")
            .field("middleware", &middleware)
            .field("controllers", &controllers)
            .finish()
    }
}

/// 控制器注册构建器
pub struct ControllerBuilder<'r, C> {
    registry: &'r mut Registry,
    name: String,
    constructor: ControllerFactory<C>,
}

impl<C: 'static> ControllerBuilder<'_, C> {
    /// 登记一个动作；每次调用都会用路由表中的参数新建控制器实例
    pub fn action<F, R>(self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&C, &mut Exchange<'_>) -> WebResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        let constructor = Arc::clone(&self.constructor);
        let controller_name = self.name.clone();
        let action_fn: ActionFn = Arc::new(
            move |args: &[Value], exchange: &mut Exchange<'_>| -> WebResult<Reply> {
                let controller = constructor(args).map_err(|e| {
                    WebError::configuration(format!(
                        "Failed to construct controller '{}': {:#}",
                        controller_name, e
                    ))
                })?;
                action(&controller, exchange).map(Into::into)
            },
        );

        if let Some(entry) = self.registry.controllers.get_mut(&self.name) {
            entry.actions.insert(name.into(), action_fn);
        }
        self
    }
}
