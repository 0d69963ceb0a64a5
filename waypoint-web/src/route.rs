//! 路由与路由组
//!
//! 路由组是一棵树：每个节点携带路径前缀和中间件，子节点为路由或嵌套的路由组。
//! 启动时通过 [`flatten`] 深度优先展开为有序的路由列表，之后不再修改。
//!
//! ```ignore
//! let root = Group::root()
//!     .route(Route::get("/", Handler::template("home.html")))
//!     .group(
//!         Group::new("/api")
//!             .middleware("json_body")
//!             .route(Route::post("/users", Handler::controller("users", "create"))),
//!     );
//! let routes = flatten(&root);
//! ```

use serde_json::Value;

use crate::method::HttpMethod;

/// 中间件默认入口名
pub const DEFAULT_ENTRY: &str = "handle";

/// 中间件引用：注册表中的标识 + 入口名 + 构造参数
///
/// 只有当所属路由被某个请求选中时才会被解析和构造
#[derive(Debug, Clone, PartialEq)]
pub struct MiddlewareRef {
    pub name: String,
    pub entry: String,
    pub args: Vec<Value>,
}

impl MiddlewareRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: DEFAULT_ENTRY.to_string(),
            args: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

impl From<&str> for MiddlewareRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for MiddlewareRef {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// 控制器引用：控制器标识 + 动作名 + 构造参数
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerRef {
    pub controller: String,
    pub action: String,
    pub args: Vec<Value>,
}

/// 路由处理器
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Handler {
    /// 未确定的处理器，被选中时视为配置错误
    #[default]
    Undetermined,
    /// 渲染指定模板
    Template(String),
    /// 构造控制器并调用指定动作
    Controller(ControllerRef),
}

impl Handler {
    pub fn template(name: impl Into<String>) -> Self {
        Handler::Template(name.into())
    }

    pub fn controller(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Handler::Controller(ControllerRef {
            controller: controller.into(),
            action: action.into(),
            args: Vec::new(),
        })
    }

    pub fn controller_with_args(
        controller: impl Into<String>,
        action: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Handler::Controller(ControllerRef {
            controller: controller.into(),
            action: action.into(),
            args,
        })
    }
}

/// 单条路由声明
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    methods: Vec<HttpMethod>,
    pattern: String,
    handler: Handler,
    middleware: Vec<MiddlewareRef>,
}

impl Route {
    /// 创建路由；方法去重并保持声明顺序，模式会被规范化
    pub fn new(
        methods: impl IntoIterator<Item = HttpMethod>,
        pattern: impl AsRef<str>,
        handler: Handler,
    ) -> Self {
        let mut unique = Vec::new();
        for method in methods {
            if !unique.contains(&method) {
                unique.push(method);
            }
        }
        Self {
            methods: unique,
            pattern: normalize_path(pattern.as_ref()),
            handler,
            middleware: Vec::new(),
        }
    }

    pub fn get(pattern: impl AsRef<str>, handler: Handler) -> Self {
        Self::new([HttpMethod::Get], pattern, handler)
    }

    pub fn post(pattern: impl AsRef<str>, handler: Handler) -> Self {
        Self::new([HttpMethod::Post], pattern, handler)
    }

    pub fn put(pattern: impl AsRef<str>, handler: Handler) -> Self {
        Self::new([HttpMethod::Put], pattern, handler)
    }

    pub fn patch(pattern: impl AsRef<str>, handler: Handler) -> Self {
        Self::new([HttpMethod::Patch], pattern, handler)
    }

    pub fn delete(pattern: impl AsRef<str>, handler: Handler) -> Self {
        Self::new([HttpMethod::Delete], pattern, handler)
    }

    pub fn head(pattern: impl AsRef<str>, handler: Handler) -> Self {
        Self::new([HttpMethod::Head], pattern, handler)
    }

    /// 追加路由级中间件
    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn methods(&self) -> &[HttpMethod] {
        &self.methods
    }

    pub fn supports(&self, method: HttpMethod) -> bool {
        self.methods.contains(&method)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn middleware_refs(&self) -> &[MiddlewareRef] {
        &self.middleware
    }
}

/// 路由树节点
#[derive(Debug, Clone, PartialEq)]
pub enum RouteNode {
    Route(Route),
    Group(Group),
}

/// 路由组
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    prefix: String,
    middleware: Vec<MiddlewareRef>,
    children: Vec<RouteNode>,
}

impl Group {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: normalize_path(prefix.as_ref()),
            middleware: Vec::new(),
            children: Vec::new(),
        }
    }

    /// 根路由组（前缀为 `/`）
    pub fn root() -> Self {
        Self::new("/")
    }

    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    pub fn route(mut self, route: Route) -> Self {
        self.children.push(RouteNode::Route(route));
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.children.push(RouteNode::Group(group));
        self
    }

    pub fn push(&mut self, node: RouteNode) {
        self.children.push(node);
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn middleware_refs(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    pub fn children(&self) -> &[RouteNode] {
        &self.children
    }

    pub fn flatten(&self) -> Vec<Route> {
        flatten(self)
    }
}

/// 深度优先展开路由树
///
/// 每个节点的前缀拼接到所有后代路由的模式前，节点的中间件按声明顺序
/// 插入到所有后代路由的中间件之前。兄弟节点保持声明顺序。
pub fn flatten(group: &Group) -> Vec<Route> {
    let mut routes = Vec::new();
    walk(group, "/", &[], &mut routes);
    routes
}

fn walk(group: &Group, parent_prefix: &str, inherited: &[MiddlewareRef], out: &mut Vec<Route>) {
    let prefix = join_paths(parent_prefix, &group.prefix);
    let mut middleware = inherited.to_vec();
    middleware.extend(group.middleware.iter().cloned());

    for child in &group.children {
        match child {
            RouteNode::Route(route) => out.push(Route {
                methods: route.methods.clone(),
                pattern: join_paths(&prefix, &route.pattern),
                handler: route.handler.clone(),
                middleware: middleware
                    .iter()
                    .chain(route.middleware.iter())
                    .cloned()
                    .collect(),
            }),
            RouteNode::Group(nested) => walk(nested, &prefix, &middleware, out),
        }
    }
}

/// 用 `/` 拼接两个路径并规范化
pub fn join_paths(prefix: &str, path: &str) -> String {
    normalize_path(&format!("{}/{}", prefix, path))
}

/// 规范化路径：以单个 `/` 开头，合并重复的 `/`，除根路径外去掉结尾的 `/`
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}
