//! 路由表加载
//!
//! 路由表使用 TOML 描述，键的声明顺序即路由顺序：
//!
//! ```toml
//! middleware = ["request_log"]
//!
//! [routes]
//! "/" = "home.html"
//! "POST /contact" = { controller = "pages", action = "contact", args = [] }
//! "GET|HEAD /about" = { template = "about.html", middleware = ["session"] }
//! "/api" = { middleware = ["json_body"], routes = { "/" = "api.html" } }
//! ```
//!
//! - 键为 `"[METHOD[|METHOD...]] /pattern"`，省略方法时为 GET
//! - 字符串值为模板；含 `controller` 的表为控制器（`action` 默认 `index`）；
//!   含 `template` 的表为带选项的模板路由；含 `routes` 的表为路由组（键为前缀，不能带方法）
//! - 以上都不是的表为未确定的路由，请求命中时按配置错误返回 500
//! - 中间件引用为字符串标识，或 `{ name, entry = "handle", args = [] }`

use std::path::Path;

use serde_json::Value;
use toml::{Table, Value as TomlValue};

use crate::dispatcher::RouteError;
use crate::method::HttpMethod;
use crate::route::{Group, Handler, MiddlewareRef, Route, RouteNode, DEFAULT_ENTRY};

pub const DEFAULT_ACTION: &str = "index";

const MIDDLEWARE_KEY: &str = "middleware";
const ROUTES_KEY: &str = "routes";

/// 加载后的路由配置：全局中间件 + 根路由组
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    pub middleware: Vec<MiddlewareRef>,
    pub root: Group,
}

impl RouteConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouteError::Config(format!("failed to read route file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "Route table loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RouteError> {
        let table: Table = content
            .parse()
            .map_err(|e: toml::de::Error| RouteError::Config(e.to_string()))?;

        let mut middleware = Vec::new();
        let mut root = Group::root();

        for (key, value) in &table {
            match key.as_str() {
                MIDDLEWARE_KEY => middleware = parse_middleware_list(value, "middleware")?,
                ROUTES_KEY => {
                    let routes = value.as_table().ok_or_else(|| {
                        RouteError::Config("'routes' must be a table".to_string())
                    })?;
                    parse_children(routes, &mut root)?;
                }
                other => tracing::warn!(key = other, "Ignoring unknown route table key"),
            }
        }

        Ok(Self { middleware, root })
    }
}

fn parse_children(routes: &Table, group: &mut Group) -> Result<(), RouteError> {
    for (key, value) in routes {
        group.push(parse_entry(key, value)?);
    }
    Ok(())
}

fn parse_entry(key: &str, value: &TomlValue) -> Result<RouteNode, RouteError> {
    let (methods, pattern) = parse_key(key)?;

    let table = match value {
        TomlValue::String(template) => {
            return Ok(RouteNode::Route(Route::new(
                methods.unwrap_or_else(|| vec![HttpMethod::Get]),
                pattern,
                Handler::Template(template.clone()),
            )))
        }
        TomlValue::Table(table) => table,
        other => {
            return Err(RouteError::Config(format!(
                "route '{}' must be a template name or a table, found {}",
                key,
                other.type_str()
            )))
        }
    };

    let middleware = match table.get(MIDDLEWARE_KEY) {
        Some(value) => parse_middleware_list(value, key)?,
        None => Vec::new(),
    };

    if let Some(children) = table.get(ROUTES_KEY) {
        if methods.is_some() {
            return Err(RouteError::Config(format!(
                "group '{}' must not declare methods",
                key
            )));
        }
        let children = children.as_table().ok_or_else(|| {
            RouteError::Config(format!("'routes' of group '{}' must be a table", key))
        })?;
        let mut group = Group::new(pattern);
        for reference in middleware {
            group = group.middleware(reference);
        }
        parse_children(children, &mut group)?;
        return Ok(RouteNode::Group(group));
    }

    let handler = match (table.get("controller"), table.get("template")) {
        (Some(_), Some(_)) => {
            return Err(RouteError::Config(format!(
                "route '{}' declares both a controller and a template",
                key
            )))
        }
        (Some(controller), None) => {
            let controller = string_field(controller, key, "controller")?;
            let action = match table.get("action") {
                Some(action) => string_field(action, key, "action")?,
                None => DEFAULT_ACTION.to_string(),
            };
            let args = match table.get("args") {
                Some(args) => array_field(args, key, "args")?,
                None => Vec::new(),
            };
            Handler::controller_with_args(controller, action, args)
        }
        (None, Some(template)) => Handler::Template(string_field(template, key, "template")?),
        (None, None) => {
            tracing::warn!(route = key, "Route has no handler, it will fail when selected");
            Handler::Undetermined
        }
    };

    let mut route = Route::new(
        methods.unwrap_or_else(|| vec![HttpMethod::Get]),
        pattern,
        handler,
    );
    for reference in middleware {
        route = route.middleware(reference);
    }
    Ok(RouteNode::Route(route))
}

/// 解析 `"[METHOD[|METHOD...]] /pattern"`
fn parse_key(key: &str) -> Result<(Option<Vec<HttpMethod>>, &str), RouteError> {
    let key = key.trim();
    if key.starts_with('/') || key.is_empty() {
        return Ok((None, key));
    }

    let (methods, pattern) = key
        .split_once(char::is_whitespace)
        .ok_or_else(|| RouteError::Config(format!("route key '{}' has no pattern", key)))?;

    let methods = methods
        .split('|')
        .map(|method| {
            method
                .parse::<HttpMethod>()
                .map_err(|e| RouteError::Config(format!("route key '{}': {}", key, e)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((Some(methods), pattern.trim()))
}

fn parse_middleware_list(value: &TomlValue, owner: &str) -> Result<Vec<MiddlewareRef>, RouteError> {
    let items = value.as_array().ok_or_else(|| {
        RouteError::Config(format!("middleware of '{}' must be an array", owner))
    })?;
    items
        .iter()
        .map(|item| parse_middleware_ref(item, owner))
        .collect()
}

fn parse_middleware_ref(value: &TomlValue, owner: &str) -> Result<MiddlewareRef, RouteError> {
    match value {
        TomlValue::String(name) => Ok(MiddlewareRef::new(name.as_str())),
        TomlValue::Table(table) => {
            let name = table
                .get("name")
                .ok_or_else(|| {
                    RouteError::Config(format!("middleware of '{}' is missing 'name'", owner))
                })
                .and_then(|name| string_field(name, owner, "name"))?;
            let entry = match table.get("entry") {
                Some(entry) => string_field(entry, owner, "entry")?,
                None => DEFAULT_ENTRY.to_string(),
            };
            let args = match table.get("args") {
                Some(args) => array_field(args, owner, "args")?,
                None => Vec::new(),
            };
            Ok(MiddlewareRef::new(name).entry(entry).args(args))
        }
        other => Err(RouteError::Config(format!(
            "middleware of '{}' must be a string or a table, found {}",
            owner,
            other.type_str()
        ))),
    }
}

fn string_field(value: &TomlValue, owner: &str, field: &str) -> Result<String, RouteError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RouteError::Config(format!("'{}' of '{}' must be a string", field, owner)))
}

fn array_field(value: &TomlValue, owner: &str, field: &str) -> Result<Vec<Value>, RouteError> {
    value
        .as_array()
        .map(|items| items.iter().map(to_json).collect())
        .ok_or_else(|| RouteError::Config(format!("'{}' of '{}' must be an array", field, owner)))
}

fn to_json(value: &TomlValue) -> Value {
    match value {
        TomlValue::String(s) => Value::String(s.clone()),
        TomlValue::Integer(i) => Value::from(*i),
        TomlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        TomlValue::Boolean(b) => Value::Bool(*b),
        TomlValue::Datetime(d) => Value::String(d.to_string()),
        TomlValue::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        TomlValue::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}
