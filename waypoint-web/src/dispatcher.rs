//! 路由调度器
//!
//! 启动时把展开后的路由列表编译为 [`RouteTable`]，之后只读并在请求间共享。
//!
//! ## 匹配规则
//!
//! 1. 纯字面量模式按规范化后的请求路径精确比较（哈希查找）
//! 2. 带命名段的模式按段比较：段数必须相同，字面量段区分大小写精确匹配，
//!    命名段捕获原始路径段，可选的正则约束整段锚定匹配
//! 3. 所有匹配路径的路由按展开顺序排列，先声明者优先（字面量与参数化之间也一样）
//! 4. 第一个支持该方法的路由即为结果；HEAD 在没有显式 HEAD 路由时回退到 GET 路由
//! 5. 路径匹配但方法都不支持时返回 405，允许的方法为所有匹配路由的方法并集（按声明顺序去重）

use std::collections::{HashMap, HashSet};

use regex::Regex;
use thiserror::Error;
use waypoint_core::ApplicationError;

use crate::method::HttpMethod;
use crate::request::Params;
use crate::route::{normalize_path, Route};

/// 路由表构建和路由配置错误
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid constraint for parameter '{name}' in route pattern '{pattern}': {source}")]
    InvalidConstraint {
        pattern: String,
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Duplicate parameter '{name}' in route pattern '{pattern}'")]
    DuplicateParam { pattern: String, name: String },

    #[error("Invalid route configuration: {0}")]
    Config(String),

    #[error("Failed to resolve global middleware '{name}': {message}")]
    GlobalMiddleware { name: String, message: String },
}

impl RouteError {
    fn invalid(pattern: &str, reason: impl Into<String>) -> Self {
        RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<RouteError> for ApplicationError {
    fn from(error: RouteError) -> Self {
        ApplicationError::Routes(error.to_string())
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Named {
        name: String,
        constraint: Option<Regex>,
    },
}

/// 编译后的路由模式
#[derive(Debug, Clone)]
struct CompiledPattern {
    segments: Vec<Segment>,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Result<Self, RouteError> {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();

        for raw in split_segments(pattern)? {
            let segment = Self::compile_segment(pattern, raw)?;
            if let Segment::Named { name, .. } = &segment {
                if !seen.insert(name.clone()) {
                    return Err(RouteError::DuplicateParam {
                        pattern: pattern.to_string(),
                        name: name.clone(),
                    });
                }
            }
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    fn compile_segment(pattern: &str, raw: &str) -> Result<Segment, RouteError> {
        if !raw.starts_with('{') {
            if raw.contains('{') || raw.contains('}') {
                return Err(RouteError::invalid(
                    pattern,
                    format!("segment '{}' mixes literal text and a parameter", raw),
                ));
            }
            return Ok(Segment::Literal(raw.to_string()));
        }

        let inner = raw
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| {
                RouteError::invalid(
                    pattern,
                    format!("segment '{}' mixes literal text and a parameter", raw),
                )
            })?;

        let (name, constraint) = match inner.split_once(':') {
            Some((name, constraint)) => (name.trim(), Some(constraint.trim())),
            None => (inner.trim(), None),
        };

        if name.is_empty() {
            return Err(RouteError::invalid(pattern, "empty parameter name"));
        }
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(RouteError::invalid(
                pattern,
                format!("invalid parameter name '{}'", name),
            ));
        }

        if constraint.is_some_and(str::is_empty) {
            return Err(RouteError::invalid(
                pattern,
                format!("empty constraint for parameter '{}'", name),
            ));
        }

        let constraint = constraint
            .map(|source| {
                Regex::new(&format!("^(?:{})$", source)).map_err(|e| RouteError::InvalidConstraint {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                    source: e,
                })
            })
            .transpose()?;

        Ok(Segment::Named {
            name: name.to_string(),
            constraint,
        })
    }

    fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// 按段匹配，成功时返回捕获的命名参数
    fn captures(&self, path_segments: &[&str]) -> Option<Params> {
        if self.segments.len() != path_segments.len() {
            return None;
        }

        let mut named = Params::new();
        for (segment, value) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != value {
                        return None;
                    }
                }
                Segment::Named { name, constraint } => {
                    if let Some(regex) = constraint {
                        if !regex.is_match(value) {
                            return None;
                        }
                    }
                    named.push(name.clone(), *value);
                }
            }
        }
        Some(named)
    }
}

/// 按 `/` 切分模式；花括号内（参数和约束）不允许出现 `/`
fn split_segments(pattern: &str) -> Result<Vec<&str>, RouteError> {
    let unbalanced = || RouteError::invalid(pattern, "unbalanced braces");
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in pattern.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1).ok_or_else(unbalanced)?,
            '/' if depth > 0 => {
                return Err(RouteError::invalid(
                    pattern,
                    "a parameter or its constraint must not contain '/'",
                ))
            }
            '/' => {
                segments.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth > 0 {
        return Err(unbalanced());
    }
    segments.push(&pattern[start..]);

    Ok(segments.into_iter().filter(|s| !s.is_empty()).collect())
}

/// 匹配结果
#[derive(Debug)]
pub enum Match<'t> {
    /// 找到路由；`index` 为其在展开列表中的位置
    Found {
        route: &'t Route,
        index: usize,
        named: Params,
    },
    NotFound,
    MethodNotAllowed { allowed: Vec<HttpMethod> },
}

/// 编译后的路由表
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
    patterns: Vec<CompiledPattern>,
    /// 字面量路径 -> 路由下标（升序）
    literal: HashMap<String, Vec<usize>>,
    /// 段数 -> 参数化路由下标（升序）
    dynamic: HashMap<usize, Vec<usize>>,
}

impl RouteTable {
    /// 编译路由列表；模式非法时在启动阶段报错
    pub fn build(routes: Vec<Route>) -> Result<Self, RouteError> {
        let mut patterns = Vec::with_capacity(routes.len());
        let mut literal: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dynamic: HashMap<usize, Vec<usize>> = HashMap::new();

        for (index, route) in routes.iter().enumerate() {
            let compiled = CompiledPattern::compile(route.pattern())?;
            if compiled.is_literal() {
                literal
                    .entry(route.pattern().to_string())
                    .or_default()
                    .push(index);
            } else {
                dynamic
                    .entry(compiled.segments.len())
                    .or_default()
                    .push(index);
            }
            tracing::trace!(
                index,
                pattern = route.pattern(),
                methods = %crate::method::join_methods(route.methods()),
                "Compiled route"
            );
            patterns.push(compiled);
        }

        Ok(Self {
            routes,
            patterns,
            literal,
            dynamic,
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// 解析请求的方法和路径
    pub fn match_route(&self, method: HttpMethod, path: &str) -> Match<'_> {
        let path = normalize_path(path);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut candidates: Vec<(usize, Option<Params>)> = Vec::new();
        if let Some(indices) = self.literal.get(&path) {
            candidates.extend(indices.iter().map(|&index| (index, None)));
        }
        if let Some(indices) = self.dynamic.get(&segments.len()) {
            for &index in indices {
                if let Some(named) = self.patterns[index].captures(&segments) {
                    candidates.push((index, Some(named)));
                }
            }
        }

        if candidates.is_empty() {
            return Match::NotFound;
        }
        candidates.sort_by_key(|(index, _)| *index);

        let selected = candidates
            .iter()
            .position(|(index, _)| self.routes[*index].supports(method))
            .or_else(|| {
                if method != HttpMethod::Head {
                    return None;
                }
                candidates
                    .iter()
                    .position(|(index, _)| self.routes[*index].supports(HttpMethod::Get))
            });

        match selected {
            Some(position) => {
                let (index, named) = candidates.swap_remove(position);
                Match::Found {
                    route: &self.routes[index],
                    index,
                    named: named.unwrap_or_default(),
                }
            }
            None => {
                let mut allowed = Vec::new();
                for (index, _) in &candidates {
                    for method in self.routes[*index].methods() {
                        if !allowed.contains(method) {
                            allowed.push(*method);
                        }
                    }
                }
                Match::MethodNotAllowed { allowed }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{flatten, Group, Handler};

    fn table(routes: Vec<Route>) -> RouteTable {
        RouteTable::build(routes).unwrap()
    }

    fn found(m: Match<'_>) -> (usize, Params) {
        match m {
            Match::Found { index, named, .. } => (index, named),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_literal_match() {
        let table = table(vec![
            Route::get("/", Handler::template("home")),
            Route::get("/about", Handler::template("about")),
        ]);

        assert_eq!(found(table.match_route(HttpMethod::Get, "/about")).0, 1);
        assert_eq!(found(table.match_route(HttpMethod::Get, "/about/")).0, 1);
        assert_eq!(found(table.match_route(HttpMethod::Get, "")).0, 0);
        assert!(matches!(
            table.match_route(HttpMethod::Get, "/About"),
            Match::NotFound
        ));
    }

    #[test]
    fn test_named_segments_captured() {
        let table = table(vec![Route::get(
            "/users/{user}/posts/{post}",
            Handler::template("post"),
        )]);

        let (_, named) = found(table.match_route(HttpMethod::Get, "/users/ada/posts/42"));
        assert_eq!(named.len(), 2);
        assert_eq!(named.get("user"), Some("ada"));
        assert_eq!(named.get("post"), Some("42"));

        assert!(matches!(
            table.match_route(HttpMethod::Get, "/users/ada/posts"),
            Match::NotFound
        ));
        assert!(matches!(
            table.match_route(HttpMethod::Get, "/users/ada/posts/42/extra"),
            Match::NotFound
        ));
    }

    #[test]
    fn test_constraint_is_anchored() {
        let table = table(vec![
            Route::get("/years/{year:\\d{4}}", Handler::template("year")),
            Route::get("/years/{slug}", Handler::template("slug")),
        ]);

        let (index, named) = found(table.match_route(HttpMethod::Get, "/years/2024"));
        assert_eq!(index, 0);
        assert_eq!(named.get("year"), Some("2024"));

        let (index, named) = found(table.match_route(HttpMethod::Get, "/years/20245"));
        assert_eq!(index, 1);
        assert_eq!(named.get("slug"), Some("20245"));
    }

    #[test]
    fn test_first_declared_wins() {
        let table = table(vec![
            Route::get("/posts/{id}", Handler::template("by-id")),
            Route::get("/posts/new", Handler::template("new")),
        ]);

        let (index, named) = found(table.match_route(HttpMethod::Get, "/posts/new"));
        assert_eq!(index, 0);
        assert_eq!(named.get("id"), Some("new"));
    }

    #[test]
    fn test_method_not_allowed_union() {
        let table = table(vec![
            Route::get("/items", Handler::template("list")),
            Route::new([HttpMethod::Post, HttpMethod::Get], "/items", Handler::template("create")),
            Route::delete("/items/{id}", Handler::template("delete")),
        ]);

        match table.match_route(HttpMethod::Put, "/items") {
            Match::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec![HttpMethod::Get, HttpMethod::Post])
            }
            other => panic!("expected MethodNotAllowed, got {:?}", other),
        }

        assert_eq!(found(table.match_route(HttpMethod::Post, "/items")).0, 1);
    }

    #[test]
    fn test_root_get_only_rejects_post() {
        let table = table(vec![Route::get("/", Handler::template("home"))]);
        match table.match_route(HttpMethod::Post, "/") {
            Match::MethodNotAllowed { allowed } => assert_eq!(allowed, vec![HttpMethod::Get]),
            other => panic!("expected MethodNotAllowed, got {:?}", other),
        }
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let table = table(vec![
            Route::get("/page", Handler::template("get")),
            Route::head("/explicit", Handler::template("head")),
            Route::get("/explicit", Handler::template("get")),
        ]);

        assert_eq!(found(table.match_route(HttpMethod::Head, "/page")).0, 0);
        assert_eq!(found(table.match_route(HttpMethod::Head, "/explicit")).0, 1);
    }

    #[test]
    fn test_flattened_group_routes() {
        let root = Group::root().group(
            Group::new("/api")
                .route(Route::get("/", Handler::template("api")))
                .group(Group::new("/dogs").route(Route::post("/{name}", Handler::template("dog")))),
        );
        let table = table(flatten(&root));

        assert_eq!(found(table.match_route(HttpMethod::Get, "/api")).0, 0);
        let (index, named) = found(table.match_route(HttpMethod::Post, "//api/dogs/rex/"));
        assert_eq!(index, 1);
        assert_eq!(named.get("name"), Some("rex"));
    }

    #[test]
    fn test_build_rejects_bad_patterns() {
        let cases = [
            "/users/{id}/{id}",
            "/users/{}",
            "/users/{id",
            "/users/id}",
            "/users/pre{id}",
            "/users/{id:[}",
            "/users/{my-id}",
        ];
        for pattern in cases {
            assert!(
                RouteTable::build(vec![Route::get(pattern, Handler::Undetermined)]).is_err(),
                "pattern {} should be rejected",
                pattern
            );
        }

        let duplicate = RouteTable::build(vec![Route::get("/{a}/{a}", Handler::Undetermined)]);
        assert!(matches!(duplicate, Err(RouteError::DuplicateParam { .. })));

        let constraint = RouteTable::build(vec![Route::get("/{a:(}", Handler::Undetermined)]);
        assert!(matches!(constraint, Err(RouteError::InvalidConstraint { .. })));
    }

    #[test]
    fn test_slash_inside_parameter_rejected() {
        let result = RouteTable::build(vec![Route::get(
            "/files/{p:[a-z]+/[a-z]+}",
            Handler::Undetermined,
        )]);
        match result {
            Err(RouteError::InvalidPattern { reason, .. }) => {
                assert!(reason.contains("'/'"), "unexpected reason: {}", reason);
                assert!(!reason.contains("unbalanced"));
            }
            other => panic!("expected InvalidPattern, got {:?}", other),
        }
    }

    #[test]
    fn test_constraint_whitespace_trimmed() {
        let table = table(vec![Route::get("/u/{ id : \\d+ }", Handler::template("user"))]);

        let (_, named) = found(table.match_route(HttpMethod::Get, "/u/5"));
        assert_eq!(named.get("id"), Some("5"));
        assert!(matches!(
            table.match_route(HttpMethod::Get, "/u/x"),
            Match::NotFound
        ));

        let empty = RouteTable::build(vec![Route::get("/u/{id: }", Handler::Undetermined)]);
        assert!(matches!(empty, Err(RouteError::InvalidPattern { .. })));
    }
}
