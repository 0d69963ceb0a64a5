//! 请求模型
//!
//! 每个入站调用构造一个 `Request`，只在该调用内存在。
//! 命名参数由调度器匹配成功后写入一次；请求体按原样保存，JSON 解析延迟到首次访问并缓存。

use std::cell::OnceCell;
use std::collections::HashMap;
use std::net::SocketAddr;

use serde_json::{Map, Value};

use crate::headers::Headers;
use crate::method::HttpMethod;

/// 路由匹配得到的命名参数（按模式中出现的顺序）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.push(name, value);
        }
        params
    }
}

static NO_PARAMS: Params = Params::new();

/// 传输层元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub client_addr: Option<SocketAddr>,
    pub scheme: String,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            client_addr: None,
            scheme: "http".to_string(),
        }
    }
}

/// 请求体 JSON 解析失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed JSON body: {0}")]
pub struct BodyError(pub String);

/// HTTP 请求
#[derive(Debug)]
pub struct Request {
    method: HttpMethod,
    path: String,
    headers: Headers,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    body: Vec<u8>,
    parsed_body: OnceCell<Result<Value, BodyError>>,
    named: Option<Params>,
    data: Map<String, Value>,
    extensions: http::Extensions,
    transport: Transport,
}

impl Request {
    /// 创建请求构建器
    ///
    /// `target` 为请求目标，可以包含查询字符串和片段，例如 `/search?q=rust#top`
    pub fn builder(method: HttpMethod, target: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            target: target.into(),
            headers: Headers::new(),
            body: Vec::new(),
            transport: Transport::default(),
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// 请求路径（已去除查询字符串和片段）
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// 原始请求体
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 请求体文本（非 UTF-8 字节按替换字符处理）
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// 请求体 JSON，首次访问时解析并缓存结果
    pub fn json(&self) -> Result<&Value, BodyError> {
        self.parsed_body
            .get_or_init(|| {
                serde_json::from_slice(&self.body).map_err(|e| BodyError(e.to_string()))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// 命名参数；匹配前为空
    pub fn named(&self) -> &Params {
        self.named.as_ref().unwrap_or(&NO_PARAMS)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.named().get(name)
    }

    /// 写入命名参数，每个请求只能写入一次
    ///
    /// 返回 false 表示参数已经写入过，本次写入被忽略
    pub(crate) fn attach_named(&mut self, params: Params) -> bool {
        if self.named.is_some() {
            tracing::warn!(path = %self.path, "Named parameters already attached, ignoring");
            return false;
        }
        self.named = Some(params);
        true
    }

    /// 中间件附加的派生数据（例如解析并清理后的请求体字段）
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    /// 类型化的请求级附加值（会话 ID、请求 ID 等）
    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

/// 请求构建器
#[derive(Debug)]
pub struct RequestBuilder {
    method: HttpMethod,
    target: String,
    headers: Headers,
    body: Vec<u8>,
    transport: Transport,
}

impl RequestBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 设置 JSON 请求体并补充 Content-Type
    pub fn json(mut self, value: &Value) -> Self {
        self.body = value.to_string().into_bytes();
        if !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "application/json");
        }
        self
    }

    pub fn client_addr(mut self, addr: SocketAddr) -> Self {
        self.transport.client_addr = Some(addr);
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.transport.scheme = scheme.into();
        self
    }

    pub fn build(self) -> Request {
        let (path, query_string) = split_target(&self.target);
        let query = query_string.map(parse_query).unwrap_or_default();
        let cookies = self
            .headers
            .get("cookie")
            .map(parse_cookies)
            .unwrap_or_default();

        Request {
            method: self.method,
            path,
            headers: self.headers,
            query,
            cookies,
            body: self.body,
            parsed_body: OnceCell::new(),
            named: None,
            data: Map::new(),
            extensions: http::Extensions::new(),
            transport: self.transport,
        }
    }
}

/// 拆分请求目标为（路径，查询字符串）
fn split_target(target: &str) -> (String, Option<&str>) {
    let without_fragment = target.split_once('#').map_or(target, |(head, _)| head);
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query)
}

/// 解析查询字符串；重复键以最后一次出现为准
fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (name.trim().to_string(), value.to_string())
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}
