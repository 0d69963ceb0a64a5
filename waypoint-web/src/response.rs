//! 响应模型
//!
//! 响应在整个管道执行过程中可变，只有内核最终化时的状态对外可见

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::headers::Headers;

pub const DEFAULT_CONTENT_TYPE: &str = "text/html";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// 响应体
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    /// 原样发送的文本
    Text(String),
    /// 结构化值，发送时编码为 JSON
    Json(Value),
}

/// HTTP 响应
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    content_type: String,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Headers::new(),
            body: Body::Empty,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// 创建 JSON 响应
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, serde_json::Error> {
        let mut response = Self::with_status(status);
        response.set_json(value)?;
        Ok(response)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("content-type") {
            return Some(&self.content_type);
        }
        self.headers.get(name)
    }

    /// 设置响应头；`Content-Type` 会写入内容类型字段
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = value.into();
        } else {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: Body) -> &mut Self {
        self.body = body;
        self
    }

    /// 设置文本响应体
    pub fn write(&mut self, text: impl Into<String>) -> &mut Self {
        self.body = Body::Text(text.into());
        self
    }

    /// 设置结构化响应体
    pub fn set_json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, serde_json::Error> {
        self.body = Body::Json(serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) -> &mut Self {
        self.content_type = content_type.into();
        self
    }

    /// 重定向到指定地址（302）
    pub fn redirect(&mut self, location: impl Into<String>) -> &mut Self {
        self.status = StatusCode::FOUND;
        self.headers.insert("Location", location);
        self
    }

    /// 最终化响应，产出可发送的状态、头部和响应体
    ///
    /// - 成功状态且响应体为结构化值：编码为 JSON，内容类型强制为 `application/json`
    /// - 其他情况：文本原样发送；非成功状态下的结构化值仍编码为 JSON，但保留已设置的内容类型
    pub fn send(self) -> SentResponse {
        let mut content_type = self.content_type;
        let body = match self.body {
            Body::Empty => String::new(),
            Body::Text(text) => text,
            Body::Json(value) => {
                if self.status.is_success() {
                    content_type = JSON_CONTENT_TYPE.to_string();
                }
                value.to_string()
            }
        };

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        headers.push(("Content-Type".to_string(), content_type));
        headers.extend(self.headers);

        SentResponse {
            status: self.status,
            headers,
            body,
        }
    }
}

/// 最终化后的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SentResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let response = Response::new();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.content_type(), DEFAULT_CONTENT_TYPE);
        assert_eq!(response.body(), &Body::Empty);

        let sent = response.send();
        assert_eq!(sent.body, "");
        assert_eq!(sent.header("content-type"), Some(DEFAULT_CONTENT_TYPE));
    }

    #[test]
    fn test_structured_body_forces_json() {
        let mut response = Response::new();
        response.set_json(&json!({"id": 3, "tags": ["a"]})).unwrap();

        let sent = response.send();
        assert_eq!(sent.header("Content-Type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(sent.body, r#"{"id":3,"tags":["a"]}"#);
    }

    #[test]
    fn test_structured_body_on_error_keeps_content_type() {
        let mut response = Response::with_status(StatusCode::UNPROCESSABLE_ENTITY);
        response.set_content_type("application/problem+json");
        response.set_body(Body::Json(json!({"title": "bad"})));

        let sent = response.send();
        assert_eq!(sent.header("content-type"), Some("application/problem+json"));
        assert_eq!(sent.body, r#"{"title":"bad"}"#);
    }

    #[test]
    fn test_text_sent_verbatim() {
        let mut response = Response::new();
        response.set_content_type("text/plain").write("  hello ");
        let sent = response.send();
        assert_eq!(sent.body, "  hello ");
        assert_eq!(sent.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_header_order_and_overwrite() {
        let mut response = Response::new();
        response
            .set_header("X-B", "1")
            .set_header("X-A", "2")
            .set_header("x-b", "3")
            .set_header("content-type", "text/plain");

        let sent = response.send();
        assert_eq!(
            sent.headers,
            vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("X-B".to_string(), "3".to_string()),
                ("X-A".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_redirect() {
        let mut response = Response::new();
        response.redirect("/login");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/login"));
    }
}
