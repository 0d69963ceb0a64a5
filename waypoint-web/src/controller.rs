//! 终端处理器：控制器动作和模板渲染
//!
//! 控制器在路由被选中时按需构造（构造参数来自路由表），然后调用指定的动作。
//! 动作返回 [`Reply`]，由终端处理器写入响应；结构化值在发送时编码为 JSON。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::exception_handler::WebResult;
use crate::pipeline::{Exchange, Terminal};
use crate::request::Request;
use crate::response::Body;

/// 控制器动作的返回值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Reply {
    /// 不修改响应体（动作已直接操作响应）
    #[default]
    Empty,
    Text(String),
    Json(Value),
}

impl Reply {
    /// 序列化任意值为结构化回复
    pub fn json<T: Serialize>(value: &T) -> WebResult<Self> {
        Ok(Reply::Json(serde_json::to_value(value)?))
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_string())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Json(value)
    }
}

/// 已注册的控制器动作：接收构造参数和交换上下文
pub type ActionFn = Arc<dyn Fn(&[Value], &mut Exchange<'_>) -> WebResult<Reply> + Send + Sync>;

/// 调用控制器动作的终端处理器
pub struct ActionTerminal {
    action: ActionFn,
    args: Vec<Value>,
}

impl ActionTerminal {
    pub fn new(action: ActionFn, args: Vec<Value>) -> Self {
        Self { action, args }
    }
}

impl Terminal for ActionTerminal {
    fn call(&self, exchange: &mut Exchange<'_>) -> WebResult<()> {
        match (self.action)(&self.args, exchange)? {
            Reply::Empty => {}
            Reply::Text(text) => {
                exchange.response.write(text);
            }
            Reply::Json(value) => {
                exchange.response.set_body(Body::Json(value));
            }
        }
        Ok(())
    }
}

/// 渲染模板的终端处理器
///
/// 模板变量：中间件附加的数据、命名参数（顶层）以及 `query`
pub struct TemplateTerminal {
    name: String,
}

impl TemplateTerminal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Terminal for TemplateTerminal {
    fn call(&self, exchange: &mut Exchange<'_>) -> WebResult<()> {
        let variables = template_variables(&exchange.request);
        let html = exchange.render(&self.name, &variables)?;
        exchange.response.write(html);
        Ok(())
    }
}

pub(crate) fn template_variables(request: &Request) -> Value {
    let mut variables = request.data().clone();
    for (name, value) in request.named().iter() {
        variables.insert(name.to_string(), Value::String(value.to_string()));
    }
    let query: Map<String, Value> = request
        .query_params()
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    variables.insert("query".to_string(), Value::Object(query));
    variables.insert(
        "path".to_string(),
        Value::String(request.path().to_string()),
    );
    Value::Object(variables)
}
