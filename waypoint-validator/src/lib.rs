//! Waypoint Validator - 参数验证模块
//!
//! 验证逻辑返回类型化的结果（成功或字段错误列表），
//! 由 Web 内核在请求边界统一转换为 400 响应。

pub mod error;
pub mod validator;

pub use error::*;
pub use validator::*;
