use thiserror::Error;

/// 统一的错误处理类型
///
/// 框架内部对外部协作者（模板、会话、数据库）的调用结果统一使用 `anyhow::Result`，
/// 通过 `.context()` 添加错误上下文信息。
///
/// # 示例
///
/// ```rust,ignore
/// use anyhow::{Context, Result};
///
/// fn load(path: &str) -> Result<String> {
///     std::fs::read_to_string(path).context(format!("Failed to read '{}'", path))
/// }
/// ```
pub use anyhow::Result;

/// 应用启动阶段的错误
///
/// 只覆盖启动期（配置加载、日志初始化、路由编译、服务器绑定）的失败；
/// 单个请求内的失败由 `waypoint-web` 的 `WebError` 表达。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("Failed to read configuration '{path}': {cause}")]
    ConfigRead { path: String, cause: String },

    #[error("Failed to parse configuration '{name}': {cause}")]
    ConfigParse { name: String, cause: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Route table error: {0}")]
    Routes(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("{0}")]
    Other(String),
}

pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;
