//! 框架配置常量定义
//!
//! 定义所有框架使用的配置键名称，确保各 crate 使用相同的标识符

// ==================== 应用配置 ====================

/// 是否启用调试模式（错误响应中显示详细信息）
pub const APP_DEBUG: &str = "app.debug";

/// 应用是否启用（false 时所有请求返回 503）
pub const APP_ENABLED: &str = "app.enabled";

/// 路由表文件路径
pub const APP_ROUTES_FILE: &str = "app.routes-file";

/// 会话空闲超时（秒）
pub const SESSION_IDLE_TIMEOUT: &str = "app.session.idle-timeout-secs";

// ==================== 模板配置 ====================

/// 是否启用 Tera 模板引擎
pub const TEMPLATES_ENABLED: &str = "app.templates.enabled";

/// Tera 模板模式
pub const TEMPLATES_PATTERN: &str = "app.templates.pattern";

/// 404 页面模板
pub const TEMPLATES_NOT_FOUND: &str = "app.templates.not-found";

/// 405 页面模板
pub const TEMPLATES_METHOD_NOT_ALLOWED: &str = "app.templates.method-not-allowed";

/// 503 页面模板
pub const TEMPLATES_UNAVAILABLE: &str = "app.templates.unavailable";

// ==================== Server 配置 ====================

/// 服务器监听地址
pub const SERVER_HOST: &str = "server.host";

/// 服务器监听端口
pub const SERVER_PORT: &str = "server.port";

/// 请求体大小上限（字节）
pub const SERVER_MAX_BODY_BYTES: &str = "server.max-body-bytes";

// ==================== 日志配置 ====================

/// 日志级别
pub const LOGGING_LEVEL: &str = "logging.level";

/// 日志格式
pub const LOGGING_FORMAT: &str = "logging.format";

/// 自定义过滤器
pub const LOGGING_FILTER: &str = "logging.filter";
