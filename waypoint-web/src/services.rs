//! 外部协作者接口
//!
//! 核心只通过这里的窄接口使用模板渲染、会话存储和查询服务。
//! [`Services`] 在启动时装配一次，随每个请求的 [`Exchange`](crate::pipeline::Exchange)
//! 显式传递给中间件和处理器。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use waypoint_core::{Environment, SESSION_IDLE_TIMEOUT};

/// 模板渲染器
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, variables: &Value) -> Result<String>;
}

/// 会话 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `SessionStore::start` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSession {
    pub id: SessionId,
    /// 是否新建了会话（客户端需要收到新的会话 cookie）
    pub created: bool,
}

/// 会话存储，以会话 ID 为键；实现方自行负责并发同步
pub trait SessionStore: Send + Sync {
    /// 恢复已存在的会话，或在 ID 缺失/未知时新建会话
    fn start(&self, id: Option<&str>) -> Result<StartedSession>;

    fn get(&self, id: &SessionId, key: &str) -> Result<Option<Value>>;

    fn set(&self, id: &SessionId, key: &str, value: Value) -> Result<()>;

    fn destroy(&self, id: &SessionId) -> Result<()>;
}

/// 查询结果行
pub type Row = Map<String, Value>;

/// 持久化/查询服务
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>>;
}

/// 请求处理期间可用的协作者集合
#[derive(Clone, Default)]
pub struct Services {
    renderer: Option<Arc<dyn TemplateRenderer>>,
    sessions: Option<Arc<dyn SessionStore>>,
    database: Option<Arc<dyn QueryExecutor>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(mut self, renderer: impl TemplateRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn with_session_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.sessions = Some(Arc::new(store));
        self
    }

    pub fn with_query_executor(mut self, executor: impl QueryExecutor + 'static) -> Self {
        self.database = Some(Arc::new(executor));
        self
    }

    pub fn renderer(&self) -> Option<&dyn TemplateRenderer> {
        self.renderer.as_deref()
    }

    pub fn session_store(&self) -> Option<&dyn SessionStore> {
        self.sessions.as_deref()
    }

    pub fn query_executor(&self) -> Option<&dyn QueryExecutor> {
        self.database.as_deref()
    }

    /// 渲染模板；未配置渲染器时返回错误
    pub fn render(&self, name: &str, variables: &Value) -> Result<String> {
        self.renderer
            .as_ref()
            .ok_or_else(|| anyhow!("No template renderer configured (rendering '{}')", name))?
            .render(name, variables)
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("renderer", &self.renderer.is_some())
            .field("sessions", &self.sessions.is_some())
            .field("database", &self.database.is_some())
            .finish()
    }
}

/// 绑定到某个会话 ID 的会话句柄
pub struct Session<'a> {
    store: &'a dyn SessionStore,
    id: SessionId,
}

impl<'a> Session<'a> {
    pub fn new(store: &'a dyn SessionStore, id: SessionId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.store.get(&self.id, key)
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store.set(&self.id, key, value)
    }

    pub fn destroy(self) -> Result<()> {
        self.store.destroy(&self.id)
    }
}

/// 默认会话空闲超时（秒）
pub const DEFAULT_SESSION_IDLE_SECS: i64 = 30 * 60;

struct SessionEntry {
    data: Map<String, Value>,
    last_access: DateTime<Utc>,
}

/// 内存会话存储
///
/// 每次访问刷新会话的最后访问时间；`start` 时清理空闲超过 `idle_timeout` 的会话。
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    idle_timeout: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(Duration::seconds(DEFAULT_SESSION_IDLE_SECS))
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// 从配置读取 `app.session.idle-timeout-secs`
    pub fn from_environment(env: &Environment) -> Self {
        let secs = env.get_i64_or(SESSION_IDLE_TIMEOUT, DEFAULT_SESSION_IDLE_SECS);
        Self::with_idle_timeout(Duration::seconds(secs))
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn is_expired(&self, entry: &SessionEntry, now: DateTime<Utc>) -> bool {
        now - entry.last_access >= self.idle_timeout
    }

    /// 清理所有空闲超时的会话，返回清理数量
    pub fn evict_idle(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "Idle sessions evicted");
        }
        evicted
    }
}

impl fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("sessions", &self.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl SessionStore for MemorySessionStore {
    fn start(&self, id: Option<&str>) -> Result<StartedSession> {
        self.evict_idle();

        if let Some(id) = id {
            if let Some(entry) = self.sessions.write().get_mut(id) {
                entry.last_access = Utc::now();
                return Ok(StartedSession {
                    id: SessionId::new(id),
                    created: false,
                });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.write().insert(
            id.clone(),
            SessionEntry {
                data: Map::new(),
                last_access: Utc::now(),
            },
        );
        tracing::debug!(session = %id, "Session created");
        Ok(StartedSession {
            id: SessionId::new(id),
            created: true,
        })
    }

    fn get(&self, id: &SessionId, key: &str) -> Result<Option<Value>> {
        let mut sessions = self.sessions.write();
        Ok(sessions.get_mut(id.as_str()).and_then(|entry| {
            entry.last_access = Utc::now();
            entry.data.get(key).cloned()
        }))
    }

    fn set(&self, id: &SessionId, key: &str, value: Value) -> Result<()> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get_mut(id.as_str())
            .ok_or_else(|| anyhow!("Session '{}' does not exist", id))?;
        entry.last_access = Utc::now();
        entry.data.insert(key.to_string(), value);
        Ok(())
    }

    fn destroy(&self, id: &SessionId) -> Result<()> {
        self.sessions.write().remove(id.as_str());
        tracing::debug!(session = %id, "Session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_services_without_renderer() {
        let services = Services::new();
        assert!(services.render("x", &json!({})).is_err());
        assert!(services.session_store().is_none());
    }

    #[test]
    fn test_memory_session_lifecycle() {
        let store = MemorySessionStore::new();

        let started = store.start(None).unwrap();
        assert!(started.created);

        let resumed = store.start(Some(started.id.as_str())).unwrap();
        assert!(!resumed.created);
        assert_eq!(resumed.id, started.id);

        let session = Session::new(&store, resumed.id);
        session.set("user", json!("ada")).unwrap();
        assert_eq!(session.get("user").unwrap(), Some(json!("ada")));
        session.destroy().unwrap();
        assert!(store.is_empty());

        let unknown = store.start(Some("forged")).unwrap();
        assert!(unknown.created);
        assert_ne!(unknown.id.as_str(), "forged");
    }

    #[test]
    fn test_expired_session_is_recreated() {
        let store = MemorySessionStore::with_idle_timeout(Duration::zero());

        let first = store.start(None).unwrap();
        Session::new(&store, first.id.clone())
            .set("user", json!("ada"))
            .unwrap();

        let second = store.start(Some(first.id.as_str())).unwrap();
        assert!(second.created);
        assert_ne!(second.id, first.id);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first.id, "user").unwrap(), None);
    }

    #[test]
    fn test_evict_idle_keeps_active_sessions() {
        let store = MemorySessionStore::new();
        store.start(None).unwrap();
        store.start(None).unwrap();
        assert_eq!(store.evict_idle(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_idle_timeout_from_environment() {
        use waypoint_core::{ConfigValue, MapPropertySource};

        let env = Environment::new().with_source(
            MapPropertySource::new("test").with_property(SESSION_IDLE_TIMEOUT, ConfigValue::Int(90)),
        );
        let store = MemorySessionStore::from_environment(&env);
        assert_eq!(store.idle_timeout(), Duration::seconds(90));

        let defaults = MemorySessionStore::from_environment(&Environment::new());
        assert_eq!(defaults.idle_timeout(), Duration::seconds(DEFAULT_SESSION_IDLE_SECS));
    }
}
