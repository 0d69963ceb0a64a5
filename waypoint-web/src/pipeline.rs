//! 中间件管道
//!
//! 管道是一个中间件向量加一个终端处理器。`Next` 只携带一个游标：
//! `Next::run` 调用游标处的中间件并传入游标 +1 的 `Next`，到达末尾时调用终端处理器。
//! 组合管道时不为每个请求构造闭包。
//!
//! 执行顺序：全局中间件 → 路由组继承的中间件（由外到内）→ 路由自身中间件 → 终端处理器。
//! 不调用 `next` 的中间件会终止后续链条；多次调用 `next` 会多次遍历下游。

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::exception_handler::{WebError, WebResult};
use crate::request::Request;
use crate::response::Response;
use crate::services::{Services, Session, SessionId};

/// 一次请求的交换上下文：请求、响应和协作者
pub struct Exchange<'s> {
    pub request: Request,
    pub response: Response,
    services: &'s Services,
}

impl<'s> Exchange<'s> {
    pub fn new(request: Request, services: &'s Services) -> Self {
        Self {
            request,
            response: Response::new(),
            services,
        }
    }

    pub fn services(&self) -> &'s Services {
        self.services
    }

    /// 通过配置的渲染器渲染模板
    pub fn render(&self, name: &str, variables: &Value) -> WebResult<String> {
        Ok(self.services.render(name, variables)?)
    }

    /// 当前请求的会话；需要先经过 `session` 中间件
    pub fn session(&self) -> WebResult<Session<'s>> {
        let store = self
            .services
            .session_store()
            .ok_or_else(|| WebError::configuration("No session store configured"))?;
        let id = self
            .request
            .extensions()
            .get::<SessionId>()
            .cloned()
            .ok_or_else(|| WebError::configuration("No session started for this request"))?;
        Ok(Session::new(store, id))
    }

    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }
}

/// 中间件：接收交换上下文和 `next`，决定是否继续执行下游
pub trait Middleware: Send + Sync {
    fn handle(&self, exchange: &mut Exchange<'_>, next: Next<'_>) -> WebResult<()>;
}

/// 终端处理器：没有 `next`
pub trait Terminal: Send + Sync {
    fn call(&self, exchange: &mut Exchange<'_>) -> WebResult<()>;
}

struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Exchange<'_>, Next<'_>) -> WebResult<()> + Send + Sync,
{
    fn handle(&self, exchange: &mut Exchange<'_>, next: Next<'_>) -> WebResult<()> {
        (self.0)(exchange, next)
    }
}

struct FnTerminal<F>(F);

impl<F> Terminal for FnTerminal<F>
where
    F: Fn(&mut Exchange<'_>) -> WebResult<()> + Send + Sync,
{
    fn call(&self, exchange: &mut Exchange<'_>) -> WebResult<()> {
        (self.0)(exchange)
    }
}

/// 用闭包创建中间件
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut Exchange<'_>, Next<'_>) -> WebResult<()> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// 用闭包创建终端处理器
pub fn terminal_fn<F>(f: F) -> Arc<dyn Terminal>
where
    F: Fn(&mut Exchange<'_>) -> WebResult<()> + Send + Sync + 'static,
{
    Arc::new(FnTerminal(f))
}

/// 组合好的管道
pub struct Pipeline {
    units: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Terminal>,
}

impl Pipeline {
    /// 组合全局中间件、路由中间件（已包含继承自路由组的部分）和终端处理器
    pub fn compose(
        global: &[Arc<dyn Middleware>],
        route: impl IntoIterator<Item = Arc<dyn Middleware>>,
        terminal: Arc<dyn Terminal>,
    ) -> Self {
        let mut units = global.to_vec();
        units.extend(route);
        Self { units, terminal }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// 从第一个中间件开始执行
    pub fn run(&self, exchange: &mut Exchange<'_>) -> WebResult<()> {
        self.invoke(0, exchange)
    }

    fn invoke(&self, cursor: usize, exchange: &mut Exchange<'_>) -> WebResult<()> {
        match self.units.get(cursor) {
            Some(unit) => unit.handle(
                exchange,
                Next {
                    pipeline: self,
                    cursor: cursor + 1,
                },
            ),
            None => self.terminal.call(exchange),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("units", &self.units.len())
            .finish()
    }
}

/// 指向管道中下一个单元的游标
#[derive(Clone, Copy)]
pub struct Next<'p> {
    pipeline: &'p Pipeline,
    cursor: usize,
}

impl<'p> Next<'p> {
    /// 执行下游的中间件和终端处理器
    pub fn run(self, exchange: &mut Exchange<'_>) -> WebResult<()> {
        self.pipeline.invoke(self.cursor, exchange)
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("cursor", &self.cursor).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::HttpMethod;
    use parking_lot::Mutex;

    fn exchange(services: &Services) -> Exchange<'_> {
        Exchange::new(Request::builder(HttpMethod::Get, "/").build(), services)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Middleware> {
        let log = Arc::clone(log);
        middleware_fn(move |exchange, next| {
            log.lock().push(format!("{} before", name));
            next.run(exchange)?;
            log.lock().push(format!("{} after", name));
            Ok(())
        })
    }

    #[test]
    fn test_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal_log = Arc::clone(&log);
        let pipeline = Pipeline::compose(
            &[recorder(&log, "global")],
            vec![recorder(&log, "group"), recorder(&log, "route")],
            terminal_fn(move |exchange| {
                terminal_log.lock().push("terminal".to_string());
                exchange.response.write("done");
                Ok(())
            }),
        );

        let services = Services::new();
        let mut exchange = exchange(&services);
        pipeline.run(&mut exchange).unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "global before",
                "group before",
                "route before",
                "terminal",
                "route after",
                "group after",
                "global after",
            ]
        );
    }

    #[test]
    fn test_short_circuit_skips_downstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal_log = Arc::clone(&log);
        let pipeline = Pipeline::compose(
            &[recorder(&log, "global")],
            vec![
                middleware_fn(|exchange, _next| {
                    exchange.response.set_status(http::StatusCode::UNAUTHORIZED);
                    Ok(())
                }),
                recorder(&log, "route"),
            ],
            terminal_fn(move |_| {
                terminal_log.lock().push("terminal".to_string());
                Ok(())
            }),
        );

        let services = Services::new();
        let mut exchange = exchange(&services);
        pipeline.run(&mut exchange).unwrap();

        assert_eq!(*log.lock(), vec!["global before", "global after"]);
        assert_eq!(exchange.response.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_next_may_run_twice() {
        let count = Arc::new(Mutex::new(0));
        let terminal_count = Arc::clone(&count);
        let pipeline = Pipeline::compose(
            &[],
            vec![middleware_fn(|exchange, next| {
                next.run(exchange)?;
                next.run(exchange)
            })],
            terminal_fn(move |_| {
                *terminal_count.lock() += 1;
                Ok(())
            }),
        );

        let services = Services::new();
        pipeline.run(&mut exchange(&services)).unwrap();
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_error_stops_chain() {
        let pipeline = Pipeline::compose(
            &[middleware_fn(|_, _| Err(WebError::configuration("broken")))],
            Vec::new(),
            terminal_fn(|_| panic!("terminal must not run")),
        );

        let services = Services::new();
        let result = pipeline.run(&mut exchange(&services));
        assert!(matches!(result, Err(WebError::Configuration(_))));
    }

    #[test]
    fn test_session_requires_store() {
        let services = Services::new();
        let exchange = exchange(&services);
        assert!(matches!(exchange.session(), Err(WebError::Configuration(_))));
    }
}
