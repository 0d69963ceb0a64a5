mod controllers;
mod models;

use std::path::{Path, PathBuf};

use waypoint_core::prelude::*;
use waypoint_core::{APP_ROUTES_FILE, TEMPLATES_ENABLED, TEMPLATES_PATTERN};
use waypoint_web::prelude::*;
use waypoint_web::template::DEFAULT_TEMPLATE_PATTERN;

fn config_dir() -> PathBuf {
    // 支持从工作区根目录或 demo 目录启动
    if Path::new("demos/web-demo/application.toml").exists() {
        PathBuf::from("demos/web-demo")
    } else {
        PathBuf::from(".")
    }
}

/// 在 API 路由组的响应上加一个标识头
fn powered_by() -> std::sync::Arc<dyn Middleware> {
    middleware_fn(|exchange: &mut Exchange<'_>, next: Next<'_>| -> WebResult<()> {
        next.run(exchange)?;
        exchange.response.set_header("X-Powered-By", "waypoint");
        Ok(())
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base = config_dir();
    let env = Environment::new()
        .with_source(TomlPropertySource::from_file(base.join("application.toml"))?)
        .with_source(EnvironmentPropertySource::new("APP_"));

    LoggingConfig::from_environment(&env)?.init()?;

    let routes_file = base.join(env.get_string_or(APP_ROUTES_FILE, "routes.toml"));
    let route_config = RouteConfig::from_file(&routes_file)?;

    let mut registry = Registry::from_inventory();
    registry.register_middleware_instance("powered_by", powered_by());

    let renderer = if env.get_bool_or(TEMPLATES_ENABLED, true) {
        let pattern = base.join(env.get_string_or(TEMPLATES_PATTERN, DEFAULT_TEMPLATE_PATTERN));
        TeraRenderer::new(&pattern.to_string_lossy())?
    } else {
        TeraRenderer::from_raw_templates([("home.html", "<h1>Waypoint web demo</h1>")])?
    };
    let services = Services::new()
        .with_renderer(renderer)
        .with_session_store(MemorySessionStore::from_environment(&env));

    let kernel = Kernel::builder()
        .route_config(route_config)
        .registry(registry)
        .services(services)
        .settings(KernelSettings::from_environment(&env))
        .build()?;

    let properties = ServerProperties::from_environment(&env)?;
    let address = properties.address();

    tracing::info!("Loaded {} routes from {}", kernel.routes().len(), routes_file.display());
    println!("\n=== Waypoint Web Demo ===");
    println!("  GET  http://{}/", address);
    println!("  GET  http://{}/about", address);
    println!("  GET  http://{}/visits", address);
    println!("  GET  http://{}/hello/{{name}}", address);
    println!("  GET  http://{}/api/users", address);
    println!("  POST http://{}/api/users", address);
    println!("  GET  http://{}/api/users/{{id}}", address);
    println!("  GET  http://{}/api/users/{{id}}/page", address);
    println!("  GET  http://{}/api/users/search?name=al\n", address);

    WebServer::new(kernel, properties).run().await?;
    Ok(())
}
