//! Tera 模板渲染器
//!
//! ```ignore
//! let renderer = TeraRenderer::from_environment(&env)?;
//! let services = Services::new().with_renderer(renderer);
//! ```

use serde_json::Value;
use tera::{Context, Tera};
use waypoint_core::{Environment, TEMPLATES_PATTERN};

use crate::services::TemplateRenderer;

pub const DEFAULT_TEMPLATE_PATTERN: &str = "templates/**/*";

/// 模板错误类型
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to load templates from '{pattern}': {source}")]
    Load {
        pattern: String,
        #[source]
        source: tera::Error,
    },

    #[error("Failed to parse inline templates: {0}")]
    Parse(#[source] tera::Error),

    #[error("Template variables must be an object")]
    InvalidContext(#[source] tera::Error),
}

/// 基于 Tera 的模板渲染器
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    /// 按 glob 模式加载模板
    pub fn new(pattern: &str) -> Result<Self, TemplateError> {
        let tera = Tera::new(pattern).map_err(|source| TemplateError::Load {
            pattern: pattern.to_string(),
            source,
        })?;
        tracing::info!(
            pattern,
            templates = tera.get_template_names().count(),
            "Tera templates loaded"
        );
        Ok(Self { tera })
    }

    /// 从内存中的 (名称, 源码) 构建，用于测试以及未启用模板目录的部署
    pub fn from_raw_templates<I, N, C>(templates: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: AsRef<str>,
        C: AsRef<str>,
    {
        let mut tera = Tera::default();
        tera.add_raw_templates(templates)
            .map_err(TemplateError::Parse)?;
        Ok(Self { tera })
    }

    pub fn from_tera(tera: Tera) -> Self {
        Self { tera }
    }

    /// 从配置读取 `app.templates.pattern`
    pub fn from_environment(env: &Environment) -> Result<Self, TemplateError> {
        let pattern = env.get_string_or(TEMPLATES_PATTERN, DEFAULT_TEMPLATE_PATTERN);
        Self::new(&pattern)
    }
}

impl TemplateRenderer for TeraRenderer {
    fn render(&self, name: &str, variables: &Value) -> anyhow::Result<String> {
        let context = Context::from_value(variables.clone()).map_err(TemplateError::InvalidContext)?;
        let html = self.tera.render(name, &context)?;
        Ok(html)
    }
}
