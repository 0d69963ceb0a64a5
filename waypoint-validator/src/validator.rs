use crate::error::{FieldErrors, ValidationError, ValidationResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Display;

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// 验证器 trait
///
/// 处理器中通常写作 `input.validate()?`，失败会被内核转换为 400 响应
pub trait Validate {
    fn validate(&self) -> ValidationResult<()>;
}

/// 验证规则
pub struct ValidationRules;

impl ValidationRules {
    fn fail(field: &str, custom: Option<&str>, default: impl FnOnce() -> String) -> ValidationResult<()> {
        let message = custom.map(str::to_string).unwrap_or_else(default);
        Err(ValidationError::field_error(field, message))
    }

    /// 验证非空（Option）
    pub fn not_null<T>(value: &Option<T>, field: &str) -> ValidationResult<()> {
        Self::not_null_with_message(value, field, None)
    }

    /// 验证非空（Option）（带自定义消息）
    pub fn not_null_with_message<T>(
        value: &Option<T>,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.is_none() {
            return Self::fail(field, custom_message, || format!("{} must not be null", field));
        }
        Ok(())
    }

    /// 验证字符串非空
    pub fn not_empty(value: &str, field: &str) -> ValidationResult<()> {
        if value.is_empty() {
            return Self::fail(field, None, || format!("{} must not be empty", field));
        }
        Ok(())
    }

    /// 验证字符串非空白
    pub fn not_blank(value: &str, field: &str) -> ValidationResult<()> {
        Self::not_blank_with_message(value, field, None)
    }

    /// 验证字符串非空白（带自定义消息）
    pub fn not_blank_with_message(
        value: &str,
        field: &str,
        custom_message: Option<&str>,
    ) -> ValidationResult<()> {
        if value.trim().is_empty() {
            return Self::fail(field, custom_message, || format!("{} must not be blank", field));
        }
        Ok(())
    }

    /// 验证字符串长度（按字符计数）
    pub fn length(
        value: &str,
        field: &str,
        min: Option<usize>,
        max: Option<usize>,
    ) -> ValidationResult<()> {
        let len = value.chars().count();

        if let Some(min_len) = min {
            if len < min_len {
                return Self::fail(field, None, || {
                    format!("{} length must be at least {}, but was {}", field, min_len, len)
                });
            }
        }

        if let Some(max_len) = max {
            if len > max_len {
                return Self::fail(field, None, || {
                    format!("{} length must be at most {}, but was {}", field, max_len, len)
                });
            }
        }

        Ok(())
    }

    /// 验证数值范围
    pub fn range<T: PartialOrd + Display>(
        value: T,
        field: &str,
        min: Option<T>,
        max: Option<T>,
    ) -> ValidationResult<()> {
        if let Some(min_val) = &min {
            if &value < min_val {
                return Self::fail(field, None, || {
                    format!("{} must be at least {}, but was {}", field, min_val, value)
                });
            }
        }

        if let Some(max_val) = &max {
            if &value > max_val {
                return Self::fail(field, None, || {
                    format!("{} must be at most {}, but was {}", field, max_val, value)
                });
            }
        }

        Ok(())
    }

    /// 验证邮箱格式
    pub fn email(value: &str, field: &str) -> ValidationResult<()> {
        if !EMAIL_REGEX.is_match(value) {
            return Self::fail(field, None, || format!("{} must be a valid email address", field));
        }
        Ok(())
    }

    /// 验证正则表达式
    pub fn pattern(value: &str, field: &str, pattern: &str) -> ValidationResult<()> {
        let regex = Regex::new(pattern)
            .map_err(|e| ValidationError::new(format!("Invalid regex pattern: {}", e)))?;

        if !regex.is_match(value) {
            return Self::fail(field, None, || format!("{} must match pattern: {}", field, pattern));
        }

        Ok(())
    }
}

/// 验证结果收集器
///
/// 依次检查所有规则，收集全部字段错误后一次性返回
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors.entry(field.into()).or_default().push(message.into());
        self
    }

    pub fn check(&mut self, result: ValidationResult<()>) -> &mut Self {
        match result {
            Ok(()) => {}
            Err(ValidationError::FieldErrors(errors)) => {
                for (field, messages) in errors {
                    self.errors.entry(field).or_default().extend(messages);
                }
            }
            Err(ValidationError::ValidationFailed(message)) => {
                self.errors.entry(String::new()).or_default().push(message);
            }
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(&mut self) -> ValidationResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::FieldErrors(std::mem::take(&mut self.errors)))
        }
    }
}
