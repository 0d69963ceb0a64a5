use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// 字段名 -> 错误消息列表（按字段名排序，保证响应体稳定）
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// 验证错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Field validation failed: {}", join_fields(.0))]
    FieldErrors(FieldErrors),
}

fn join_fields(errors: &FieldErrors) -> String {
    errors.keys().cloned().collect::<Vec<_>>().join(", ")
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn field_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.into()]);
        Self::FieldErrors(errors)
    }

    /// 追加字段错误；若当前是整体错误，则保留其消息并转换为字段错误形式
    pub fn add_field_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        if let Self::ValidationFailed(general) = self {
            let general = std::mem::take(general);
            *self = Self::FieldErrors(FieldErrors::from([(String::new(), vec![general])]));
        }
        if let Self::FieldErrors(errors) = self {
            errors.entry(field.into()).or_default().push(message.into());
        }
    }

    pub fn merge(&mut self, other: ValidationError) {
        match other {
            Self::FieldErrors(errors) => {
                for (field, messages) in errors {
                    for message in messages {
                        self.add_field_error(field.clone(), message);
                    }
                }
            }
            Self::ValidationFailed(message) => self.add_field_error(String::new(), message),
        }
    }

    /// 转换为可序列化的错误详情
    ///
    /// 整体错误（无字段）以空字符串作为字段名
    pub fn details(&self) -> ValidationDetails {
        let errors = match self {
            Self::FieldErrors(errors) => errors.clone(),
            Self::ValidationFailed(message) => {
                FieldErrors::from([(String::new(), vec![message.clone()])])
            }
        };
        ValidationDetails { errors }
    }
}

/// 400 响应体中的验证详情
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationDetails {
    pub errors: FieldErrors,
}

pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_collects_all_fields() {
        let mut error = ValidationError::field_error("name", "name must not be blank");
        error.merge(ValidationError::field_error("email", "email must be a valid email address"));
        error.merge(ValidationError::field_error("name", "name length must be at least 2, but was 0"));

        let ValidationError::FieldErrors(errors) = &error else {
            panic!("expected field errors");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(errors["name"].len(), 2);
        assert_eq!(error.to_string(), "Field validation failed: email, name");
    }

    #[test]
    fn test_general_error_becomes_field_map() {
        let mut error = ValidationError::new("payload rejected");
        error.add_field_error("age", "age must be at least 18, but was 3");

        let details = error.details();
        assert_eq!(details.errors[""], vec!["payload rejected".to_string()]);
        assert_eq!(details.errors["age"].len(), 1);
    }

    #[test]
    fn test_details_serialize() {
        let error = ValidationError::field_error("title", "title must not be empty");
        let json = serde_json::to_string(&error.details()).unwrap();
        assert_eq!(json, r#"{"errors":{"title":["title must not be empty"]}}"#);
    }
}
