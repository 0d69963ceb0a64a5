use serde::{Deserialize, Serialize};
use waypoint_validator::{Validate, ValidationResult, ValidationRules, Validator};

// ==================== 数据模型 ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub joined: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> ValidationResult<()> {
        Validator::new()
            .check(ValidationRules::not_blank(&self.name, "name"))
            .check(ValidationRules::length(&self.name, "name", Some(2), Some(32)))
            .check(ValidationRules::email(&self.email, "email"))
            .finish()
    }
}

