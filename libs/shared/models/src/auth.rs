use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub doctor_id: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// Claims of a verified token, before they are mapped onto an [`Identity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub doctor_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Closed set of caller roles. Patients are `User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "patient")]
    User,
    Doctor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Doctor => write!(f, "doctor"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" | "patient" => Ok(Role::User),
            "doctor" => Ok(Role::Doctor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// The authenticated caller every core operation is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
}

impl Identity {
    pub fn patient(user_id: Uuid) -> Self {
        Self { user_id, role: Role::User, doctor_id: None }
    }

    pub fn doctor(user_id: Uuid, doctor_id: Uuid) -> Self {
        Self { user_id, role: Role::Doctor, doctor_id: Some(doctor_id) }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Admin, doctor_id: None }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: Uuid,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_accepts_patient_alias() {
        assert_eq!("patient".parse::<Role>(), Ok(Role::User));
        assert_eq!("USER".parse::<Role>(), Ok(Role::User));
        assert_eq!("Doctor".parse::<Role>(), Ok(Role::Doctor));
        assert!("nurse".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde() {
        let role: Role = serde_json::from_str("\"patient\"").unwrap();
        assert_eq!(role, Role::User);
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }
}
