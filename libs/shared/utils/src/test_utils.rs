use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{Identity, Role};
use shared_models::error::AppError;

use crate::extractor::IdentityProvider;

pub struct TestConfig {
    pub jwt_secret: String,
    pub mobile_money_base_url: String,
    pub mobile_money_api_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            mobile_money_base_url: "http://localhost:54321".to_string(),
            mobile_money_api_key: "test-gateway-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            jwt_secret: self.jwt_secret.clone(),
            mobile_money_base_url: self.mobile_money_base_url.clone(),
            mobile_money_api_key: self.mobile_money_api_key.clone(),
            mobile_money_callback_url: "http://localhost:3000/payments/callbacks/mobile-money".to_string(),
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub role: Role,
    pub doctor_id: Option<Uuid>,
}

impl TestUser {
    pub fn patient() -> Self {
        Self { id: Uuid::new_v4(), role: Role::User, doctor_id: None }
    }

    pub fn doctor() -> Self {
        Self { id: Uuid::new_v4(), role: Role::Doctor, doctor_id: Some(Uuid::new_v4()) }
    }

    pub fn admin() -> Self {
        Self { id: Uuid::new_v4(), role: Role::Admin, doctor_id: None }
    }

    pub fn to_identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            role: self.role,
            doctor_id: self.doctor_id,
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let mut payload = json!({
            "sub": user.id,
            "email": format!("{}@example.com", user.role),
            "role": user.role.to_string(),
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        if let Some(doctor_id) = user.doctor_id {
            payload["doctor_id"] = json!(doctor_id);
        }

        Self::sign(&payload, secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }

    pub fn sign(payload: &serde_json::Value, secret: &str) -> String {
        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }
}

/// Resolves fixed opaque tokens, for router tests that do not care about JWTs.
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: &str, identity: Identity) -> Self {
        self.tokens.insert(token.to_string(), identity);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve_identity(&self, token: &str) -> Result<Identity, AppError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("Invalid token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.mobile_money_base_url, "http://localhost:54321");
        assert!(app_config.is_configured());
        assert!(app_config.is_mobile_money_configured());
    }

    #[test]
    fn test_user_creation() {
        let user = TestUser::doctor();
        let identity = user.to_identity();
        assert_eq!(identity.role, Role::Doctor);
        assert_eq!(identity.user_id, user.id);
        assert!(identity.doctor_id.is_some());
    }

    #[test]
    fn test_jwt_token_creation() {
        let user = TestUser::patient();
        let token = JwtTestUtils::create_test_token(&user, "test-secret", Some(1));

        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn test_static_identity_provider() {
        let patient = TestUser::patient().to_identity();
        let provider = StaticIdentityProvider::new().with("patient-token", patient.clone());

        assert_eq!(provider.resolve_identity("patient-token").await.unwrap(), patient);
        assert!(provider.resolve_identity("other").await.is_err());
    }
}
