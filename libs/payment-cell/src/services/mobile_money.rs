// libs/payment-cell/src/services/mobile_money.rs
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use shared_config::AppConfig;

/// A request to prompt the payer's phone for a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub payment_id: Uuid,
    pub phone_number: String,
    pub amount: Decimal,
    pub account_reference: String,
    pub description: String,
}

/// The gateway accepted the push; the outcome arrives later by callback.
#[derive(Debug, Clone, PartialEq)]
pub struct PushAcceptance {
    /// Echoed back in the callback, used as the payment's transaction id.
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub customer_message: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Mobile money gateway is not configured")]
    NotConfigured,

    #[error("Gateway rejected the push ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Invalid push request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),

    #[error("Gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    async fn request_push(&self, request: &PushRequest) -> Result<PushAcceptance, GatewayError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushBody<'a> {
    business_short_code: &'a str,
    timestamp: String,
    transaction_type: &'static str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
}

/// STK push client for the mobile-money gateway.
pub struct StkPushClient {
    client: Client,
    base_url: String,
    api_key: String,
    shortcode: String,
    callback_url: String,
}

impl std::fmt::Debug for StkPushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StkPushClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("shortcode", &self.shortcode)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

impl StkPushClient {
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        if !config.is_mobile_money_configured() {
            return Err(GatewayError::NotConfigured);
        }

        Ok(Self {
            client: Client::new(),
            base_url: config.mobile_money_base_url.trim_end_matches('/').to_string(),
            api_key: config.mobile_money_api_key.clone(),
            shortcode: config.mobile_money_shortcode.clone(),
            callback_url: config.mobile_money_callback_url.clone(),
        })
    }
}

#[async_trait]
impl MobileMoneyGateway for StkPushClient {
    /// POST /mpesa/stkpush/v1/processrequest
    async fn request_push(&self, request: &PushRequest) -> Result<PushAcceptance, GatewayError> {
        info!("Requesting mobile money push for payment {}", request.payment_id);

        // The gateway only takes whole currency units
        let amount = Some(request.amount)
            .filter(|amount| amount.fract().is_zero())
            .and_then(|amount| amount.to_u64())
            .filter(|amount| *amount > 0)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("Cannot push an amount of {}", request.amount)))?;

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.base_url);
        let body = StkPushBody {
            business_short_code: &self.shortcode,
            timestamp: Utc::now().format("%Y%m%d%H%M%S").to_string(),
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: &request.phone_number,
            party_b: &self.shortcode,
            phone_number: &request.phone_number,
            callback_url: &self.callback_url,
            account_reference: &request.account_reference,
            transaction_desc: &request.description,
        };

        debug!("Sending STK push request to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        debug!("STK push response: {} - {}", status, response_text);

        let parsed: Option<StkPushResponse> = serde_json::from_str(&response_text).ok();

        if !status.is_success() {
            error!("STK push failed: {} - {}", status, response_text);
            return Err(GatewayError::Rejected {
                code: status.as_u16().to_string(),
                message: parsed
                    .and_then(|p| p.response_description)
                    .unwrap_or(response_text),
            });
        }

        let parsed = parsed.ok_or_else(|| GatewayError::InvalidResponse(response_text.clone()))?;

        let code = parsed.response_code.unwrap_or_default();
        if code != "0" {
            return Err(GatewayError::Rejected {
                code,
                message: parsed.response_description.unwrap_or_default(),
            });
        }

        let checkout_request_id = parsed
            .checkout_request_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("missing CheckoutRequestID".to_string()))?;

        info!("Push accepted for payment {}: {}", request.payment_id, checkout_request_id);
        Ok(PushAcceptance {
            checkout_request_id,
            merchant_request_id: parsed.merchant_request_id,
            customer_message: parsed.customer_message,
        })
    }
}
