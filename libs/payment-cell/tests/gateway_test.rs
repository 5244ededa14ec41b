use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_cell::{GatewayError, MobileMoneyGateway, PushRequest, StkPushClient};
use shared_config::AppConfig;
use shared_utils::test_utils::TestConfig;

fn config_for(server: &MockServer) -> AppConfig {
    AppConfig {
        mobile_money_base_url: server.uri(),
        ..TestConfig::default().to_app_config()
    }
}

fn push_request() -> PushRequest {
    PushRequest {
        payment_id: Uuid::new_v4(),
        phone_number: "254712345678".to_string(),
        amount: dec!(1500),
        account_reference: "APPT-0001".to_string(),
        description: "Consultation fee".to_string(),
    }
}

#[tokio::test]
async fn test_accepted_push_returns_checkout_request_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .and(header("Authorization", "Bearer test-gateway-key"))
        .and(body_partial_json(json!({
            "BusinessShortCode": "174379",
            "TransactionType": "CustomerPayBillOnline",
            "Amount": 1500,
            "PartyA": "254712345678",
            "PhoneNumber": "254712345678",
            "AccountReference": "APPT-0001",
            "CallBackURL": "http://localhost:3000/payments/callbacks/mobile-money"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = StkPushClient::new(&config_for(&mock_server)).unwrap();
    let acceptance = client.request_push(&push_request()).await.unwrap();

    assert_eq!(acceptance.checkout_request_id, "ws_CO_191220191020363925");
    assert_eq!(acceptance.merchant_request_id.as_deref(), Some("29115-34620561-1"));
}

#[tokio::test]
async fn test_non_zero_response_code_is_a_rejection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ResponseCode": "1",
            "ResponseDescription": "Unable to lock subscriber"
        })))
        .mount(&mock_server)
        .await;

    let client = StkPushClient::new(&config_for(&mock_server)).unwrap();
    let result = client.request_push(&push_request()).await;

    assert_matches!(
        result,
        Err(GatewayError::Rejected { code, message }) if code == "1" && message == "Unable to lock subscriber"
    );
}

#[tokio::test]
async fn test_http_error_is_a_rejection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "requestId": "11728-2929992-1",
            "errorCode": "500.001.1001",
            "errorMessage": "Server busy"
        })))
        .mount(&mock_server)
        .await;

    let client = StkPushClient::new(&config_for(&mock_server)).unwrap();
    let result = client.request_push(&push_request()).await;

    assert_matches!(result, Err(GatewayError::Rejected { code, .. }) if code == "500");
}

#[tokio::test]
async fn test_missing_checkout_id_is_invalid() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ResponseCode": "0" })))
        .mount(&mock_server)
        .await;

    let client = StkPushClient::new(&config_for(&mock_server)).unwrap();

    assert_matches!(
        client.request_push(&push_request()).await,
        Err(GatewayError::InvalidResponse(_))
    );
}

#[tokio::test]
async fn test_zero_amount_never_reaches_the_gateway() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = StkPushClient::new(&config_for(&mock_server)).unwrap();
    let mut request = push_request();
    request.amount = dec!(0);

    assert_matches!(
        client.request_push(&request).await,
        Err(GatewayError::InvalidRequest(_))
    );
}

#[tokio::test]
async fn test_fractional_amount_is_not_rounded_up() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = StkPushClient::new(&config_for(&mock_server)).unwrap();
    let mut request = push_request();
    request.amount = dec!(1500.40);

    assert_matches!(
        client.request_push(&request).await,
        Err(GatewayError::InvalidRequest(_))
    );
}

#[test]
fn test_client_requires_credentials() {
    let config = AppConfig {
        mobile_money_api_key: String::new(),
        ..TestConfig::default().to_app_config()
    };

    assert_matches!(StkPushClient::new(&config), Err(GatewayError::NotConfigured));
}
