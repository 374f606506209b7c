//! HTTP client for the PG.
//!
//! Every response is wrapped in an envelope:
//!
//! ```json
//! { "meta": { "result": "SUCCESS" | "FAIL", "errorCode": "...", "message": "..." }, "data": ... }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, UserId};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{GatewayError, GatewayTransaction, PaymentGateway, PaymentRequest};

const USER_HEADER: &str = "X-USER-ID";

/// HTTP gateway configuration.
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Base URL of the PG, e.g. `http://localhost:8082`.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_millis(1000),
            request_timeout: Duration::from_millis(3000),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum MetaResult {
    Success,
    Fail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meta {
    result: MetaResult,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meta: Meta,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody<'a> {
    order_id: String,
    card_type: &'a str,
    card_no: &'a str,
    amount: String,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderTransactions {
    #[serde(default)]
    transactions: Vec<GatewayTransaction>,
}

/// PG adapter over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, card = %request.card.masked())
    )]
    async fn request_payment(
        &self,
        user_id: UserId,
        request: &PaymentRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        let body = CreatePaymentBody {
            order_id: request.order_id.to_string(),
            card_type: request.card.card_type().as_str(),
            card_no: request.card.card_no(),
            amount: request.amount.amount().to_string(),
            callback_url: &request.callback_url,
        };

        let response = self
            .client
            .post(self.url("/api/v1/payments"))
            .header(USER_HEADER, user_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        unwrap_envelope(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_transactions_by_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Vec<GatewayTransaction>, GatewayError> {
        let response = self
            .client
            .get(self.url("/api/v1/payments"))
            .header(USER_HEADER, user_id.to_string())
            .query(&[("orderId", order_id.to_string())])
            .send()
            .await
            .map_err(transport_error)?;

        // The PG answers 404 for orders it has never seen.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let data: OrderTransactions = unwrap_envelope(response).await?;
        Ok(data.transactions)
    }

    #[tracing::instrument(skip(self))]
    async fn find_transaction(
        &self,
        user_id: UserId,
        transaction_key: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/payments/{transaction_key}")))
            .header(USER_HEADER, user_id.to_string())
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(transaction_key.to_string()));
        }

        unwrap_envelope(response).await
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(err.to_string())
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(GatewayError::Server {
            status: status.as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(transport_error)?;
    let envelope: Envelope<T> = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(_) if status.is_client_error() => {
            return Err(GatewayError::Rejected {
                code: status.as_u16().to_string(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Err(e) => return Err(GatewayError::Decode(e.to_string())),
    };

    match envelope.meta.result {
        MetaResult::Fail => Err(GatewayError::Rejected {
            code: envelope
                .meta
                .error_code
                .unwrap_or_else(|| status.as_u16().to_string()),
            message: envelope.meta.message.unwrap_or_default(),
        }),
        MetaResult::Success => envelope
            .data
            .ok_or_else(|| GatewayError::Decode("envelope without data".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let gateway = HttpPaymentGateway::new(HttpGatewayConfig::new("http://pg:8082/")).unwrap();
        assert_eq!(gateway.url("/api/v1/payments"), "http://pg:8082/api/v1/payments");
    }

    #[test]
    fn test_failure_envelope_parses() {
        let envelope: Envelope<GatewayTransaction> = serde_json::from_value(serde_json::json!({
            "meta": { "result": "FAIL", "errorCode": "Bad Request", "message": "invalid card" },
            "data": null
        }))
        .unwrap();
        assert!(matches!(envelope.meta.result, MetaResult::Fail));
        assert_eq!(envelope.meta.error_code.as_deref(), Some("Bad Request"));
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_request_body_wire_format() {
        let body = CreatePaymentBody {
            order_id: "o-1".into(),
            card_type: "SAMSUNG",
            card_no: "1234-5678-9814-1451",
            amount: "5000".into(),
            callback_url: "http://localhost:3000/payments/callback",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["orderId"], "o-1");
        assert_eq!(json["cardType"], "SAMSUNG");
        assert_eq!(json["amount"], "5000");
        assert_eq!(json["callbackUrl"], "http://localhost:3000/payments/callback");
    }
}
