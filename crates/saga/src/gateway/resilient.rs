//! Circuit breaking around any [`PaymentGateway`].
//!
//! Every call passes through one shared breaker and is counted in
//! `pg_requests_total`. Calls are never repeated here: resubmitting a charge
//! whose response was lost would charge the card twice, so retry belongs to
//! the caller that can look the order up again first.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, UserId};

use super::{GatewayError, GatewayTransaction, PaymentGateway, PaymentRequest};
use crate::resilience::CircuitBreaker;

/// Decorates a gateway with a shared circuit breaker.
pub struct ResilientGateway<G> {
    inner: G,
    breaker: Arc<CircuitBreaker>,
}

impl<G: PaymentGateway> ResilientGateway<G> {
    pub fn new(inner: G, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let result = self.breaker.call(call, GatewayError::is_retryable).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        metrics::counter!("pg_requests_total", "operation" => operation, "outcome" => outcome)
            .increment(1);

        if let Err(err) = &result {
            tracing::warn!(operation, error = %err, "PG call failed");
        }
        result
    }
}

#[async_trait]
impl<G: PaymentGateway> PaymentGateway for ResilientGateway<G> {
    async fn request_payment(
        &self,
        user_id: UserId,
        request: &PaymentRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.guarded("request_payment", || self.inner.request_payment(user_id, request))
            .await
    }

    async fn find_transactions_by_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Vec<GatewayTransaction>, GatewayError> {
        self.guarded("find_transactions_by_order", || {
            self.inner.find_transactions_by_order(user_id, order_id)
        })
        .await
    }

    async fn find_transaction(
        &self,
        user_id: UserId,
        transaction_key: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.guarded("find_transaction", || {
            self.inner.find_transaction(user_id, transaction_key)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use domain::{CardDetails, CardType, Money};

    use super::*;
    use crate::gateway::{InMemoryPaymentGateway, SimulatedOutcome, TransactionStatus};
    use crate::resilience::{CircuitBreakerConfig, CircuitState};

    fn resilient(pg: &InMemoryPaymentGateway) -> ResilientGateway<InMemoryPaymentGateway> {
        ResilientGateway::new(
            pg.clone(),
            Arc::new(CircuitBreaker::new(
                "pg",
                CircuitBreakerConfig {
                    failure_rate_threshold: 0.5,
                    minimum_calls: 4,
                    window_size: 4,
                    open_duration: Duration::from_secs(60),
                },
            )),
        )
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: OrderId::new(),
            amount: Money::new(1000),
            card: CardDetails::new(CardType::Kb, "1111-2222-3333-4444").unwrap(),
            callback_url: "http://localhost/callback".into(),
        }
    }

    #[tokio::test]
    async fn test_failed_request_is_not_resubmitted() {
        let pg = InMemoryPaymentGateway::default();
        pg.fail_next(1);
        let gateway = resilient(&pg);

        let err = gateway.request_payment(UserId::new(1), &request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(pg.request_count(), 1);

        let tx = gateway.request_payment(UserId::new(1), &request()).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(pg.request_count(), 2);
    }

    #[tokio::test]
    async fn test_rejections_do_not_count_against_breaker() {
        let pg = InMemoryPaymentGateway::new(SimulatedOutcome::Rejected("invalid card".into()));
        let gateway = resilient(&pg);

        for _ in 0..6 {
            let err = gateway.request_payment(UserId::new(1), &request()).await.unwrap_err();
            assert!(err.is_rejection());
        }
        assert_eq!(pg.request_count(), 6);
        assert_eq!(gateway.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_outage_opens_breaker_and_short_circuits() {
        let pg = InMemoryPaymentGateway::default();
        pg.set_unavailable(true);
        let gateway = resilient(&pg);

        for _ in 0..4 {
            assert!(gateway.request_payment(UserId::new(1), &request()).await.is_err());
        }
        assert_eq!(gateway.breaker().state(), CircuitState::Open);
        assert_eq!(pg.request_count(), 4);

        pg.set_unavailable(false);
        let err = gateway
            .find_transactions_by_order(UserId::new(1), OrderId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(_)));
        assert_eq!(pg.request_count(), 4);
    }
}
