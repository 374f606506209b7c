//! In-process PG used when no gateway URL is configured, and by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, UserId};
use domain::Money;

use super::{GatewayError, GatewayTransaction, PaymentGateway, PaymentRequest, TransactionStatus};

/// What the simulator answers to a new payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedOutcome {
    /// Accepted; the outcome arrives later via [`InMemoryPaymentGateway::settle`].
    Pending,
    Success,
    Failed(String),
    /// Failure envelope; no transaction is created.
    Rejected(String),
}

#[derive(Debug, Clone)]
struct Record {
    user_id: UserId,
    amount: Money,
    status: TransactionStatus,
    reason: Option<String>,
}

#[derive(Debug)]
struct SimulatorState {
    outcome: SimulatedOutcome,
    transactions: HashMap<String, Record>,
    by_order: HashMap<OrderId, Vec<String>>,
    next_sequence: u32,
    failures_remaining: u32,
    unavailable: bool,
    requests: u32,
}

/// In-memory payment gateway.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<SimulatorState>>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new(SimulatedOutcome::Success)
    }
}

impl InMemoryPaymentGateway {
    pub fn new(outcome: SimulatedOutcome) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatorState {
                outcome,
                transactions: HashMap::new(),
                by_order: HashMap::new(),
                next_sequence: 0,
                failures_remaining: 0,
                unavailable: false,
                requests: 0,
            })),
        }
    }

    /// Changes the answer to subsequent payment requests.
    pub fn set_outcome(&self, outcome: SimulatedOutcome) {
        self.state().outcome = outcome;
    }

    /// The next `count` calls of any kind fail with HTTP 503.
    pub fn fail_next(&self, count: u32) {
        self.state().failures_remaining = count;
    }

    /// While set, every call fails as if the PG were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Moves a transaction to its final status, like the PG does
    /// asynchronously after answering `PENDING`.
    pub fn settle(
        &self,
        transaction_key: &str,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        let record = state
            .transactions
            .get_mut(transaction_key)
            .ok_or_else(|| GatewayError::NotFound(transaction_key.to_string()))?;
        record.status = status;
        record.reason = reason;
        Ok(())
    }

    /// Payment requests that reached the simulator, failed ones included.
    pub fn request_count(&self) -> u32 {
        self.state().requests
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }

    /// Transaction keys issued for an order, oldest first.
    pub fn keys_for_order(&self, order_id: OrderId) -> Vec<String> {
        self.state()
            .by_order
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Amount charged under a key, if the key exists.
    pub fn amount_of(&self, transaction_key: &str) -> Option<Money> {
        self.state()
            .transactions
            .get(transaction_key)
            .map(|record| record.amount)
    }

    fn state(&self) -> MutexGuard<'_, SimulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimulatorState {
    fn check_available(&mut self) -> Result<(), GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(GatewayError::Server { status: 503 });
        }
        Ok(())
    }

    fn issue_key(&mut self) -> String {
        self.next_sequence += 1;
        format!(
            "{}:TR:{:06x}",
            Utc::now().format("%Y%m%d"),
            self.next_sequence
        )
    }

    fn view(key: &str, record: &Record) -> GatewayTransaction {
        GatewayTransaction {
            transaction_key: key.to_string(),
            status: record.status,
            reason: record.reason.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn request_payment(
        &self,
        user_id: UserId,
        request: &PaymentRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        state.check_available()?;

        let (status, reason) = match state.outcome.clone() {
            SimulatedOutcome::Pending => (TransactionStatus::Pending, None),
            SimulatedOutcome::Success => (TransactionStatus::Success, None),
            SimulatedOutcome::Failed(reason) => (TransactionStatus::Failed, Some(reason)),
            SimulatedOutcome::Rejected(message) => {
                return Err(GatewayError::Rejected {
                    code: "Bad Request".to_string(),
                    message,
                });
            }
        };

        let key = state.issue_key();
        let record = Record {
            user_id,
            amount: request.amount,
            status,
            reason,
        };
        let view = SimulatorState::view(&key, &record);
        state.transactions.insert(key.clone(), record);
        state.by_order.entry(request.order_id).or_default().push(key);
        Ok(view)
    }

    async fn find_transactions_by_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Vec<GatewayTransaction>, GatewayError> {
        let mut state = self.state();
        state.check_available()?;

        let keys = state.by_order.get(&order_id).cloned().unwrap_or_default();
        Ok(keys
            .iter()
            .filter_map(|key| {
                state
                    .transactions
                    .get(key)
                    .filter(|record| record.user_id == user_id)
                    .map(|record| SimulatorState::view(key, record))
            })
            .collect())
    }

    async fn find_transaction(
        &self,
        user_id: UserId,
        transaction_key: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let mut state = self.state();
        state.check_available()?;

        state
            .transactions
            .get(transaction_key)
            .filter(|record| record.user_id == user_id)
            .map(|record| SimulatorState::view(transaction_key, record))
            .ok_or_else(|| GatewayError::NotFound(transaction_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CardDetails, CardType};

    fn request(order_id: OrderId) -> PaymentRequest {
        PaymentRequest {
            order_id,
            amount: Money::new(5000),
            card: CardDetails::new(CardType::Samsung, "1234567898141451").unwrap(),
            callback_url: "http://localhost/callback".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pending_then_settled() {
        let pg = InMemoryPaymentGateway::new(SimulatedOutcome::Pending);
        let user = UserId::new(1);
        let order_id = OrderId::new();

        let tx = pg.request_payment(user, &request(order_id)).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.transaction_key.contains(":TR:"));

        pg.settle(&tx.transaction_key, TransactionStatus::Success, None)
            .unwrap();
        let found = pg.find_transaction(user, &tx.transaction_key).await.unwrap();
        assert_eq!(found.status, TransactionStatus::Success);

        let by_order = pg.find_transactions_by_order(user, order_id).await.unwrap();
        assert_eq!(by_order.len(), 1);
        assert_eq!(pg.amount_of(&tx.transaction_key), Some(Money::new(5000)));
    }

    #[tokio::test]
    async fn test_other_users_see_nothing() {
        let pg = InMemoryPaymentGateway::default();
        let order_id = OrderId::new();
        let tx = pg
            .request_payment(UserId::new(1), &request(order_id))
            .await
            .unwrap();

        let err = pg
            .find_transaction(UserId::new(2), &tx.transaction_key)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert!(
            pg.find_transactions_by_order(UserId::new(2), order_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let pg = InMemoryPaymentGateway::default();
        pg.fail_next(2);
        let user = UserId::new(1);

        for _ in 0..2 {
            let err = pg.request_payment(user, &request(OrderId::new())).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert!(pg.request_payment(user, &request(OrderId::new())).await.is_ok());
        assert_eq!(pg.request_count(), 3);
        assert_eq!(pg.transaction_count(), 1);

        pg.set_outcome(SimulatedOutcome::Rejected("limit exceeded".into()));
        let err = pg.request_payment(user, &request(OrderId::new())).await.unwrap_err();
        assert!(err.is_rejection());
    }
}
