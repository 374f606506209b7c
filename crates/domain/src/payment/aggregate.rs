//! Payment aggregate implementation.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId, Version};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::money::Money;

use super::{CardDetails, PaymentMethod, PaymentStatus};

/// The single payment attached to an order.
///
/// Method-specific data lives in optional fields: `card` and
/// `transaction_key` are only ever set for `Card` payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    order_id: OrderId,
    user_id: UserId,
    method: PaymentMethod,
    amount: Money,
    status: PaymentStatus,
    card: Option<CardDetails>,
    transaction_key: Option<String>,
    failure_reason: Option<String>,
    #[serde(default)]
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a payment in `Created`.
    ///
    /// Card payments need card details; wallet payments drop them.
    pub fn create(
        order_id: OrderId,
        user_id: UserId,
        method: PaymentMethod,
        amount: Money,
        card: Option<CardDetails>,
    ) -> Result<Self> {
        if amount.is_negative() {
            return Err(DomainError::InvalidAmount {
                amount: amount.amount(),
            });
        }
        let card = match method {
            PaymentMethod::Card => Some(card.ok_or(DomainError::MissingCardDetails)?),
            PaymentMethod::Wallet => None,
        };
        let now = Utc::now();
        Ok(Self {
            id: PaymentId::new(),
            order_id,
            user_id,
            method,
            amount,
            status: PaymentStatus::Created,
            card,
            transaction_key: None,
            failure_reason: None,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn card(&self) -> Option<&CardDetails> {
        self.card.as_ref()
    }

    pub fn transaction_key(&self) -> Option<&str> {
        self.transaction_key.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves the payment to `next`.
    ///
    /// Returns `Ok(false)` when already in `next` so duplicate deliveries are
    /// harmless, and an invalid-transition error for anything off the
    /// allow-list.
    pub fn transition_to(&mut self, next: PaymentStatus, reason: Option<String>) -> Result<bool> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidPaymentTransition {
                payment_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if reason.is_some() {
            self.failure_reason = reason;
        }
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Bumps `updated_at` without any other change. Reconciliation uses it
    /// after a re-drive that made no progress.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Records the gateway's transaction key. It can be set once.
    pub fn assign_transaction_key(&mut self, key: impl Into<String>) -> Result<bool> {
        let key = key.into();
        match &self.transaction_key {
            Some(existing) if *existing == key => Ok(false),
            Some(existing) => Err(DomainError::TransactionKeyMismatch {
                payment_id: self.id,
                existing: existing.clone(),
            }),
            None => {
                self.transaction_key = Some(key);
                self.updated_at = Utc::now();
                Ok(true)
            }
        }
    }
}
