//! Payment execution, one strategy per payment method.

pub mod card;
pub mod wallet;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Payment, PaymentMethod};

use crate::error::{Result, SagaError};

pub use card::CardProcessor;
pub use wallet::WalletProcessor;

/// Executes a created payment for one payment method.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Drives `payment` as far as its method allows and returns the stored
    /// result. Must be safe to call again for the same payment.
    async fn process(&self, payment: &Payment) -> Result<Payment>;
}

/// Processors keyed by the method they handle.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<PaymentMethod, Arc<dyn PaymentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor, replacing any earlier one for its method.
    pub fn register(mut self, processor: Arc<dyn PaymentProcessor>) -> Self {
        self.processors.insert(processor.method(), processor);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Result<&Arc<dyn PaymentProcessor>> {
        self.processors
            .get(&method)
            .ok_or(SagaError::UnsupportedMethod(method))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
