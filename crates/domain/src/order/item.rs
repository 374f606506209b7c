use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::money::Money;

/// Snapshot of a product line taken when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    product_id: ProductId,
    product_name: String,
    unit_price: Money,
    quantity: u32,
}

impl OrderItem {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Result<Self> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        if unit_price.is_negative() {
            return Err(DomainError::NegativePrice {
                price: unit_price.amount(),
            });
        }
        if unit_price.checked_times(quantity).is_none() {
            return Err(DomainError::AmountOverflow);
        }
        Ok(Self {
            product_id,
            product_name: product_name.into(),
            unit_price,
            quantity,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// `unit_price × quantity`.
    pub fn subtotal(&self) -> Result<Money> {
        self.unit_price
            .checked_times(self.quantity)
            .ok_or(DomainError::AmountOverflow)
    }
}
