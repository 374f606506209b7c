use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::money::Money;

/// A catalog product. The saga only touches `stock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    price: Money,
    stock: u32,
    brand_id: Option<i64>,
    like_count: u64,
}

impl Product {
    /// Creates a product. The price must not be negative.
    pub fn new(id: ProductId, name: impl Into<String>, price: Money, stock: u32) -> Result<Self> {
        if price.is_negative() {
            return Err(DomainError::NegativePrice {
                price: price.amount(),
            });
        }
        Ok(Self {
            id,
            name: name.into(),
            price,
            stock,
            brand_id: None,
            like_count: 0,
        })
    }

    pub fn with_brand(mut self, brand_id: i64) -> Self {
        self.brand_id = Some(brand_id);
        self
    }

    pub fn with_like_count(mut self, like_count: u64) -> Self {
        self.like_count = like_count;
        self
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn stock(&self) -> u32 {
        self.stock
    }

    pub fn brand_id(&self) -> Option<i64> {
        self.brand_id
    }

    pub fn like_count(&self) -> u64 {
        self.like_count
    }

    /// Takes `quantity` units out of stock, failing closed when short.
    pub fn decrease_stock(&mut self, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        if quantity > self.stock {
            return Err(DomainError::InsufficientStock {
                product_id: self.id,
                requested: quantity,
                available: self.stock,
            });
        }
        self.stock -= quantity;
        Ok(())
    }

    /// Puts `quantity` units back.
    pub fn increase_stock(&mut self, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity });
        }
        self.stock = self
            .stock
            .checked_add(quantity)
            .ok_or(DomainError::InvalidQuantity { quantity })?;
        Ok(())
    }
}
