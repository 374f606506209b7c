use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::money::Money;

/// A user's point balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    owner: UserId,
    balance: Money,
}

impl Wallet {
    /// Opens a wallet. The balance must not be negative.
    pub fn new(owner: UserId, balance: Money) -> Result<Self> {
        if balance.is_negative() {
            return Err(DomainError::InvalidAmount {
                amount: balance.amount(),
            });
        }
        Ok(Self { owner, balance })
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    /// Tops the balance up by a positive amount.
    pub fn charge(&mut self, amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(DomainError::InvalidAmount {
                amount: amount.amount(),
            });
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(DomainError::AmountOverflow)?;
        Ok(())
    }

    /// Spends `amount` from the balance.
    ///
    /// A zero amount (fully discounted order) succeeds without change.
    pub fn deduct(&mut self, amount: Money) -> Result<()> {
        if amount.is_negative() {
            return Err(DomainError::InvalidAmount {
                amount: amount.amount(),
            });
        }
        if amount > self.balance {
            return Err(DomainError::InsufficientBalance {
                user_id: self.owner,
                requested: amount.amount(),
                available: self.balance.amount(),
            });
        }
        self.balance = self.balance.minus_floor_zero(amount);
        Ok(())
    }
}
