use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// How an order is paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Deducted synchronously from the user's point balance.
    #[serde(alias = "POINT")]
    Wallet,
    /// Charged through the external payment gateway.
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::Card => "CARD",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "WALLET" | "POINT" => Ok(PaymentMethod::Wallet),
            "CARD" => Ok(PaymentMethod::Card),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Card issuers accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardType {
    Samsung,
    Kb,
    Hyundai,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Samsung => "SAMSUNG",
            CardType::Kb => "KB",
            CardType::Hyundai => "HYUNDAI",
        }
    }
}

impl std::fmt::Display for CardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Card used for a `Card` payment. The number never shows up in `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    card_type: CardType,
    card_no: String,
}

impl CardDetails {
    /// Accepts `xxxx-xxxx-xxxx-xxxx` or sixteen bare digits.
    pub fn new(card_type: CardType, card_no: impl Into<String>) -> Result<Self> {
        let card_no = card_no.into();
        let digits: String = card_no.chars().filter(|c| *c != '-').collect();
        if digits.len() != 16 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::InvalidCardNumber);
        }
        let formatted = digits
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join("-");
        Ok(Self {
            card_type,
            card_no: formatted,
        })
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Full number in `xxxx-xxxx-xxxx-xxxx` form, for the gateway only.
    pub fn card_no(&self) -> &str {
        &self.card_no
    }

    /// `****-****-****-1234`.
    pub fn masked(&self) -> String {
        let last4 = &self.card_no[self.card_no.len().saturating_sub(4)..];
        format!("****-****-****-{last4}")
    }
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("card_type", &self.card_type)
            .field("card_no", &self.masked())
            .finish()
    }
}
