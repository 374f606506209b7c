//! Payment state machine.

use serde::{Deserialize, Serialize};

/// The status of a payment.
///
/// ```text
/// Created ──┬──────────────► Success
///           ├──────────────► Failed
///           └──► Pending ──┬► Success
///                          ├► Failed
///                          └► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Created,
    Pending,
    Success,
    Failed,
    Canceled,
}

impl PaymentStatus {
    /// States reachable in one step. Empty for terminal states.
    pub fn allowed_transitions(&self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Created => &[Pending, Success, Failed],
            Pending => &[Success, Failed, Canceled],
            Success | Failed | Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(PaymentStatus::Created),
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELED" => Ok(PaymentStatus::Canceled),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}
