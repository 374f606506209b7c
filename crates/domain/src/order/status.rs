//! Order state machine.

use serde::{Deserialize, Serialize};

/// The status of an order.
///
/// ```text
/// Pending ──┬──► Completed
///           ├──► Cancelled
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed with reservations held, awaiting payment.
    #[default]
    Pending,

    /// Paid (terminal).
    Completed,

    /// Payment was cancelled at the gateway (terminal).
    Cancelled,

    /// Payment failed (terminal).
    Failed,
}

impl OrderStatus {
    /// Returns true if `next` is reachable from this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, OrderStatus::Pending) && next.is_terminal()
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Failed,
    ];

    #[test]
    fn test_default_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_pending_reaches_every_terminal_state() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Completed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Failed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        for from in ALL.into_iter().filter(OrderStatus::is_terminal) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_string_round_trip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }
}
