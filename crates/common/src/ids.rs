//! Strongly typed identifiers.
//!
//! Orders, payments and outbox events are created by this system and get
//! random UUIDs. Users, products and coupons are owned by the catalog and
//! arrive as positive integer keys.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! key_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw key.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw key.
            pub fn as_i64(&self) -> i64 {
                self.0
            }

            /// Catalog keys start at 1.
            pub fn is_valid(&self) -> bool {
                self.0 > 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a placed order.
    OrderId
);

uuid_id!(
    /// Identifier of the payment attached to an order.
    PaymentId
);

uuid_id!(
    /// Identifier of an outbox event.
    EventId
);

key_id!(
    /// The customer placing orders and owning coupons and wallets.
    UserId
);

key_id!(
    /// Catalog product key.
    ProductId
);

key_id!(
    /// Issued coupon key.
    CouponId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_new_creates_unique_ids() {
        assert_ne!(OrderId::new(), OrderId::new());
    }

    #[test]
    fn payment_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(PaymentId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn order_id_parses_from_string() {
        let id = OrderId::new();
        let parsed: OrderId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }

    #[test]
    fn key_ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&ProductId::new(42)).unwrap();
        assert_eq!(json, "42");
        let user: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(user, UserId::new(7));
    }

    #[test]
    fn key_id_validity() {
        assert!(UserId::new(1).is_valid());
        assert!(!UserId::new(0).is_valid());
        assert!(!CouponId::new(-3).is_valid());
    }
}
