//! Demo catalog for running without a database.

use common::{CouponId, ProductId, UserId};
use domain::{Coupon, DiscountPolicy, Money, Product, Wallet};
use store::Store;

use crate::error::ApiError;

/// Users 1 to 3 each get a wallet; user 1 also owns both coupons.
pub async fn seed_demo<S: Store>(store: &S) -> Result<(), ApiError> {
    let products = [
        (1, "Oak desk", 120_000, 10),
        (2, "Desk lamp", 35_000, 25),
        (3, "Monitor arm", 58_000, 5),
        (4, "Cable tray", 9_900, 100),
    ];
    for (id, name, price, stock) in products {
        let product = Product::new(ProductId::new(id), name, Money::new(price), stock)?;
        store.upsert_product(&product).await?;
    }

    let welcome = UserId::new(1);
    let coupons = [
        Coupon::new(
            CouponId::new(1),
            "WELCOME-5000",
            welcome,
            DiscountPolicy::fixed(Money::new(5_000))?,
        ),
        Coupon::new(
            CouponId::new(2),
            "SPRING-10",
            welcome,
            DiscountPolicy::percentage(10)?,
        ),
    ];
    for coupon in &coupons {
        store.upsert_coupon(coupon).await?;
    }

    for user in 1..=3 {
        let wallet = Wallet::new(UserId::new(user), Money::new(500_000))?;
        store.upsert_wallet(&wallet).await?;
    }

    tracing::info!(
        products = products.len(),
        coupons = coupons.len(),
        "seeded demo catalog"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use store::InMemoryStore;

    use super::*;

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let store = InMemoryStore::new();
        seed_demo(&store).await.unwrap();
        seed_demo(&store).await.unwrap();

        let desk = store.find_product(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!(desk.stock(), 10);
        let coupon = store.find_coupon(CouponId::new(2)).await.unwrap().unwrap();
        assert_eq!(coupon.owner(), UserId::new(1));
        assert!(store.find_wallet(UserId::new(3)).await.unwrap().is_some());
    }
}
