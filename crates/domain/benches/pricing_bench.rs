use common::{CouponId, ProductId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{DiscountPolicy, Money, Order, OrderItem, PaymentMethod};
use std::hint::black_box;

fn items(count: i64) -> Vec<OrderItem> {
    (1..=count)
        .map(|i| {
            OrderItem::new(
                ProductId::new(i),
                format!("Product {i}"),
                Money::new(1000 + i * 7),
                (i % 5 + 1) as u32,
            )
            .unwrap()
        })
        .collect()
}

fn bench_place_order(c: &mut Criterion) {
    let lines = items(50);

    c.bench_function("pricing/place_50_items", |b| {
        b.iter(|| {
            let order =
                Order::place(UserId::new(1), black_box(lines.clone()), PaymentMethod::Card).unwrap();
            black_box(order.original_price());
        });
    });
}

fn bench_apply_discount(c: &mut Criterion) {
    let lines = items(10);
    let fixed = DiscountPolicy::fixed(Money::new(5000)).unwrap();
    let percent = DiscountPolicy::percentage(15).unwrap();

    c.bench_function("pricing/fixed_discount", |b| {
        b.iter(|| {
            let mut order =
                Order::place(UserId::new(1), lines.clone(), PaymentMethod::Wallet).unwrap();
            let discount = fixed.discount_for(order.original_price());
            order.apply_discount(CouponId::new(1), discount).unwrap();
            black_box(order.final_price());
        });
    });

    c.bench_function("pricing/percentage_discount", |b| {
        b.iter(|| {
            let mut order =
                Order::place(UserId::new(1), lines.clone(), PaymentMethod::Wallet).unwrap();
            let discount = percent.discount_for(order.original_price());
            order.apply_discount(CouponId::new(1), discount).unwrap();
            black_box(order.final_price());
        });
    });
}

criterion_group!(benches, bench_place_order, bench_apply_discount);
criterion_main!(benches);
