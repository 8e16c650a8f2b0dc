use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use tutorhub_common::PaymentStatus;

use crate::models::Payment;

/// Derived split of a lesson price between platform and teacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub platform_fee_cents: i64,
    pub teacher_net_cents: i64,
}

fn round_cents(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Split `amount` into platform fee and teacher net for the given
/// commission percentage. `fee = round(amount * commission / 100)` to the
/// nearest subunit; recomputation with unchanged inputs yields the same
/// split. Called before every payment write instead of hiding the
/// derivation in a save hook.
pub fn derive(amount_cents: i64, commission_percent: Decimal) -> Settlement {
    let fee = round_cents(Decimal::from(amount_cents) * commission_percent / Decimal::from(100))
        .clamp(0, amount_cents.max(0));

    Settlement {
        platform_fee_cents: fee,
        teacher_net_cents: amount_cents - fee,
    }
}

/// Teacher-side share of a refund. Proportional to the refunded fraction of
/// the gross amount, with a full refund reversing the whole payout so
/// rounding can never strand a remainder.
pub fn refund_teacher_share(amount_cents: i64, teacher_net_cents: i64, refund_cents: i64) -> i64 {
    if amount_cents <= 0 || refund_cents <= 0 {
        return 0;
    }
    if refund_cents >= amount_cents {
        return teacher_net_cents;
    }

    round_cents(
        Decimal::from(refund_cents) * Decimal::from(teacher_net_cents)
            / Decimal::from(amount_cents),
    )
    .clamp(0, teacher_net_cents)
}

/// Recompute a payment's derived fields in place. Keeps the record
/// consistent whenever amount or commission changed prior to persistence.
pub fn recompute(payment: &mut Payment) {
    let split = derive(payment.amount_cents, payment.commission_percent);
    payment.platform_fee_cents = split.platform_fee_cents;
    payment.teacher_net_cents = split.teacher_net_cents;
    payment.updated_at = Utc::now();
}

/// Record a refund against a payment, reversing the teacher payout
/// proportionally.
pub fn apply_refund(payment: &mut Payment, refund_cents: i64) {
    let refund = refund_cents.clamp(0, payment.amount_cents - payment.refunded_cents);
    if refund == 0 {
        payment.updated_at = Utc::now();
        return;
    }

    let reversal =
        refund_teacher_share(payment.amount_cents, payment.teacher_net_cents, refund);
    payment.teacher_net_cents -= reversal;
    payment.refunded_cents += refund;
    payment.status = if payment.refunded_cents >= payment.amount_cents {
        PaymentStatus::Refunded
    } else {
        PaymentStatus::PartiallyRefunded
    };
    payment.updated_at = Utc::now();
}
