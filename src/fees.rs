use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::model::{DAY_MS, Span};

/// Service fee charged on top of the nightly total.
pub const SERVICE_FEE_RATE: Decimal = dec!(0.12);

const MINOR_UNITS_PER_MAJOR: Decimal = dec!(100);

/// Fees for one stay. All amounts are exact decimals; nothing is rounded
/// until the gateway amount is taken with [`minor_units`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub nights: i64,
    pub reservation_fee: Decimal,
    pub service_fee: Decimal,
    pub total_fee: Decimal,
}

/// Whole nights between the two ends of a stay, truncated.
pub fn nights(span: &Span) -> i64 {
    span.duration_ms().abs() / DAY_MS
}

pub fn quote(price_per_night: Decimal, span: &Span) -> FeeQuote {
    let nights = nights(span);
    let reservation_fee = price_per_night * Decimal::from(nights);
    let service_fee = reservation_fee * SERVICE_FEE_RATE;
    FeeQuote {
        nights,
        reservation_fee,
        service_fee,
        total_fee: reservation_fee + service_fee,
    }
}

/// Amount in the currency's smallest unit, rounding half to even.
pub fn minor_units(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(MINOR_UNITS_PER_MAJOR)
        .map(|cents| cents.round())
        .and_then(|cents| cents.to_i64())
}

/// Render an amount at currency scale when that is exact, otherwise in full.
pub fn display_amount(amount: Decimal) -> String {
    if amount.round_dp(2) == amount {
        format!("{amount:.2}")
    } else {
        amount.normalize().to_string()
    }
}
