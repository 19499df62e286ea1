use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::model::Ms;

pub const MAX_PROPERTIES: usize = 1_000_000;
pub const MAX_NAME_LEN: usize = 250;
pub const MAX_TEXT_LEN: usize = 500;
pub const MAX_PAYMENT_TOKEN_LEN: usize = 255;

/// Nightly prices carry at most two decimals and stay below this bound.
pub const MAX_PRICE_PER_NIGHT: Decimal = dec!(10000.00);
pub const MAX_DEPOSIT: Decimal = dec!(100.00);
pub const MAX_CANCELLATION_FEE_PER_NIGHT: Decimal = dec!(10.00);
/// Scale of every money field.
pub const PRICE_SCALE: u32 = 2;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
