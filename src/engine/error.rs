use rust_decimal::Decimal;
use ulid::Ulid;

use crate::identity::Role;
use crate::model::{Ms, Span};

#[derive(Debug)]
pub enum EngineError {
    /// Property missing or flagged unavailable.
    PropertyUnavailable(Ulid),
    /// Property already holds a reservation with `reserved = true`.
    PropertyAlreadyReserved {
        property_id: Ulid,
        reservation_id: Ulid,
    },
    InvalidDateRange {
        from: Ms,
        to: Ms,
    },
    OutsideAvailabilityWindow {
        requested: Span,
        window: Span,
    },
    RoleNotPermitted(Role),
    /// The property's reservation slot holds an unreserved record.
    ReservationExists {
        property_id: Ulid,
        reservation_id: Ulid,
    },
    Forbidden(&'static str),
    /// A money field off its scale or outside its range.
    InvalidAmount { field: &'static str, amount: Decimal },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::PropertyUnavailable(_) => "property_unavailable",
            EngineError::PropertyAlreadyReserved { .. } => "property_already_reserved",
            EngineError::InvalidDateRange { .. } => "invalid_date_range",
            EngineError::OutsideAvailabilityWindow { .. } => "outside_availability_window",
            EngineError::RoleNotPermitted(_) => "role_not_permitted",
            EngineError::ReservationExists { .. } => "reservation_exists",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidAmount { .. } => "invalid_amount",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }

    /// SQLSTATE reported to pgwire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::PropertyUnavailable(_) | EngineError::PropertyAlreadyReserved { .. } => {
                "55000"
            }
            EngineError::InvalidDateRange { .. } => "22007",
            EngineError::OutsideAvailabilityWindow { .. } | EngineError::InvalidAmount { .. } => "22023",
            EngineError::RoleNotPermitted(_) | EngineError::Forbidden(_) => "42501",
            EngineError::ReservationExists { .. } | EngineError::AlreadyExists(_) => "23505",
            EngineError::NotFound(_) => "02000",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::PropertyUnavailable(id) => {
                write!(f, "property {id} is not available for reservation")
            }
            EngineError::PropertyAlreadyReserved {
                property_id,
                reservation_id,
            } => write!(
                f,
                "property {property_id} is already reserved by reservation {reservation_id}"
            ),
            EngineError::InvalidDateRange { from, to } => write!(
                f,
                "invalid date range: reservation_from {from} is after reservation_to {to}"
            ),
            EngineError::OutsideAvailabilityWindow { requested, window } => write!(
                f,
                "requested stay [{}, {}] falls outside the availability window [{}, {}]",
                requested.start, requested.end, window.start, window.end
            ),
            EngineError::RoleNotPermitted(role) => {
                write!(f, "role {role} is not permitted to make reservations")
            }
            EngineError::ReservationExists {
                property_id,
                reservation_id,
            } => write!(
                f,
                "property {property_id} still holds reservation {reservation_id}; delete it first"
            ),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidAmount { field, amount } => write!(f, "invalid {field}: {amount}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
