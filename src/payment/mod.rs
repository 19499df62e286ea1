pub mod http;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::fees;
use crate::identity::Principal;
use crate::model::{NewReservation, ReservationInfo};
use crate::observability;

/// One outbound charge. `amount` is in the currency's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount: i64,
    pub currency: String,
    pub description: String,
    /// Client-supplied payment token.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub charge_id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentError {
    /// The gateway answered and refused the charge.
    Declined {
        message: String,
        code: Option<String>,
    },
    /// Transport failure, timeout, or a gateway-side error.
    GatewayUnreachable(String),
    /// The fee does not fit the gateway's integer amount.
    InvalidAmount(Decimal),
    ReservationNotFound(Ulid),
}

impl PaymentError {
    /// Value of the `payment_status` column for this failure.
    pub fn status(&self) -> &'static str {
        match self {
            PaymentError::Declined { .. } => "declined",
            PaymentError::GatewayUnreachable(_) => "gateway_unreachable",
            PaymentError::InvalidAmount(_) => "invalid_amount",
            PaymentError::ReservationNotFound(_) => "not_found",
        }
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::Declined {
                message,
                code: Some(code),
            } => write!(f, "payment declined ({code}): {message}"),
            PaymentError::Declined { message, code: None } => {
                write!(f, "payment declined: {message}")
            }
            PaymentError::GatewayUnreachable(e) => write!(f, "payment gateway unreachable: {e}"),
            PaymentError::InvalidAmount(a) => write!(f, "amount {a} cannot be charged"),
            PaymentError::ReservationNotFound(id) => write!(f, "reservation {id} not found"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// Outbound charge API.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, PaymentError>;
}

/// What happens to a freshly created reservation whose charge failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentFailurePolicy {
    /// Leave it in place, reserved and unpaid.
    #[default]
    Keep,
    /// Delete it again.
    Release,
}

impl PaymentFailurePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "keep" => Some(PaymentFailurePolicy::Keep),
            "release" => Some(PaymentFailurePolicy::Release),
            _ => None,
        }
    }
}

/// A persisted reservation and the outcome of charging for it.
#[derive(Debug, Clone)]
pub struct Booking {
    pub reservation: ReservationInfo,
    pub payment: Result<ChargeReceipt, PaymentError>,
    /// Set when the reservation was deleted after a failed charge.
    pub released: bool,
}

pub struct PaymentCoordinator {
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    policy: PaymentFailurePolicy,
}

impl PaymentCoordinator {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
        policy: PaymentFailurePolicy,
    ) -> Self {
        Self {
            gateway,
            currency: currency.into(),
            policy,
        }
    }

    pub fn policy(&self) -> PaymentFailurePolicy {
        self.policy
    }

    /// Charge the guest the total fee for an existing reservation. One
    /// attempt; no retry.
    pub async fn charge_reservation(
        &self,
        engine: &Engine,
        reservation_id: Ulid,
        token: &str,
    ) -> Result<ChargeReceipt, PaymentError> {
        let reservation = engine
            .get_reservation(reservation_id)
            .await
            .ok_or(PaymentError::ReservationNotFound(reservation_id))?;
        self.charge_for(&reservation, token).await
    }

    async fn charge_for(
        &self,
        reservation: &ReservationInfo,
        token: &str,
    ) -> Result<ChargeReceipt, PaymentError> {
        let total = reservation.fees.total_fee;
        let amount = fees::minor_units(total).ok_or(PaymentError::InvalidAmount(total))?;
        let request = ChargeRequest {
            amount,
            currency: self.currency.clone(),
            description: format!(
                "Reservation {} for property {}",
                reservation.id, reservation.property_id
            ),
            source: token.to_string(),
        };

        let started = Instant::now();
        let result = self.gateway.charge(&request).await;
        metrics::histogram!(observability::PAYMENT_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(receipt) => {
                info!(
                    "charged {} {} for reservation {} ({})",
                    receipt.amount, receipt.currency, reservation.id, receipt.charge_id
                );
                "paid"
            }
            Err(e) => {
                warn!("charge for reservation {} failed: {e}", reservation.id);
                e.status()
            }
        };
        metrics::counter!(observability::PAYMENTS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    /// Create the reservation, then charge for it.
    ///
    /// Validation errors come back as `Err` with nothing persisted. Once the
    /// reservation is written, a failed charge is reported in
    /// [`Booking::payment`]; the reservation stays unless the policy is
    /// [`PaymentFailurePolicy::Release`].
    pub async fn reserve_and_charge(
        &self,
        engine: &Engine,
        principal: &Principal,
        new: NewReservation,
        token: &str,
    ) -> Result<Booking, EngineError> {
        let reservation = engine.create_reservation(principal, new).await?;
        let payment = self.charge_for(&reservation, token).await;

        let mut released = false;
        if payment.is_err() && self.policy == PaymentFailurePolicy::Release {
            match engine.release_reservation(reservation.id).await {
                Ok(_) => {
                    released = true;
                    metrics::counter!(observability::PAYMENT_RELEASES_TOTAL).increment(1);
                    info!("released unpaid reservation {}", reservation.id);
                }
                Err(e) => warn!("could not release unpaid reservation {}: {e}", reservation.id),
            }
        }

        Ok(Booking {
            reservation,
            payment,
            released,
        })
    }
}
