use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Closed interval `[start, end]`. Availability windows and reservation
/// stays are both inclusive at each end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationPolicy {
    Free,
    Paid,
}

impl CancellationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicy::Free => "free",
            CancellationPolicy::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "free" | "free cancellation" => Some(CancellationPolicy::Free),
            "paid" | "paid cancellation" => Some(CancellationPolicy::Paid),
            _ => None,
        }
    }
}

/// Geographic point. Stored and echoed, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub address: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price_per_night: Decimal,
    /// Refundable deposit quoted alongside the nightly price; never charged here.
    #[serde(with = "rust_decimal::serde::str")]
    pub deposit: Decimal,
    pub cancellation_policy: CancellationPolicy,
    #[serde(with = "rust_decimal::serde::str")]
    pub cancellation_fee_per_night: Decimal,
    pub location: Location,
    /// `[available_from, available_to]`.
    pub window: Span,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub property_id: Ulid,
    pub guest_id: Ulid,
    /// `[reservation_from, reservation_to]`.
    pub span: Span,
    pub reserved: bool,
}

/// One property row. The `reservation` slot is the one-to-one link: a
/// property holds at most one reservation record at a time.
#[derive(Debug, Clone)]
pub struct PropertyState {
    pub property: Property,
    pub reservation: Option<Reservation>,
}

impl PropertyState {
    pub fn new(property: Property) -> Self {
        Self {
            property,
            reservation: None,
        }
    }

    pub fn id(&self) -> Ulid {
        self.property.id
    }
}

/// WAL record format. Property events carry the full row so replay and
/// compaction share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    PropertyCreated {
        property: Property,
    },
    PropertyUpdated {
        property: Property,
    },
    PropertyDeleted {
        id: Ulid,
    },
    /// A reservation together with its initial `reserved` state.
    ReservationCreated {
        id: Ulid,
        property_id: Ulid,
        guest_id: Ulid,
        span: Span,
        reserved: bool,
    },
    ReservationRescheduled {
        id: Ulid,
        property_id: Ulid,
        span: Span,
    },
    ReservationStateChanged {
        id: Ulid,
        property_id: Ulid,
        reserved: bool,
    },
    ReservationDeleted {
        id: Ulid,
        property_id: Ulid,
    },
}

// ── Command inputs ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NewProperty {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub address: String,
    pub price_per_night: Decimal,
    pub deposit: Decimal,
    pub window: Span,
    /// `None` derives availability from whether `now` falls in the window.
    pub available: Option<bool>,
    pub cancellation_policy: CancellationPolicy,
    pub cancellation_fee_per_night: Decimal,
    pub location: Location,
}

impl NewProperty {
    /// A listing with the required fields set and everything else defaulted:
    /// free cancellation, zero deposit and fee, empty text, location `(0, 0)`.
    pub fn new(id: Ulid, name: impl Into<String>, price_per_night: Decimal, window: Span) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            address: String::new(),
            price_per_night,
            deposit: Decimal::ZERO,
            window,
            available: None,
            cancellation_policy: CancellationPolicy::Free,
            cancellation_fee_per_night: Decimal::ZERO,
            location: Location::default(),
        }
    }
}

/// Partial property update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub price_per_night: Option<Decimal>,
    pub deposit: Option<Decimal>,
    pub available_from: Option<Ms>,
    pub available_to: Option<Ms>,
    pub available: Option<bool>,
    pub cancellation_policy: Option<CancellationPolicy>,
    pub cancellation_fee_per_night: Option<Decimal>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub property_id: Ulid,
    pub reservation_from: Ms,
    pub reservation_to: Ms,
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub description: String,
    pub address: String,
    pub price_per_night: Decimal,
    pub deposit: Decimal,
    pub cancellation_policy: CancellationPolicy,
    pub cancellation_fee_per_night: Decimal,
    pub location: Location,
    pub available_from: Ms,
    pub available_to: Ms,
    pub available: bool,
    pub reservation_id: Option<Ulid>,
}

impl From<&PropertyState> for PropertyInfo {
    fn from(ps: &PropertyState) -> Self {
        let p = &ps.property;
        Self {
            id: p.id,
            owner_id: p.owner_id,
            name: p.name.clone(),
            description: p.description.clone(),
            address: p.address.clone(),
            price_per_night: p.price_per_night,
            deposit: p.deposit,
            cancellation_policy: p.cancellation_policy,
            cancellation_fee_per_night: p.cancellation_fee_per_night,
            location: p.location,
            available_from: p.window.start,
            available_to: p.window.end,
            available: p.available,
            reservation_id: ps.reservation.as_ref().map(|r| r.id),
        }
    }
}

/// A reservation together with its fee quote and the property window it
/// was validated against.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub property_id: Ulid,
    pub guest_id: Ulid,
    pub reservation_from: Ms,
    pub reservation_to: Ms,
    pub reserved: bool,
    pub fees: crate::fees::FeeQuote,
    pub available_from: Ms,
    pub available_to: Ms,
}

impl ReservationInfo {
    pub fn new(reservation: &Reservation, property: &Property) -> Self {
        Self {
            id: reservation.id,
            property_id: reservation.property_id,
            guest_id: reservation.guest_id,
            reservation_from: reservation.span.start,
            reservation_to: reservation.span.end,
            reserved: reservation.reserved,
            fees: crate::fees::quote(property.price_per_night, &reservation.span),
            available_from: property.window.start,
            available_to: property.window.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn loft(id: Ulid) -> Property {
        Property {
            id,
            owner_id: Ulid::new(),
            name: "Loft".into(),
            description: "Top floor, two rooms".into(),
            address: "1 Mill Lane".into(),
            price_per_night: dec!(80.00),
            deposit: dec!(50.00),
            cancellation_policy: CancellationPolicy::Free,
            cancellation_fee_per_night: Decimal::ZERO,
            location: Location::default(),
            window: Span::new(0, 10 * DAY_MS),
            available: true,
        }
    }

    #[test]
    fn span_is_closed_at_both_ends() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(200));
        assert!(!s.contains_instant(99));
        assert!(!s.contains_instant(201));
    }

    #[test]
    fn zero_length_span_is_ordered() {
        let s = Span::new(500, 500);
        assert!(s.is_ordered());
        assert!(s.contains_instant(500));
        assert!(!Span::new(501, 500).is_ordered());
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn cancellation_policy_parse() {
        assert_eq!(CancellationPolicy::parse("FREE"), Some(CancellationPolicy::Free));
        assert_eq!(
            CancellationPolicy::parse("Paid Cancellation"),
            Some(CancellationPolicy::Paid)
        );
        assert_eq!(CancellationPolicy::parse("refundable"), None);
    }

    #[test]
    fn property_info_reports_reservation_slot() {
        let pid = Ulid::new();
        let mut ps = PropertyState::new(loft(pid));
        assert_eq!(PropertyInfo::from(&ps).reservation_id, None);

        let rid = Ulid::new();
        ps.reservation = Some(Reservation {
            id: rid,
            property_id: pid,
            guest_id: Ulid::new(),
            span: Span::new(DAY_MS, 3 * DAY_MS),
            reserved: true,
        });
        assert_eq!(PropertyInfo::from(&ps).reservation_id, Some(rid));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut property = loft(Ulid::new());
        property.cancellation_policy = CancellationPolicy::Paid;
        property.cancellation_fee_per_night = dec!(7.50);
        property.location = Location {
            latitude: 59.33,
            longitude: 18.06,
        };
        let event = Event::PropertyCreated { property };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn new_property_defaults() {
        let p = NewProperty::new(Ulid::new(), "Barn", dec!(40.00), Span::new(0, DAY_MS));
        assert_eq!(p.deposit, Decimal::ZERO);
        assert_eq!(p.cancellation_fee_per_night, Decimal::ZERO);
        assert_eq!(p.cancellation_policy, CancellationPolicy::Free);
        assert_eq!(p.available, None);
        assert!(p.description.is_empty() && p.address.is_empty());
    }
}
