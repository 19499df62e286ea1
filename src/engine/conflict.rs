use ulid::Ulid;

use crate::identity::{Principal, Role};
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS
        || span.end > MAX_VALID_TIMESTAMP_MS
        || span.end < MIN_VALID_TIMESTAMP_MS
        || span.start > MAX_VALID_TIMESTAMP_MS
    {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Decide whether a stay `[from, to]` may be placed on `property`.
///
/// Runs every check in a fixed order and reports the first one that fails:
/// availability, existing reserved reservation, date order, window start,
/// window end, caller role. `ignore` excludes one reservation from the
/// already-reserved check so a reservation can be rescheduled in place.
pub(crate) fn check_reservation(
    property_id: Ulid,
    property: Option<&PropertyState>,
    from: Ms,
    to: Ms,
    principal: &Principal,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    let ps = match property {
        Some(ps) if ps.property.available => ps,
        _ => return Err(EngineError::PropertyUnavailable(property_id)),
    };

    if let Some(existing) = &ps.reservation
        && existing.reserved
        && Some(existing.id) != ignore
    {
        return Err(EngineError::PropertyAlreadyReserved {
            property_id,
            reservation_id: existing.id,
        });
    }

    let requested = Span::new(from, to);
    if !requested.is_ordered() {
        return Err(EngineError::InvalidDateRange { from, to });
    }

    let window = ps.property.window;
    if !window.contains_span(&requested) {
        return Err(EngineError::OutsideAvailabilityWindow { requested, window });
    }

    match principal.role {
        Role::Guest | Role::Administrator => Ok(()),
        role => Err(EngineError::RoleNotPermitted(role)),
    }
}
