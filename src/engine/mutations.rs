use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::identity::{Principal, Role};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_reservation, validate_span};
use super::{Engine, EngineError, WalCommand, lifecycle};

/// What a user cascade removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRemoval {
    pub properties: Vec<Ulid>,
    pub reservations: Vec<Ulid>,
}

/// Money fields: non-negative, at most two decimals, strictly below `max`.
fn validate_amount(field: &'static str, amount: Decimal, max: Decimal) -> Result<(), EngineError> {
    if amount.is_sign_negative() || amount >= max || amount.round_dp(PRICE_SCALE) != amount {
        return Err(EngineError::InvalidAmount { field, amount });
    }
    Ok(())
}

fn validate_window(window: &Span) -> Result<(), EngineError> {
    if !window.is_ordered() {
        return Err(EngineError::InvalidDateRange {
            from: window.start,
            to: window.end,
        });
    }
    validate_span(window)
}

fn validate_listing(p: &Property) -> Result<(), EngineError> {
    if p.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("property name too long"));
    }
    if p.description.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("property description too long"));
    }
    if p.address.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("property address too long"));
    }
    validate_window(&p.window)?;
    validate_amount("price_per_night", p.price_per_night, MAX_PRICE_PER_NIGHT)?;
    validate_amount("deposit", p.deposit, MAX_DEPOSIT)?;
    validate_amount(
        "cancellation_fee_per_night",
        p.cancellation_fee_per_night,
        MAX_CANCELLATION_FEE_PER_NIGHT,
    )
}

impl Engine {
    pub async fn create_property(
        &self,
        principal: &Principal,
        new: NewProperty,
    ) -> Result<PropertyInfo, EngineError> {
        if principal.role == Role::Guest {
            return Err(EngineError::Forbidden("only hosts can list properties"));
        }
        if self.state.len() >= MAX_PROPERTIES {
            return Err(EngineError::LimitExceeded("too many properties"));
        }

        let available = new
            .available
            .unwrap_or_else(|| new.window.contains_instant(self.now_ms()));
        let property = Property {
            id: new.id,
            owner_id: principal.id,
            name: new.name,
            description: new.description,
            address: new.address,
            price_per_night: new.price_per_night,
            deposit: new.deposit,
            cancellation_policy: new.cancellation_policy,
            cancellation_fee_per_night: new.cancellation_fee_per_night,
            location: new.location,
            window: new.window,
            available,
        };
        validate_listing(&property)?;

        let _permit = self.write_permit().await;
        let id = property.id;
        let event = Event::PropertyCreated {
            property: property.clone(),
        };
        // Claim the id with the row already write-locked, so a concurrent
        // insert of the same id fails and readers wait for the WAL outcome.
        let row = Arc::new(RwLock::new(PropertyState::new(property)));
        let Ok(guard) = row.clone().try_write_owned() else {
            return Err(EngineError::AlreadyExists(id));
        };
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&id);
            return Err(e);
        }

        let info = PropertyInfo::from(&*guard);
        debug!("property {id} listed by {}", principal.id);
        Ok(info)
    }

    pub async fn update_property(
        &self,
        principal: &Principal,
        id: Ulid,
        changes: PropertyChanges,
    ) -> Result<PropertyInfo, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self
            .lock_property(&id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        if !principal.can_manage(guard.property.owner_id) {
            return Err(EngineError::Forbidden("only the owner can change a property"));
        }

        let current = &guard.property;
        let window = Span::new(
            changes.available_from.unwrap_or(current.window.start),
            changes.available_to.unwrap_or(current.window.end),
        );
        let available = match changes.available {
            Some(explicit) => explicit,
            None if window != current.window => window.contains_instant(self.now_ms()),
            None => current.available,
        };
        let property = Property {
            id,
            owner_id: current.owner_id,
            name: changes.name.unwrap_or_else(|| current.name.clone()),
            description: changes
                .description
                .unwrap_or_else(|| current.description.clone()),
            address: changes.address.unwrap_or_else(|| current.address.clone()),
            price_per_night: changes.price_per_night.unwrap_or(current.price_per_night),
            deposit: changes.deposit.unwrap_or(current.deposit),
            cancellation_policy: changes
                .cancellation_policy
                .unwrap_or(current.cancellation_policy),
            cancellation_fee_per_night: changes
                .cancellation_fee_per_night
                .unwrap_or(current.cancellation_fee_per_night),
            location: changes.location.unwrap_or(current.location),
            window,
            available,
        };
        validate_listing(&property)?;

        self.persist_and_apply(&mut guard, &Event::PropertyUpdated { property })
            .await?;
        Ok(PropertyInfo::from(&*guard))
    }

    /// Delete a property and, with it, its reservation.
    pub async fn delete_property(&self, principal: &Principal, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let guard = self
            .lock_property(&id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        if !principal.can_manage(guard.property.owner_id) {
            return Err(EngineError::Forbidden("only the owner can delete a property"));
        }
        self.remove_property_row(&guard).await
    }

    async fn remove_property_row(&self, ps: &PropertyState) -> Result<(), EngineError> {
        let id = ps.id();
        self.wal_append(&Event::PropertyDeleted { id }).await?;
        if let Some(r) = &ps.reservation {
            self.reservation_to_property.remove(&r.id);
        }
        self.state.remove(&id);
        info!("property {id} deleted");
        Ok(())
    }

    /// Validate, then persist the reservation in its `on_created` state with a
    /// single WAL append. The row lock is held from the conflict check
    /// through that append.
    pub async fn create_reservation(
        &self,
        principal: &Principal,
        new: NewReservation,
    ) -> Result<ReservationInfo, EngineError> {
        let result = self.try_create_reservation(principal, new).await;
        match &result {
            Ok(info) => {
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                info!(
                    "reservation {} on property {} by guest {} ({} nights)",
                    info.id, info.property_id, info.guest_id, info.fees.nights
                );
            }
            Err(e) => {
                metrics::counter!(observability::RESERVATIONS_REJECTED_TOTAL, "reason" => e.kind())
                    .increment(1);
                info!("reservation {} rejected: {e}", new.id);
            }
        }
        result
    }

    async fn try_create_reservation(
        &self,
        principal: &Principal,
        new: NewReservation,
    ) -> Result<ReservationInfo, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.lock_property(&new.property_id).await;
        check_reservation(
            new.property_id,
            guard.as_deref(),
            new.reservation_from,
            new.reservation_to,
            principal,
            None,
        )?;
        let Some(ps) = guard.as_deref_mut() else {
            return Err(EngineError::PropertyUnavailable(new.property_id));
        };

        if let Some(existing) = &ps.reservation {
            return Err(EngineError::ReservationExists {
                property_id: new.property_id,
                reservation_id: existing.id,
            });
        }
        // Reservation ids are unique across properties, not just this row.
        match self.reservation_to_property.entry(new.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(new.id)),
            Entry::Vacant(slot) => {
                slot.insert(new.property_id);
            }
        }

        let created = Event::ReservationCreated {
            id: new.id,
            property_id: new.property_id,
            guest_id: principal.id,
            span: Span::new(new.reservation_from, new.reservation_to),
            reserved: lifecycle::on_created().is_reserved(),
        };
        if let Err(e) = self.persist_and_apply(ps, &created).await {
            self.reservation_to_property.remove(&new.id);
            return Err(e);
        }

        reservation_info(ps, new.id)
    }

    /// Move a reservation to new dates; a `None` end keeps its current value.
    /// Runs the full conflict check again, ignoring the reservation's own
    /// reserved flag. The flag itself is left for the reconciler.
    pub async fn reschedule_reservation(
        &self,
        principal: &Principal,
        id: Ulid,
        reservation_from: Option<Ms>,
        reservation_to: Option<Ms>,
    ) -> Result<ReservationInfo, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let (guest_id, current) = guard
            .reservation
            .as_ref()
            .map(|r| (r.guest_id, r.span))
            .ok_or(EngineError::NotFound(id))?;
        if !principal.can_manage(guest_id) {
            return Err(EngineError::Forbidden("only the guest can change a reservation"));
        }
        let reservation_from = reservation_from.unwrap_or(current.start);
        let reservation_to = reservation_to.unwrap_or(current.end);
        let property_id = guard.id();
        check_reservation(
            property_id,
            Some(&*guard),
            reservation_from,
            reservation_to,
            principal,
            Some(id),
        )?;

        let event = Event::ReservationRescheduled {
            id,
            property_id,
            span: Span::new(reservation_from, reservation_to),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        reservation_info(&guard, id)
    }

    /// Cancel a reservation. Returns the property it was attached to.
    pub async fn delete_reservation(&self, principal: &Principal, id: Ulid) -> Result<Ulid, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let guest_id = guard
            .reservation
            .as_ref()
            .map(|r| r.guest_id)
            .ok_or(EngineError::NotFound(id))?;
        if !principal.can_manage(guest_id) {
            return Err(EngineError::Forbidden("only the guest can cancel a reservation"));
        }
        let property_id = guard.id();
        self.persist_and_apply(&mut guard, &Event::ReservationDeleted { id, property_id })
            .await?;
        Ok(property_id)
    }

    /// Remove a reservation on behalf of the system, with no caller checks.
    pub(crate) async fn release_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _permit = self.write_permit().await;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let property_id = guard.id();
        self.persist_and_apply(&mut guard, &Event::ReservationDeleted { id, property_id })
            .await?;
        Ok(property_id)
    }

    /// Cascade for a user removed by the identity system: their properties go
    /// (with any reservation on them) and so do their reservations elsewhere.
    /// Administrators only.
    pub async fn remove_user(&self, principal: &Principal, user_id: Ulid) -> Result<UserRemoval, EngineError> {
        if !principal.is_admin() {
            return Err(EngineError::Forbidden("only an administrator can remove users"));
        }
        let mut removal = UserRemoval::default();
        for id in self.property_ids() {
            let _permit = self.write_permit().await;
            let Some(mut guard) = self.lock_property(&id).await else {
                continue;
            };
            if guard.property.owner_id == user_id {
                if let Some(r) = &guard.reservation {
                    removal.reservations.push(r.id);
                }
                self.remove_property_row(&guard).await?;
                removal.properties.push(id);
            } else if let Some(r) = guard.reservation.clone().filter(|r| r.guest_id == user_id) {
                let event = Event::ReservationDeleted {
                    id: r.id,
                    property_id: id,
                };
                self.persist_and_apply(&mut guard, &event).await?;
                removal.reservations.push(r.id);
            }
        }
        info!(
            "user {user_id} removed: {} properties, {} reservations",
            removal.properties.len(),
            removal.reservations.len()
        );
        Ok(removal)
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Writers are held off from the snapshot until the new file is in
    /// place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction_gate.write().await;
        let mut events = Vec::with_capacity(self.state.len() * 2);
        for id in self.property_ids() {
            let Some(row) = self.get_property_row(&id) else {
                continue;
            };
            let ps = row.read().await;
            events.push(Event::PropertyCreated {
                property: ps.property.clone(),
            });
            if let Some(r) = &ps.reservation {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    property_id: r.property_id,
                    guest_id: r.guest_id,
                    span: r.span,
                    reserved: r.reserved,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn reservation_info(ps: &PropertyState, id: Ulid) -> Result<ReservationInfo, EngineError> {
    ps.reservation
        .as_ref()
        .filter(|r| r.id == id)
        .map(|r| ReservationInfo::new(r, &ps.property))
        .ok_or(EngineError::NotFound(id))
}
