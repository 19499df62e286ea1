use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub fn property_count(&self) -> usize {
        self.state.len()
    }

    pub fn property_ids(&self) -> Vec<Ulid> {
        self.state.iter().map(|e| *e.key()).collect()
    }

    /// `None` also covers a row whose creation was rolled back while this
    /// reader waited on it.
    pub async fn get_property(&self, id: Ulid) -> Option<PropertyInfo> {
        let row = self.get_property_row(&id)?;
        let guard = row.read().await;
        self.state
            .contains_key(&id)
            .then(|| PropertyInfo::from(&*guard))
    }

    /// A reservation with its fees, as the guest would see it.
    pub async fn get_reservation(&self, id: Ulid) -> Option<ReservationInfo> {
        let property_id = self.get_property_for_reservation(&id)?;
        let row = self.get_property_row(&property_id)?;
        let guard = row.read().await;
        guard
            .reservation
            .as_ref()
            .filter(|r| r.id == id)
            .map(|r| ReservationInfo::new(r, &guard.property))
    }
}
