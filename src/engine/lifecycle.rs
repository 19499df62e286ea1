use crate::model::{Ms, Span};

/// The two states of a reservation's `reserved` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Unreserved,
    Reserved,
}

impl ReservationState {
    pub fn from_flag(reserved: bool) -> Self {
        if reserved {
            ReservationState::Reserved
        } else {
            ReservationState::Unreserved
        }
    }

    pub fn is_reserved(self) -> bool {
        self == ReservationState::Reserved
    }
}

/// State entered right after a reservation is persisted. Unconditional: the
/// stay window is not consulted until the next reconciliation tick.
pub fn on_created() -> ReservationState {
    ReservationState::Reserved
}

/// State a reservation should hold at `now`.
pub fn on_tick(span: &Span, now: Ms) -> ReservationState {
    ReservationState::from_flag(span.contains_instant(now))
}

/// The transition a tick would apply, or `None` when the flag already matches.
pub fn tick_transition(current: bool, span: &Span, now: Ms) -> Option<ReservationState> {
    let next = on_tick(span, now);
    (next != ReservationState::from_flag(current)).then_some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_always_reserves() {
        assert_eq!(on_created(), ReservationState::Reserved);
    }

    #[test]
    fn tick_inside_window_reserves() {
        let span = Span::new(100, 200);
        assert!(on_tick(&span, 100).is_reserved());
        assert!(on_tick(&span, 150).is_reserved());
        assert!(on_tick(&span, 200).is_reserved());
    }

    #[test]
    fn tick_outside_window_unreserves() {
        let span = Span::new(100, 200);
        assert_eq!(on_tick(&span, 99), ReservationState::Unreserved);
        assert_eq!(on_tick(&span, 201), ReservationState::Unreserved);
    }

    #[test]
    fn tick_transition_only_on_change() {
        let span = Span::new(100, 200);
        assert_eq!(tick_transition(true, &span, 150), None);
        assert_eq!(tick_transition(false, &span, 300), None);
        assert_eq!(
            tick_transition(true, &span, 300),
            Some(ReservationState::Unreserved)
        );
        assert_eq!(
            tick_transition(false, &span, 150),
            Some(ReservationState::Reserved)
        );
    }

    #[test]
    fn lapsed_reservation_unreserves_on_first_tick_after_creation() {
        let span = Span::new(100, 200);
        let created = on_created();
        assert_eq!(
            tick_transition(created.is_reserved(), &span, 1_000),
            Some(ReservationState::Unreserved)
        );
    }
}
