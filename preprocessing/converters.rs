//! Conversion between the Compact and Canonical event layouts.

use crate::preprocessing::events::{CanonicalEvent, CompactEvent};
use itertools::Itertools;

fn sorted_by_entity<T: Copy>(events: &[T], key: impl Fn(&T) -> (i64, f64)) -> Vec<T> {
    let mut sorted = events.to_vec();
    sorted.sort_by(|a, b| {
        let (id_a, t_a) = key(a);
        let (id_b, t_b) = key(b);
        id_a.cmp(&id_b).then(t_a.total_cmp(&t_b))
    });
    sorted
}

/// Compact observations to transitions.
///
/// The first observation of an entity becomes an initial row with `From == To`; each later
/// observation becomes a transition from the previous observed state. Events with an unknown
/// state are skipped.
pub fn to_canonical(events: &[CompactEvent]) -> Vec<CanonicalEvent> {
    let valid: Vec<CompactEvent> = events.iter().copied().filter(|e| e.is_valid()).collect();
    if valid.len() < events.len() {
        log::warn!(
            "Skipped {} events with an unknown state or time",
            events.len() - valid.len()
        );
    }
    let sorted = sorted_by_entity(&valid, |e| (e.id, e.time));
    let mut canonical = Vec::with_capacity(sorted.len());
    for (_, group) in &sorted.iter().chunk_by(|e| e.id) {
        let mut previous: Option<usize> = None;
        for event in group {
            canonical.push(CanonicalEvent {
                id: event.id,
                time: event.time,
                from: previous.or(event.state),
                to: event.state,
            });
            previous = event.state;
        }
    }
    canonical
}

/// Transitions to Compact observations.
///
/// The first row of an entity contributes its `From` state at the row time (and its `To` state
/// as well when the two differ); later rows contribute their `To` state.
pub fn to_compact(events: &[CanonicalEvent]) -> Vec<CompactEvent> {
    let sorted = sorted_by_entity(events, |e| (e.id, e.time));
    let mut compact = Vec::with_capacity(sorted.len());
    for (_, group) in &sorted.iter().chunk_by(|e| e.id) {
        for (position, event) in group.enumerate() {
            if position == 0 {
                compact.push(CompactEvent {
                    id: event.id,
                    time: event.time,
                    state: event.from,
                });
                if event.from != event.to {
                    compact.push(CompactEvent {
                        id: event.id,
                        time: event.time,
                        state: event.to,
                    });
                }
            } else {
                compact.push(CompactEvent {
                    id: event.id,
                    time: event.time,
                    state: event.to,
                });
            }
        }
    }
    compact
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compact(id: i64, time: f64, state: usize) -> CompactEvent {
        CompactEvent {
            id,
            time,
            state: Some(state),
        }
    }

    #[test]
    fn compact_to_canonical_chains_states() {
        let events = vec![compact(1, 0.5, 2), compact(0, 0.0, 0), compact(0, 1.0, 1)];
        let canonical = to_canonical(&events);
        assert_eq!(
            canonical,
            vec![
                CanonicalEvent { id: 0, time: 0.0, from: Some(0), to: Some(0) },
                CanonicalEvent { id: 0, time: 1.0, from: Some(0), to: Some(1) },
                CanonicalEvent { id: 1, time: 0.5, from: Some(2), to: Some(2) },
            ]
        );
    }

    #[test]
    fn round_trip_reproduces_sorted_input() {
        let events = vec![
            compact(0, 0.0, 0),
            compact(0, 0.7, 1),
            compact(0, 1.3, 1),
            compact(3, 0.2, 2),
            compact(3, 0.9, 0),
        ];
        assert_eq!(to_compact(&to_canonical(&events)), events);
    }

    #[test]
    fn leading_transition_expands_to_two_observations() {
        let events = vec![CanonicalEvent {
            id: 4,
            time: 2.0,
            from: Some(1),
            to: Some(0),
        }];
        let compact_events = to_compact(&events);
        assert_eq!(compact_events, vec![compact(4, 2.0, 1), compact(4, 2.0, 0)]);
    }
}
