//! Property tests for fan-in buffering.
//!
//! For any interleaving of deliveries, the k-th composite released by a
//! fan-in edge must contain the k-th message of every source, ordered by
//! source registration, and the number of composites must equal the
//! number of complete cycles.

use proptest::prelude::*;
use serde_json::json;
use weft_core::{Envelope, FanInState, MessageType};

fn envelope(source: usize, seq: usize) -> Envelope {
    Envelope::new(json!([source, seq]), MessageType::named("item"))
}

proptest! {
    #[test]
    fn composites_follow_registration_order(
        deliveries in proptest::collection::vec(0usize..4, 0..64),
    ) {
        let sources: Vec<String> = (0..4).map(|i| format!("s{i}")).collect();
        let mut state = FanInState::new(sources.clone());

        let mut per_source_seq = [0usize; 4];
        let mut composites = Vec::new();

        for &source in &deliveries {
            let seq = per_source_seq[source];
            per_source_seq[source] += 1;
            if let Some(members) = state.on_delivery(&sources[source], envelope(source, seq)) {
                composites.push(members);
            }
        }

        let complete_cycles = *per_source_seq.iter().min().unwrap();
        prop_assert_eq!(composites.len(), complete_cycles);

        for (cycle, members) in composites.iter().enumerate() {
            prop_assert_eq!(members.len(), 4);
            for (idx, member) in members.iter().enumerate() {
                // Member idx is the cycle-th message of source idx.
                prop_assert_eq!(&member.payload, &json!([idx, cycle]));
            }
        }
    }

    #[test]
    fn pending_state_reflects_incomplete_cycles(
        deliveries in proptest::collection::vec(0usize..3, 0..32),
    ) {
        let sources: Vec<String> = (0..3).map(|i| format!("s{i}")).collect();
        let mut state = FanInState::new(sources.clone());

        let mut counts = [0usize; 3];
        for &source in &deliveries {
            let seq = counts[source];
            counts[source] += 1;
            state.on_delivery(&sources[source], envelope(source, seq));
        }

        let complete = *counts.iter().min().unwrap();
        let leftovers: usize = counts.iter().map(|c| c - complete).sum();
        prop_assert_eq!(state.has_pending(), leftovers > 0);
    }
}
