// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property test for the universal fan-out invariant (spec §8): at every
//! observation point, `pending ∪ succeeded ∪ failed == targets` and the
//! three sets are disjoint, for any interleaving of successes and failures.

use proptest::prelude::*;

use upflux_gateway::domain::FanOutStatus;

fn targets(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("dev-{i}")).collect()
}

proptest! {
    #[test]
    fn partition_holds_under_any_outcome_interleaving(outcomes in prop::collection::vec(any::<bool>(), 1..32)) {
        let uuids = targets(outcomes.len());
        let mut status = FanOutStatus::new(uuids.clone());

        for (uuid, succeeded) in uuids.iter().zip(outcomes.iter()) {
            if *succeeded {
                status.mark_succeeded(uuid);
            } else {
                status.mark_failed(uuid);
            }

            prop_assert!(status.succeeded.is_disjoint(&status.failed));
            prop_assert!(status.succeeded.is_disjoint(&status.pending));
            prop_assert!(status.failed.is_disjoint(&status.pending));
            prop_assert_eq!(status.targets(), uuids.iter().cloned().collect());
        }

        prop_assert!(status.is_done());
        let expected_succeeded: usize = outcomes.iter().filter(|&&ok| ok).count();
        prop_assert_eq!(status.succeeded.len(), expected_succeeded);
        prop_assert_eq!(status.failed.len(), outcomes.len() - expected_succeeded);
    }

    #[test]
    fn marking_the_same_target_twice_is_idempotent(n in 1usize..16, flip in any::<bool>()) {
        let uuids = targets(n);
        let mut status = FanOutStatus::new(uuids.clone());
        let target = &uuids[0];

        status.mark_succeeded(target);
        if flip {
            status.mark_failed(target);
            prop_assert!(status.failed.contains(target));
            prop_assert!(!status.succeeded.contains(target));
        } else {
            status.mark_succeeded(target);
            prop_assert!(status.succeeded.contains(target));
        }
        prop_assert!(!status.pending.contains(target));
    }
}
