//! Property-based tests for ring accounting and the property system.

use proptest::prelude::*;
use sigflow::{
    propagate, validate_connection, BatchRing, ConstraintOp, DType, FilterContract,
    InputConstraint, Overflow, PortMask, PropValue, PropertyTable, RingConfig, SignalProperty,
};

fn test_ring(overflow: Overflow) -> BatchRing {
    BatchRing::new(RingConfig::new(DType::F32, 3, 2).with_overflow(overflow)).unwrap()
}

proptest! {
    /// Occupancy never exceeds `ring_len - 1` under any operation sequence.
    #[test]
    fn prop_occupancy_bounded(ops in prop::collection::vec(prop::bool::ANY, 1..200)) {
        let ring = test_ring(Overflow::DropHead);
        let bound = ring.ring_len() - 1;

        for submit_op in ops {
            if submit_op {
                ring.get_head().batch_id = 0;
                prop_assert!(ring.submit(0).is_ok());
            } else if let Ok(tail) = ring.get_tail(1) {
                prop_assert!(tail.release().is_ok());
            }
            prop_assert!(ring.occupancy() <= bound,
                "occupancy {} exceeds bound {}", ring.occupancy(), bound);
            prop_assert_eq!(ring.space(), bound - ring.occupancy());
        }
    }

    /// Over an empty-to-empty interval, every submit attempt is accounted
    /// for: published = consumed, and drops match attempts - published.
    #[test]
    fn prop_drop_head_accounting(attempts in 0usize..64) {
        let ring = test_ring(Overflow::DropHead);

        for batch_id in 0..attempts {
            ring.get_head().batch_id = batch_id as u64;
            prop_assert!(ring.submit(0).is_ok());
        }

        let mut consumed = 0u64;
        while let Ok(tail) = ring.get_tail(1) {
            tail.release().unwrap();
            consumed += 1;
        }

        let stats = ring.stats();
        prop_assert!(ring.is_empty());
        prop_assert_eq!(stats.total_batches, consumed);
        prop_assert_eq!(stats.dropped_batches + consumed, attempts as u64);
    }

    /// Same conservation law for DropTail: published - dropped = consumed.
    #[test]
    fn prop_drop_tail_accounting(attempts in 0usize..64) {
        let ring = test_ring(Overflow::DropTail);

        for batch_id in 0..attempts {
            ring.get_head().batch_id = batch_id as u64;
            prop_assert!(ring.submit(0).is_ok());
        }

        let mut consumed = 0u64;
        let mut last_id = None;
        while let Ok(tail) = ring.get_tail(1) {
            // DropTail preserves a strictly newer subsequence
            if let Some(previous) = last_id {
                prop_assert!(tail.batch_id > previous);
            }
            last_id = Some(tail.batch_id);
            tail.release().unwrap();
            consumed += 1;
        }

        let stats = ring.stats();
        prop_assert!(ring.is_empty());
        prop_assert_eq!(stats.total_batches, attempts as u64);
        prop_assert_eq!(stats.dropped_by_producer + consumed, attempts as u64);
    }

    /// Propagation through a SET-nothing contract is the identity on the
    /// table a ring configuration implies.
    #[test]
    fn prop_propagate_identity(batch_expo in 0u8..=10, dtype_pick in 0u8..3) {
        let dtype = match dtype_pick {
            0 => DType::F32,
            1 => DType::I32,
            _ => DType::U32,
        };
        let config = RingConfig::new(dtype, batch_expo, 2);
        let table = PropertyTable::from_ring_config(&config);
        let out = propagate(std::slice::from_ref(&table), &FilterContract::new(), 0);
        prop_assert_eq!(out, table);
    }

    /// Validation is pure: repeated evaluation gives the same verdict.
    #[test]
    fn prop_validation_is_pure(limit in 1u32..256, batch_expo in 0u8..=8) {
        let config = RingConfig::new(DType::F32, batch_expo, 2);
        let table = PropertyTable::from_ring_config(&config);

        let mut contract = FilterContract::new();
        contract.push_constraint(InputConstraint {
            property: SignalProperty::MaxBatchCapacity,
            op: ConstraintOp::Lte(PropValue::U32(limit)),
            input_mask: PortMask::ALL,
        }).unwrap();

        let first = validate_connection(&table, &contract, 0);
        let second = validate_connection(&table, &contract, 0);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.is_ok(), config.batch_capacity() as u32 <= limit);
    }
}
