//! # Gap Resolver
//!
//! Finds the value a gap-filling or repairing allocation should build on.
//!
//! Given the ascending values of a counted attribute above a floor, the
//! resolver returns the first value whose successor is missing or not
//! contiguous. The caller allocates that value `+ 1`:
//!
//! ```text
//! values > 0:  1 2 3 _ 5        -> 3   (allocate 4)
//! values > 0:  1 2 3            -> 3   (allocate 4, the high-water mark)
//! values > 3:  (none)           -> 3   (allocate 4, the floor)
//! ```
//!
//! Holes below the smallest value above the floor are not considered: the
//! walk starts at the first existing value.

use crate::SequenceError;

/// A collection whose members carry a sequence-assigned attribute.
pub trait CountedCollection {
    /// Values of `attribute` that are `> floor`, in ascending order.
    ///
    /// Members where the attribute is unset are omitted.
    fn ordered_values(&self, attribute: &str, floor: u64) -> Result<Vec<u64>, SequenceError>;
}

/// Stateless gap resolution over a `CountedCollection`.
pub struct GapResolver;

impl GapResolver {
    /// Return the value to treat as "current" for the next allocation.
    ///
    /// Runs in a single pass over the ordered scan.
    pub fn find_allocation(
        collection: &dyn CountedCollection,
        attribute: &str,
        floor: u64,
    ) -> Result<u64, SequenceError> {
        let mut values = collection.ordered_values(attribute, floor)?;
        values.retain(|&v| v > floor);
        values.dedup();
        Ok(Self::first_hole(&values).unwrap_or(floor))
    }

    /// First value without a contiguous successor, or `None` if `values` is empty.
    fn first_hole(values: &[u64]) -> Option<u64> {
        let mut iter = values.iter().copied().peekable();
        while let Some(value) = iter.next() {
            match iter.peek() {
                Some(&next) if value.checked_add(1) == Some(next) => {}
                _ => return Some(value),
            }
        }
        None
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Values(Vec<u64>);

    impl CountedCollection for Values {
        fn ordered_values(&self, _attribute: &str, floor: u64) -> Result<Vec<u64>, SequenceError> {
            let mut values: Vec<u64> = self.0.iter().copied().filter(|&v| v > floor).collect();
            values.sort_unstable();
            Ok(values)
        }
    }

    fn resolve(values: &[u64], floor: u64) -> u64 {
        GapResolver::find_allocation(&Values(values.to_vec()), "number", floor).expect("resolve")
    }

    #[test]
    fn empty_collection_returns_floor() {
        assert_eq!(resolve(&[], 0), 0);
        assert_eq!(resolve(&[], 7), 7);
    }

    #[test]
    fn contiguous_run_returns_maximum() {
        assert_eq!(resolve(&[1, 2, 3], 0), 3);
    }

    #[test]
    fn first_interior_hole_wins() {
        assert_eq!(resolve(&[1, 2, 4, 5, 7], 0), 2);
    }

    #[test]
    fn deleted_top_value_is_reused() {
        // {1,2,3} with 3 deleted
        assert_eq!(resolve(&[1, 2], 0), 2);
    }

    #[test]
    fn floor_excludes_lower_values() {
        // Stored value 3, collection {1,2,4}: only 4 is above the floor.
        assert_eq!(resolve(&[1, 2, 4], 3), 4);
        // Hole above the floor.
        assert_eq!(resolve(&[1, 2, 4, 5, 8], 3), 5);
    }

    #[test]
    fn nothing_above_floor_returns_floor() {
        assert_eq!(resolve(&[1, 2, 3], 3), 3);
    }

    #[test]
    fn duplicates_do_not_count_as_holes() {
        assert_eq!(resolve(&[1, 1, 2, 2, 3], 0), 3);
    }

    #[test]
    fn maximum_value_terminates() {
        assert_eq!(resolve(&[u64::MAX - 1, u64::MAX], 0), u64::MAX);
    }
}
