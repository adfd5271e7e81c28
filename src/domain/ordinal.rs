//! Cluster ordinal allocation.

use std::collections::BTreeSet;

/// Return `num` cluster ordinals not in `used`, in ascending order.
///
/// Gaps in `used` are filled first, then ordinals past the largest used one
/// are handed out, which keeps the sum of all ordinals minimal.
///
/// ```
/// use std::collections::BTreeSet;
/// use fleetwright::domain::ordinal::allocate_cluster_ordinals;
///
/// let used: BTreeSet<u32> = [0, 2].into();
/// assert_eq!(allocate_cluster_ordinals(3, &used), [1, 3, 4]);
/// ```
#[must_use]
pub fn allocate_cluster_ordinals(num: usize, used: &BTreeSet<u32>) -> Vec<u32> {
    let first_free = used.last().map_or(0, |max| max + 1);
    (0..first_free)
        .filter(|ordinal| !used.contains(ordinal))
        .chain(first_free..)
        .take(num)
        .collect()
}
