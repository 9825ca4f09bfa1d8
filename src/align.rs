//! Reconcile the three constellation solutions of one station onto the epochs
//! they all share.

use std::collections::HashSet;

use log::trace;

use crate::table::TimeTable;

/// Three tables of one station, one per constellation, restricted to a common
/// time index.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedTriple {
    pub gps: TimeTable,
    pub glonass: TimeTable,
    pub gps_glonass: TimeTable,
}

impl AlignedTriple {
    pub fn index(&self) -> &[i64] {
        self.gps.index()
    }
}

/// The epochs of `a` that are also in both `b` and `c`, in the order of `a`.
pub fn common_index(a: &TimeTable, b: &TimeTable, c: &TimeTable) -> Vec<i64> {
    let c: HashSet<i64> = c.index().iter().copied().collect();
    let bc: HashSet<i64> = b.index().iter().copied().filter(|t| c.contains(t)).collect();
    a.index().iter().copied().filter(|t| bc.contains(t)).collect()
}

/// Copy the rows of each table at the epochs common to all three. An empty
/// intersection gives three tables with their columns but no rows.
pub fn align(gps: &TimeTable, glonass: &TimeTable, gps_glonass: &TimeTable) -> AlignedTriple {
    let common = common_index(gps, glonass, gps_glonass);
    trace!(
        "Aligned {} / {} / {} epochs down to {}",
        gps.num_rows(),
        glonass.num_rows(),
        gps_glonass.num_rows(),
        common.len()
    );
    let select = |t: &TimeTable| {
        let positions = t.positions();
        let rows: Vec<usize> = common.iter().map(|e| positions[e]).collect();
        t.select_rows(&rows)
    };
    AlignedTriple {
        gps: select(gps),
        glonass: select(glonass),
        gps_glonass: select(gps_glonass),
    }
}
