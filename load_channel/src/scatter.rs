//! Partitioning of a packet's rows by destination tablet.

use std::{ops::Range, sync::Arc};

use hashbrown::HashMap;
use load_types::TabletId;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid tablet id {0}")]
pub(crate) struct UnknownTablet(pub(crate) TabletId);

/// The rows of one packet grouped by tablet.
///
/// `row_indexes[boundaries[i]..boundaries[i + 1]]` are the rows, in their original order, bound
/// for the tablet with ordinal `i`.
#[derive(Debug)]
pub(crate) struct RowScatter {
    row_indexes: Arc<[u32]>,
    boundaries: Vec<u32>,
}

impl RowScatter {
    /// Group the rows of a packet by the ordinal of their tablet in `sorted_index`.
    ///
    /// `tablet_ids[i]` is the destination of row `i`. Runs in `O(rows + tablets)`.
    pub(crate) fn new(
        tablet_ids: &[TabletId],
        sorted_index: &HashMap<TabletId, u32>,
    ) -> Result<Self, UnknownTablet> {
        let ordinals = tablet_ids
            .iter()
            .map(|id| sorted_index.get(id).copied().ok_or(UnknownTablet(*id)))
            .collect::<Result<Vec<u32>, _>>()?;

        let mut boundaries = vec![0u32; sorted_index.len() + 1];
        for &ordinal in &ordinals {
            boundaries[ordinal as usize] += 1;
        }
        // Each entry now holds the end of its tablet's range, the last one the row count.
        for i in 1..boundaries.len() {
            boundaries[i] += boundaries[i - 1];
        }

        // Filling each range back to front keeps rows in their original order within a range,
        // and leaves every entry pointing at the start of its range.
        let mut row_indexes = vec![0u32; ordinals.len()];
        for (row, &ordinal) in ordinals.iter().enumerate().rev() {
            let end = &mut boundaries[ordinal as usize];
            *end -= 1;
            row_indexes[*end as usize] = row as u32;
        }

        Ok(Self {
            row_indexes: row_indexes.into(),
            boundaries,
        })
    }

    pub(crate) fn row_indexes(&self) -> &Arc<[u32]> {
        &self.row_indexes
    }

    /// Non-empty row ranges, paired with the ordinal of the tablet they belong to.
    pub(crate) fn ranges(&self) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        self.boundaries
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] < w[1])
            .map(|(ordinal, w)| (ordinal, w[0] as usize..w[1] as usize))
    }

    #[cfg(test)]
    pub(crate) fn boundaries(&self) -> &[u32] {
        &self.boundaries
    }
}
