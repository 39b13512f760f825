use crate::ldata::LagrangianDataManager;

/// Partition of the Lagrangian index space into rigid structures.
///
/// Structure `k` owns the half-open range `ranges[k]`. Structures are ordered
/// by ID and their ranges never overlap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructureIndexMap {
    ranges: Vec<(usize, usize)>,
}

impl StructureIndexMap {
    pub fn new(ranges: Vec<(usize, usize)>) -> Self {
        debug_assert!(ranges.iter().all(|&(first, last)| first <= last));
        debug_assert!({
            let mut sorted = ranges.clone();
            sorted.sort_unstable();
            sorted.windows(2).all(|w| w[0].1 <= w[1].0)
        });
        Self { ranges }
    }

    /// Queries the manager for the structures on `level`, sorted by ID.
    pub fn from_manager(manager: &impl LagrangianDataManager, level: usize) -> Self {
        let mut ids = manager.structure_ids(level);
        ids.sort_unstable();
        Self::new(
            ids.into_iter()
                .map(|id| manager.structure_index_range(id, level))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range(&self, part: usize) -> (usize, usize) {
        self.ranges[part]
    }

    /// Structure owning `lag_idx`, `None` when no range contains it.
    pub fn handle(&self, lag_idx: usize) -> Option<usize> {
        self.ranges
            .iter()
            .position(|&(first, last)| first <= lag_idx && lag_idx < last)
    }

    /// Like [`Self::handle`], but skips the scan when there is one structure.
    #[inline]
    pub(crate) fn owner(&self, lag_idx: usize) -> Option<usize> {
        if self.ranges.len() == 1 {
            Some(0)
        } else {
            self.handle(lag_idx)
        }
    }

    pub fn contains(&self, part: usize, lag_idx: usize) -> bool {
        let (first, last) = self.ranges[part];
        first <= lag_idx && lag_idx < last
    }

    pub fn number_of_nodes(&self, part: usize) -> usize {
        let (first, last) = self.ranges[part];
        last - first
    }

    /// Lagrangian indices of `parts`, structure by structure.
    pub fn lagrangian_indices(&self, parts: &[usize]) -> Vec<usize> {
        parts
            .iter()
            .flat_map(|&part| {
                let (first, last) = self.ranges[part];
                first..last
            })
            .collect()
    }
}
