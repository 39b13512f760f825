//! Collective operations across the ranks that share the marker set.
//!
//! Every reduction below is a synchronization point: all ranks of the
//! communicator must reach it.

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocking element-wise sum over all ranks, result on every rank.
    fn sum_reduce(&self, values: &mut [f64]);

    /// Blocking gather of variable-length buffers to rank 0, concatenated in
    /// rank order. Ranks other than 0 get `None`.
    fn gather_to_root(&self, local: &[f64]) -> Option<Vec<f64>>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Single process communicator, every collective is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    #[inline]
    fn rank(&self) -> usize {
        0
    }

    #[inline]
    fn size(&self) -> usize {
        1
    }

    #[inline]
    fn sum_reduce(&self, _values: &mut [f64]) {}

    fn gather_to_root(&self, local: &[f64]) -> Option<Vec<f64>> {
        Some(local.to_vec())
    }
}

/// One rank of a two-rank run whose partner is replayed from a script: every
/// reduction adds the next queued remote buffer and rank 0 receives the
/// remote payload after its own in every gather.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedComm {
    rank: usize,
    remote_sums: std::cell::RefCell<std::collections::VecDeque<Vec<f64>>>,
    remote_payload: Vec<f64>,
}

#[cfg(test)]
impl ScriptedComm {
    pub(crate) fn new(rank: usize) -> Self {
        assert!(rank < 2);
        Self {
            rank,
            ..Default::default()
        }
    }

    pub(crate) fn then_sum(self, remote: &[f64]) -> Self {
        self.remote_sums.borrow_mut().push_back(remote.to_vec());
        self
    }

    pub(crate) fn with_payload(mut self, remote: &[f64]) -> Self {
        self.remote_payload = remote.to_vec();
        self
    }

    pub(crate) fn pending_sums(&self) -> usize {
        self.remote_sums.borrow().len()
    }
}

#[cfg(test)]
impl Communicator for ScriptedComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        2
    }

    fn sum_reduce(&self, values: &mut [f64]) {
        let remote = self
            .remote_sums
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted reduction of {} values", values.len()));
        assert_eq!(remote.len(), values.len());
        for (x, r) in values.iter_mut().zip(remote) {
            *x += r;
        }
    }

    fn gather_to_root(&self, local: &[f64]) -> Option<Vec<f64>> {
        self.is_root()
            .then(|| local.iter().chain(&self.remote_payload).copied().collect())
    }
}
