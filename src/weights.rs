//! Shared weight storage
//!
//! One weight group per layer position. A network and every function compiled from
//! it hold the same `Rc<RefCell<WeightStore>>`, so an update made by a train step is
//! what the next test or inference call reads.

use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

/// Per-layer weight groups, indexed by layer position. Parameter-free layers have
/// an empty group.
pub type WeightSet = Vec<Vec<Tensor>>;

/// Handle through which the network and its compiled functions share weights.
pub type SharedWeights = Rc<RefCell<WeightStore>>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightStore {
    groups: WeightSet,
}

impl WeightStore {
    pub fn new(groups: WeightSet) -> Self {
        Self { groups }
    }

    pub fn shared(self) -> SharedWeights {
        Rc::new(RefCell::new(self))
    }

    pub fn num_layers(&self) -> usize {
        self.groups.len()
    }

    /// Weight group of the layer at `position` (empty past the end).
    pub fn group(&self, position: usize) -> &[Tensor] {
        self.groups.get(position).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn group_mut(&mut self, position: usize) -> &mut [Tensor] {
        self.groups
            .get_mut(position)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut [])
    }

    pub fn groups(&self) -> &[Vec<Tensor>] {
        &self.groups
    }

    /// Deep copy of every group.
    pub fn snapshot(&self) -> WeightSet {
        self.groups.clone()
    }

    /// Total number of scalar weights.
    pub fn count(&self) -> usize {
        self.groups.iter().flatten().map(Tensor::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_access() {
        let store = WeightStore::new(vec![
            Vec::new(),
            vec![Tensor::zeros(vec![2, 3]), Tensor::zeros(vec![3])],
        ]);
        assert_eq!(store.num_layers(), 2);
        assert!(store.group(0).is_empty());
        assert_eq!(store.group(1).len(), 2);
        assert!(store.group(7).is_empty());
        assert_eq!(store.count(), 9);
    }

    #[test]
    fn test_shared_handles_see_updates() {
        let shared = WeightStore::new(vec![vec![Tensor::zeros(vec![1])]]).shared();
        let other = Rc::clone(&shared);
        shared.borrow_mut().group_mut(0)[0].data_mut()[0] = 4.0;
        assert_eq!(other.borrow().group(0)[0].data(), &[4.0]);
    }
}
