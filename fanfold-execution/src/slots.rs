//! Per-slot bitmaps tracked by coordinators

/// Fixed-size set of slot indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMask {
    bits: Vec<bool>,
}

impl SlotMask {
    /// All slots clear
    pub fn empty(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// All slots set
    pub fn full(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    pub fn set(&mut self, idx: usize) {
        if let Some(bit) = self.bits.get_mut(idx) {
            *bit = true;
        }
    }

    pub fn clear(&mut self, idx: usize) {
        if let Some(bit) = self.bits.get_mut(idx) {
            *bit = false;
        }
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.bits.get(idx).copied().unwrap_or(false)
    }

    /// Number of set slots
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    pub fn reset(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
    }

    /// Set slot indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(idx, set)| set.then_some(idx))
    }

    /// Number of set slots that are also set in `other`
    pub fn count_common(&self, other: &SlotMask) -> usize {
        self.iter().filter(|idx| other.contains(*idx)).count()
    }
}
