use std::collections::VecDeque;

use crate::unit::Unit;

/// FIFO buffer of units waiting to be rendered.
///
/// Single producer, single consumer; callers serialize access, so there is
/// no internal locking.
#[derive(Debug, Default)]
pub struct UnitQueue {
    units: VecDeque<Unit>,
}

impl UnitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends units at the tail in iteration order. Returns how many were
    /// appended.
    pub fn push(&mut self, units: impl IntoIterator<Item = Unit>) -> usize {
        let before = self.units.len();
        self.units.extend(units);
        self.units.len() - before
    }

    /// Removes and returns at most `n` units from the head.
    pub fn pop_up_to(&mut self, n: usize) -> Vec<Unit> {
        let take = n.min(self.units.len());
        self.units.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Empties the queue and returns how many units were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.units.len();
        self.units.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::split_units;

    fn joined(units: &[Unit]) -> String {
        units.iter().map(Unit::as_str).collect()
    }

    #[test]
    fn pops_in_arrival_order_across_pushes() {
        let mut queue = UnitQueue::new();
        assert_eq!(queue.push(split_units("Hel")), 3);
        assert_eq!(queue.push(split_units("lo")), 2);
        assert_eq!(joined(&queue.pop_up_to(2)), "He");
        assert_eq!(joined(&queue.pop_up_to(10)), "llo");
        assert!(queue.is_empty());
        assert!(queue.pop_up_to(3).is_empty());
    }

    #[test]
    fn clear_reports_discarded_count() {
        let mut queue = UnitQueue::new();
        queue.push(split_units("abcd"));
        queue.pop_up_to(1);
        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.len(), 0);
    }
}
