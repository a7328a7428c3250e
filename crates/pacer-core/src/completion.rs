/// Barrier between "upstream signaled done" and "local rendering finished".
///
/// Opens only when the authoritative text has arrived, the queue is empty and
/// the pacing loop is idle. Releases the authoritative text exactly once.
#[derive(Debug, Default)]
pub struct CompletionBarrier {
    authoritative: Option<String>,
    released: bool,
}

impl CompletionBarrier {
    /// Stores the authoritative text. Returns `false` (and keeps the first
    /// value) if it was already set.
    pub fn record_upstream_done(&mut self, full_text: String) -> bool {
        if self.authoritative.is_some() || self.released {
            return false;
        }
        self.authoritative = Some(full_text);
        true
    }

    pub fn upstream_done(&self) -> bool {
        self.authoritative.is_some() || self.released
    }

    pub fn is_open(&self, queued: usize, pacing_active: bool) -> bool {
        self.authoritative.is_some() && queued == 0 && !pacing_active
    }

    /// Takes the authoritative text if the barrier is open.
    pub fn release(&mut self, queued: usize, pacing_active: bool) -> Option<String> {
        if !self.is_open(queued, pacing_active) {
            return None;
        }
        self.released = true;
        self.authoritative.take()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_until_both_signals_hold() {
        let mut barrier = CompletionBarrier::default();
        assert!(!barrier.is_open(0, false));
        assert!(barrier.record_upstream_done("Hello".into()));
        assert!(!barrier.is_open(2, false));
        assert!(!barrier.is_open(0, true));
        assert_eq!(barrier.release(0, true), None);
        assert_eq!(barrier.release(0, false), Some("Hello".into()));
    }

    #[test]
    fn releases_once_and_ignores_second_done() {
        let mut barrier = CompletionBarrier::default();
        assert!(barrier.record_upstream_done("a".into()));
        assert!(!barrier.record_upstream_done("b".into()));
        assert_eq!(barrier.release(0, false), Some("a".into()));
        assert!(barrier.is_released());
        assert_eq!(barrier.release(0, false), None);
        assert!(!barrier.record_upstream_done("c".into()));
        assert!(barrier.upstream_done());
    }
}
