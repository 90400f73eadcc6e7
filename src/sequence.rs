/// How far behind the counter a reply may lag once sequence numbers wrap.
pub const ACCEPT_WINDOW: u16 = 120;

/// The per-session 16-bit echo sequence counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u16,
    has_wrapped: bool,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number the next request will carry.
    pub fn next(&self) -> u16 {
        self.next
    }

    pub fn has_wrapped(&self) -> bool {
        self.has_wrapped
    }

    /// Moves past the number just sent.
    pub fn advance(&mut self) {
        self.next = self.next.wrapping_add(1);
        if self.next == 0 {
            self.has_wrapped = true;
        }
    }

    /// Whether `sequence` could be a reply to something we sent recently.
    pub fn accepts(&self, sequence: u16) -> bool {
        if self.has_wrapped {
            self.next.wrapping_sub(sequence) < ACCEPT_WINDOW
        } else {
            sequence < self.next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(next: u16, has_wrapped: bool) -> SequenceCounter {
        SequenceCounter { next, has_wrapped }
    }

    #[test]
    fn test_accepts_before_wrap() {
        let counter = counter(5, false);
        assert!(counter.accepts(0));
        assert!(counter.accepts(4));
        assert!(!counter.accepts(5));
        assert!(!counter.accepts(65535));
    }

    #[test]
    fn test_accepts_after_wrap() {
        let counter = counter(10, true);
        assert!(counter.accepts(9));
        assert!(counter.accepts(65530)); // 116 behind
        assert!(!counter.accepts(65400)); // 146 behind
        assert!(!counter.accepts(65426)); // exactly 120 behind
        assert!(counter.accepts(65427));
    }

    #[test]
    fn test_fresh_counter_accepts_nothing() {
        assert!(!SequenceCounter::new().accepts(0));
    }

    #[test]
    fn test_wraps_after_full_cycle() {
        let mut counter = SequenceCounter::new();
        for _ in 0..65535 {
            counter.advance();
        }
        assert_eq!(counter.next(), 65535);
        assert!(!counter.has_wrapped());

        counter.advance();
        assert_eq!(counter.next(), 0);
        assert!(counter.has_wrapped());

        counter.advance();
        assert!(counter.has_wrapped());
    }
}
