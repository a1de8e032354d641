//! Begin Latch
//!
//! One-way gate that opens the first time a flow crosses the volume
//! threshold. Port counters are only persisted once it is armed.

use std::sync::atomic::{AtomicBool, Ordering};

/// Monotonic begin latch, never reset
#[derive(Debug, Default)]
pub struct BeginLatch {
    armed: AtomicBool,
}

impl BeginLatch {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
        }
    }

    /// Arm the latch. Returns true only for the call that armed it.
    pub fn arm(&self) -> bool {
        let armed = self
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if armed {
            tracing::info!("Begin latch armed, port telemetry persistence enabled");
        }
        armed
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_arm_once() {
        let latch = BeginLatch::new();
        assert!(!latch.is_armed());

        assert!(latch.arm());
        assert!(!latch.arm());
        assert!(latch.is_armed());
    }

    #[test]
    fn test_concurrent_arm_has_single_winner() {
        let latch = Arc::new(BeginLatch::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.arm())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(latch.is_armed());
    }
}
