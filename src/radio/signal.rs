//! Packet-ready flag shared between the radio interrupt and the poll loop

use crate::radio::driver::ReceiveHandler;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Flag plus packet length, written from interrupt context only
///
/// A second packet arriving before the poll loop runs overwrites the first
/// one's length; the loop then reads whatever the RX buffer holds.
pub struct ReceiveSignal {
    ready: AtomicBool,
    length: AtomicUsize,
}

impl ReceiveSignal {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            length: AtomicUsize::new(0),
        }
    }

    /// Mark a packet of `len` bytes as ready
    pub fn raise(&self, len: usize) {
        self.length.store(len, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    /// Consume the flag, returning the last reported length
    pub fn take(&self) -> Option<usize> {
        if self.ready.swap(false, Ordering::Acquire) {
            Some(self.length.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

impl Default for ReceiveSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveHandler for ReceiveSignal {
    fn packet_received(&self, len: usize) {
        self.raise(len);
    }
}
