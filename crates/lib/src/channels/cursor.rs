//! Per-channel inbound cursor.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Opaque position in a channel's inbound stream (Telegram: next update id to request).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(pub i64);

impl Cursor {
    pub fn value(self) -> i64 {
        self.0
    }
}

/// Stored cursor for one adapter instance. Only ever moves forward; lives as long as the adapter.
///
/// Concurrent waits on one channel share this store. Whichever wait commits first wins the
/// messages it read; the store does not serialize waits.
#[derive(Debug, Default)]
pub struct CursorStore {
    position: AtomicI64,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Cursor {
        Cursor(self.position.load(Ordering::SeqCst))
    }

    /// Move to `to` if it is ahead of the stored position. Returns true when the cursor moved.
    pub fn advance(&self, to: Cursor) -> bool {
        let previous = self.position.fetch_max(to.0, Ordering::SeqCst);
        previous < to.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let store = CursorStore::new();
        assert_eq!(store.current(), Cursor(0));
        assert!(store.advance(Cursor(5)));
        assert!(!store.advance(Cursor(3)));
        assert_eq!(store.current(), Cursor(5));
        assert!(!store.advance(Cursor(5)));
        assert!(store.advance(Cursor(9)));
        assert_eq!(store.current().value(), 9);
    }
}
