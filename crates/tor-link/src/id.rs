//! Process-wide, monotonically increasing link identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::Display;

/// A 64-bit identifier, unique for the lifetime of the process, assigned
/// to every [`Link`](crate::Link) when it is constructed.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
pub struct LinkId(u64);

/// Global counter backing [`LinkId::next`].
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl LinkId {
    /// Allocate the next `LinkId` in sequence.
    pub(crate) fn next() -> Self {
        LinkId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the numeric value of this id, for logging.
    pub fn get(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = LinkId::next();
        let b = LinkId::next();
        assert!(b.get() > a.get());
    }
}
