//! Tagged inbound cell queue entries (spec §3, §4.3, §9).

use std::collections::VecDeque;

use tor_cell::chancell::AnyChanCell;

/// A cell queued for delivery to the circuit layer, tagged with whether it
/// arrived as a fixed- or variable-length wire cell.
///
/// The tag determines which handler (`cell_handler` vs `var_cell_handler`)
/// is eligible to consume the entry; per spec §4.3/§5, fixed and variable
/// cells are independently gated so a head-of-line variable cell never
/// blocks a later fixed cell when the variable handler is unbound (and
/// vice-versa).
#[derive(Debug)]
#[non_exhaustive]
pub enum QueuedCell {
    /// A fixed-length cell, dispatched to `cell_handler`.
    Fixed(AnyChanCell),
    /// A variable-length cell, dispatched to `var_cell_handler`.
    Var(AnyChanCell),
}

impl QueuedCell {
    /// Return true if this entry is a fixed-length cell.
    pub fn is_fixed(&self) -> bool {
        matches!(self, QueuedCell::Fixed(_))
    }

    /// Consume this entry, returning the inner cell.
    pub fn into_cell(self) -> AnyChanCell {
        match self {
            QueuedCell::Fixed(c) | QueuedCell::Var(c) => c,
        }
    }
}

/// The inbound queue of a link: cells that have arrived from the transport
/// but have not yet been handed to the circuit layer.
///
/// Ordering is FIFO overall; `process_cells` (in `link.rs`) walks it in
/// order but only removes entries whose matching handler is currently
/// bound, preserving in-order, per-type delivery (spec §4.3, §5).
#[derive(Debug, Default)]
pub(crate) struct InboundQueue(VecDeque<QueuedCell>);

impl InboundQueue {
    /// Construct an empty inbound queue.
    pub(crate) fn new() -> Self {
        Self(VecDeque::new())
    }

    /// Return true if the queue holds no entries.
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Push a new entry onto the back of the queue.
    pub(crate) fn push_back(&mut self, cell: QueuedCell) {
        self.0.push_back(cell);
    }

    /// Remove and deliver every entry of the given kind (`fixed` selects
    /// `QueuedCell::Fixed`), in their original relative order, leaving
    /// entries of the other kind in place.
    ///
    /// Per spec §5's ordering guarantee, a head-of-line entry of one kind
    /// with no bound handler must never block a later entry of the other
    /// kind: a variable cell stuck at the front because `var_cell_handler`
    /// is unbound does not prevent a fixed cell behind it from being
    /// delivered once `cell_handler` is bound. Callers only invoke this
    /// for a kind whose handler is currently bound; this method itself is
    /// an unconditional full-queue scan-and-remove for that kind.
    pub(crate) fn drain_matching<F>(&mut self, fixed: bool, mut deliver: F)
    where
        F: FnMut(AnyChanCell),
    {
        let kept: VecDeque<QueuedCell> = self
            .0
            .drain(..)
            .filter_map(|entry| {
                if entry.is_fixed() == fixed {
                    deliver(entry.into_cell());
                    None
                } else {
                    Some(entry)
                }
            })
            .collect();
        self.0 = kept;
    }

    /// Total number of queued entries, for tests and diagnostics.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tor_cell::chancell::{msg::AnyChanMsg, ChanCell};

    fn padding_cell() -> AnyChanCell {
        ChanCell::new(None, AnyChanMsg::Padding(Default::default()))
    }

    #[test]
    fn drain_matching_does_not_block_on_other_kind_head() {
        let mut q = InboundQueue::new();
        q.push_back(QueuedCell::Var(padding_cell()));
        q.push_back(QueuedCell::Fixed(padding_cell()));
        let mut delivered = 0;
        q.drain_matching(true, |_| delivered += 1);
        // An unbound-handler Var cell at the head must not block the Fixed
        // cell behind it (spec §5's ordering guarantee).
        assert_eq!(delivered, 1);
        assert_eq!(q.len(), 1);
        assert!(!q.is_empty());
    }

    #[test]
    fn drain_matching_preserves_order_of_untaken_kind() {
        let mut q = InboundQueue::new();
        q.push_back(QueuedCell::Var(padding_cell()));
        q.push_back(QueuedCell::Fixed(padding_cell()));
        q.push_back(QueuedCell::Var(padding_cell()));
        let mut delivered = 0;
        q.drain_matching(true, |_| delivered += 1);
        assert_eq!(delivered, 1);
        // Both Var entries remain, in their original relative order.
        assert_eq!(q.len(), 2);
        q.drain_matching(false, |_| delivered += 1);
        assert_eq!(delivered, 3);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_matching_delivers_in_order() {
        let mut q = InboundQueue::new();
        q.push_back(QueuedCell::Fixed(padding_cell()));
        q.push_back(QueuedCell::Fixed(padding_cell()));
        q.push_back(QueuedCell::Var(padding_cell()));
        let mut delivered = 0;
        q.drain_matching(true, |_| delivered += 1);
        assert_eq!(delivered, 2);
        assert_eq!(q.len(), 1);
        assert!(q.is_empty() == false);
    }
}
