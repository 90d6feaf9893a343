//! Upward callback slots: the circuit layer's hooks into a link (spec §3,
//! "Callback slots").
//!
//! Per the design notes (§9), dynamic dispatch via callback pointers is
//! modeled here as boxed closures rather than a trait object per slot; a
//! handler is free to capture whatever state the circuit layer needs.

use tor_cell::chancell::AnyChanCell;

use crate::link::Link;

/// Upcall invoked for each fixed-length cell delivered to a link.
pub type CellHandler = Box<dyn FnMut(&Link, AnyChanCell) + Send>;

/// Upcall invoked for each variable-length cell delivered to a link.
pub type VarCellHandler = Box<dyn FnMut(&Link, AnyChanCell) + Send>;

/// Upcall invoked when a listening link accepts an incoming link.
pub type ListenerHandler = Box<dyn FnMut(&Link, Link) + Send>;
