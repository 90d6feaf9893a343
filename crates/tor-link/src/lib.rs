//! Inter-relay link layer: link lifecycle, the v3 link handshake, and the
//! relay-crypt dispatcher.
//!
//! A "link" multiplexes fixed- and variable-length [`tor_cell`] cells over a
//! single authenticated, encrypted transport to a peer relay. Before cells
//! may flow, the two endpoints run the v3 link handshake
//! ([`handshake`]) to negotiate a protocol version and mutually
//! authenticate. Once a link is open, relayed `RELAY` cells are
//! symmetrically en/decrypted per hop by a small worker pool, the
//! [`relaycrypt`] dispatcher.
//!
//! This crate does not interpret `RELAY` cell contents, perform path
//! selection, or manage circuit identifiers beyond seeding a starting
//! value and routing by `circ_id`; all of that belongs to the circuit
//! layer above.
// @@ begin lint list maintained by maint/add_warning @@
#![allow(renamed_and_removed_lints)] // @@REMOVE_WHEN(ci_arti_stable)
#![allow(unknown_lints)] // @@REMOVE_WHEN(ci_arti_nightly)
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unchecked_duration_subtraction)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::significant_drop_in_scrutinee)]
#![allow(clippy::result_large_err)]
#![allow(clippy::needless_raw_string_hashes)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

mod config;
mod err;
mod handlers;
mod id;
mod link;
mod queue;
mod registry;
mod relaycrypt;
mod state;
mod transport;

pub mod handshake;

pub use config::LinkConfig;
pub use err::{Error, GuardPolicyVerdict};
pub use handlers::{CellHandler, ListenerHandler, VarCellHandler};
pub use id::LinkId;
pub use link::{Link, LinkRef};
pub use queue::QueuedCell;
pub use registry::Registry;
pub use relaycrypt::{CellDirection, RelayCryptDispatcher};
pub use state::{CloseReason, LinkState};
pub use transport::{Transport, TransportSubState};

/// Result type returned by the fallible functions in this crate.
pub type Result<T> = std::result::Result<T, Error>;
