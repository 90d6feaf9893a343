//! Error type for the `tor-link` crate.

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

/// An error type for the `tor-link` crate.
///
/// Kinds loosely correspond to the programming-error / protocol-error /
/// transport-error split described for the link layer: a [`Error::Bug`]
/// is always a programming error, the handshake variants are always
/// protocol errors resolved by closing the link, and [`Error::Transport`]
/// wraps an error reported by the underlying authenticated stream.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A transition was attempted that the link state machine does not
    /// allow, or an operation was attempted while the link was in the
    /// wrong state.
    #[error("programming error: {0}")]
    Bug(#[from] tor_error::InternalError),

    /// A handshake frame arrived out of order, duplicated, or otherwise
    /// violated the v3 handshake's gating rules.
    #[error("link handshake protocol violation: {0}")]
    HandshakeProto(String),

    /// A certificate in a `CERTS` cell failed validation.
    #[error("certificate rejected: {0}")]
    CertsInvalid(String),

    /// An `AUTHENTICATE` cell's fixed part or signature did not check out.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The peer's `NETINFO` timestamp implied clock skew large enough to
    /// be treated as an error condition (only used when skew checking is
    /// configured to be fatal; normally skew is merely logged).
    #[error("excessive clock skew: {0} seconds")]
    ClockSkew(i64),

    /// An error from the `tor_bytes` crate while decoding a handshake
    /// payload.
    #[error("parsing error: {0}")]
    BytesErr(#[from] tor_bytes::Error),

    /// An error from the `tor_cell` crate while encoding or decoding a
    /// cell.
    #[error("cell encoding error: {0}")]
    CellErr(#[from] tor_cell::Error),

    /// The underlying transport reported an I/O error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The link was already closed, finished, or freed.
    #[error("link is closed")]
    LinkClosed,
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Bug(e) => e.kind(),
            Error::HandshakeProto(_)
            | Error::CertsInvalid(_)
            | Error::AuthFailed(_)
            | Error::ClockSkew(_) => ErrorKind::TorProtocolViolation,
            Error::BytesErr(_) | Error::CellErr(_) => ErrorKind::TorProtocolViolation,
            Error::Transport(_) => ErrorKind::LocalNetworkError,
            Error::LinkClosed => ErrorKind::CircuitCollapse,
        }
    }
}

/// The outcome of consulting the guard-reachability policy layer when a
/// link first reaches `OPEN`.
///
/// This is a policy decision, not an error (§7(d)): on rejection the link
/// itself remains `OPEN`, but circuits pending on it are told to give up
/// on this link and the link is not offered for new circuit attachment
/// until a future policy re-evaluation accepts it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum GuardPolicyVerdict {
    /// The link may be used to attach new circuits.
    Accepted,
    /// The link may not presently be used to attach new circuits, though
    /// it remains open and may become usable later.
    Rejected,
}
