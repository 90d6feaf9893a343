//! The downward contract from a link to its authenticated transport (spec
//! §4.6, §6).
//!
//! The transport is treated as an opaque, already-authenticated,
//! bidirectional byte stream (a TLS-like session) whose peer certificate
//! chain and live public key are inspectable; this crate never implements
//! or depends on TLS itself.

use tor_cell::chancell::AnyChanCell;
use tor_llcrypto::pk::rsa::PublicKey;

use crate::Result;

/// The sub-state of the transport during link setup, used to gate which
/// handshake commands are acceptable (spec §4.7).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum TransportSubState {
    /// The authenticated-transport handshake (e.g. TLS) is still running.
    TlsHandshaking,
    /// The server side is renegotiating the transport handshake.
    TlsServerRenegotiating,
    /// Transport handshake complete; running the v2 link handshake
    /// (`VERSIONS` only, straight to `NETINFO`).
    OrHandshakingV2,
    /// Transport handshake complete; running the v3 link handshake.
    OrHandshakingV3,
    /// The link handshake is complete and cells flow normally.
    Open,
}

impl TransportSubState {
    /// Return true if `cmd` is one of the handful of commands permitted
    /// before the transport's own handshake has completed (spec §4.7:
    /// `{VERSIONS, VPADDING, AUTHORIZE}`).
    pub fn permits_before_handshake(cmd: tor_cell::chancell::ChanCmd) -> bool {
        use tor_cell::chancell::ChanCmd;
        matches!(cmd, ChanCmd::VERSIONS | ChanCmd::VPADDING | ChanCmd::AUTHORIZE)
    }
}

/// The downward operations a link calls on its transport (spec §3
/// "Callback slots": `close`, `write_cell`, `write_var_cell`).
///
/// A concrete transport-bound link (spec §4.6) implements this trait once
/// for the authenticated stream it owns.
pub trait Transport: Send {
    /// Write a fixed-length cell to the wire.
    fn write_cell(&mut self, cell: &AnyChanCell) -> Result<()>;

    /// Write a variable-length cell to the wire.
    fn write_var_cell(&mut self, cell: &AnyChanCell) -> Result<()>;

    /// Begin tearing down the underlying transport.
    ///
    /// Per spec §9 (Open Questions), the exact teardown sequence --
    /// whether the outbound queue should be drained first or discarded --
    /// is left to the transport implementation; this trait only requires
    /// that `closed()` eventually be reported back to the link once
    /// teardown completes.
    fn close(&mut self);

    /// Return the live public key presented by the peer in the
    /// authenticated transport's own handshake (e.g. the TLS session
    /// key), used to cross-check the `TLS_LINK` certificate in `CERTS`
    /// (spec §4.7).
    fn peer_session_public_key(&self) -> Option<PublicKey>;

    /// Return the local address of this transport connection, as seen by
    /// us, for canonicalization checks against peer-advertised addresses
    /// in `NETINFO` (spec §4.7).
    fn local_addr(&self) -> Option<std::net::SocketAddr>;

    /// Return the remote address of this transport connection.
    fn remote_addr(&self) -> Option<std::net::SocketAddr>;
}
