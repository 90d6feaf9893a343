//! The v3 link handshake protocol engine (spec §4.7).
//!
//! This module is a pure state-transition engine: it consumes handshake
//! frames and produces a [`HandshakeOutput`] describing what to send and
//! what changed, without touching any transport or link I/O itself. The
//! transport-bound link (`transport.rs`/`link.rs`) drives it and applies
//! the side effects (writing cells, updating `Link` fields, calling
//! `change_state`).

mod auth;
mod cert;
mod certs;
mod digest;
mod netinfo;
mod versions;

pub use cert::{identity_of, LinkCert, RsaDerCert};
pub use digest::RollingDigest;
pub use versions::initiate;

use std::time::SystemTime;

use tor_cell::chancell::msg::{self, AnyChanMsg};
use tor_cell::chancell::{ChanCmd, ChanMsg};
use tor_llcrypto::pk::rsa::RsaIdentity;

use crate::err::Error;
use crate::transport::TransportSubState;
use crate::Result;

/// Authentication type code for `RSA_SHA256_TLSSECRET` (spec §6).
pub const AUTHTYPE_RSA_SHA256_TLSSECRET: u16 = 1;

/// Length, in bytes, of the "fixed part" of an `AUTHENTICATE` body that
/// this crate computes and checks (spec §4.7's `V3_AUTH_FIXED_PART_LEN`).
///
/// The exact byte layout of the real Tor protocol's fixed part is not
/// reproduced here (see `DESIGN.md`); this crate defines its own
/// self-consistent construction in `auth::fixed_part` that satisfies the
/// round-trip and boundary properties in spec §8.
pub const V3_AUTH_FIXED_PART_LEN: usize = 8 + 20 + 20 + 32;

/// Threshold, in seconds, above which clock skew is logged (spec §6).
pub const SKEW_WARN_THRESHOLD_SECS: i64 = 3600;

/// Freshness window, in seconds, within which `sent_versions_at` must lie
/// for a skew computation to be attempted at all (spec §4.7, §6).
pub const VERSIONS_FRESHNESS_WINDOW_SECS: u64 = 180;

/// Per-link state that persists across the handshake (spec §3
/// "Handshake state").
pub struct HandshakeState<C: LinkCert> {
    /// Whether we initiated this link.
    pub started_here: bool,
    /// Negotiated link protocol version, or 0 before `VERSIONS` completes.
    pub link_proto: u16,
    pub received_versions: bool,
    pub received_certs_cell: bool,
    pub received_auth_challenge: bool,
    pub received_authenticate: bool,
    pub authenticated: bool,
    /// Whether we have sent our own `NETINFO` yet.
    pub sent_netinfo: bool,
    /// Whether we have received the peer's `NETINFO` yet.
    pub received_netinfo: bool,
    /// The peer's `ID_1024` certificate, once validated by `CERTS`.
    pub id_cert: Option<C>,
    /// The peer's `AUTH_1024` certificate (server side only).
    pub auth_cert: Option<C>,
    /// The peer's authenticated identity, once known.
    pub authenticated_peer_id: Option<RsaIdentity>,
    /// Wall-clock time at which we sent our `VERSIONS` cell.
    pub sent_versions_at: Option<SystemTime>,
    /// The nonce from the `AUTH_CHALLENGE` we received (client side).
    pub auth_challenge_nonce: Option<[u8; 32]>,
    /// Rolling digest over handshake frames sent/received so far.
    pub digest: RollingDigest,
}

impl<C: LinkCert> HandshakeState<C> {
    /// Construct a fresh handshake state for a link that either initiated
    /// (`started_here`) or accepted the connection.
    pub fn new(started_here: bool) -> Self {
        HandshakeState {
            started_here,
            link_proto: 0,
            received_versions: false,
            received_certs_cell: false,
            received_auth_challenge: false,
            received_authenticate: false,
            authenticated: false,
            sent_netinfo: false,
            received_netinfo: false,
            id_cert: None,
            auth_cert: None,
            authenticated_peer_id: None,
            sent_versions_at: None,
            auth_challenge_nonce: None,
            digest: RollingDigest::new(),
        }
    }
}

/// Environment the handshake engine needs from its embedder for one
/// [`feed`] call: our own configuration and key material, plus whatever
/// address/clock facts the transport layer can supply.
///
/// This is rebuilt (cheaply; it borrows everything) for each call rather
/// than stored, since the engine itself is stateless aside from
/// [`HandshakeState`].
pub struct HandshakeEnv<'a, C: LinkCert> {
    /// Link protocol versions we support, highest-preference last or
    /// first; only membership and max-in-common matter.
    pub my_link_protocols: &'a [u16],
    /// Whether we operate in public-server mode (we challenge clients to
    /// authenticate and reply to challenges ourselves when we connect
    /// out).
    pub public_server_mode: bool,
    /// Whether we hold an `AUTH_1024` certificate and should authenticate
    /// when challenged (true for relays dialing out, false for plain
    /// clients).
    pub can_authenticate: bool,
    /// Our own self-signed `ID_1024` certificate, if our identity material
    /// has been configured yet. A link with no identity configured can
    /// still run the parts of the handshake that don't need one (it can
    /// be a bare initiator probing link protocols), but cannot act as a
    /// v3 responder or authenticate.
    pub our_identity_cert: Option<&'a C>,
    /// Our own identity, for convenience (equal to
    /// `identity_of(our_identity_cert)`), if known.
    pub our_identity: Option<RsaIdentity>,
    /// The `CERTS` cell we send: `{ID_1024, TLS_LINK}` if we are the
    /// responder, `{ID_1024, AUTH_1024}` if we are the initiator.
    pub our_certs_cell: Option<msg::Certs>,
    /// The live public key the peer presented in the authenticated
    /// transport's own handshake (e.g. the TLS session key).
    pub peer_session_public_key: Option<tor_llcrypto::pk::rsa::PublicKey>,
    /// How to sign an `AUTHENTICATE` fixed part with our `AUTH_1024`
    /// private key (returns the RSA signature bytes).
    pub sign_authenticate: Option<&'a dyn Fn(&[u8]) -> Vec<u8>>,
    /// Is `id` one of our trusted directory identities (affects the
    /// clock-skew log severity)?
    pub is_trusted_directory: &'a dyn Fn(&RsaIdentity) -> bool,
    /// The address this NETINFO should report for its recipient (the
    /// peer), if known.
    pub their_apparent_addr: Option<std::net::IpAddr>,
    /// The addresses we should claim as our own in NETINFO.
    pub my_addrs: Vec<std::net::IpAddr>,
    /// Our own address as seen locally, used for canonicalization
    /// (spec §4.7: "If any peer-advertised address equals our stored
    /// `real_addr`...").
    pub real_addr: Option<std::net::IpAddr>,
}

impl<C: LinkCert> HandshakeEnv<'_, C> {
    /// Whether we should respond to an `AUTH_CHALLENGE` with
    /// `AUTHENTICATE` rather than proceeding straight to `NETINFO`.
    pub fn can_authenticate(&self) -> bool {
        self.can_authenticate
    }
}

/// Everything that changed, and everything to send, as a result of
/// feeding one handshake frame to the engine.
#[derive(Default)]
pub struct HandshakeOutput {
    /// Cells the caller should encode (with `circ_id = None`) and write,
    /// in order.
    pub to_send: Vec<AnyChanMsg>,
    /// Set once the handshake has completed and the link should move to
    /// `OPEN`.
    pub became_open: bool,
    /// The peer's authenticated identity, if this call established it.
    pub peer_identity: Option<RsaIdentity>,
    /// Whether this link should be marked canonical, if this call decided
    /// that.
    pub is_canonical: Option<bool>,
    /// Detected clock skew in seconds (signed: positive means the peer's
    /// clock is ahead), if this call computed one.
    pub clock_skew_seconds: Option<i64>,
    /// Whether the clock skew (if any) should be logged at `WARN`
    /// (trusted peer) rather than `INFO`.
    pub clock_skew_warn: bool,
}

/// Feed one handshake-phase cell to the engine.
///
/// `substate` is the transport's current sub-state (spec §4.7's gating
/// table); the caller is responsible for applying any substate transition
/// this function implies (promotion to `OrHandshakingV3` on receipt of a
/// permitted pre-handshake command) and for the final transition to
/// `Open` / `Link::change_state(Open)` when `became_open` is set.
pub fn feed<C: LinkCert>(
    state: &mut HandshakeState<C>,
    substate: TransportSubState,
    env: &HandshakeEnv<'_, C>,
    msg: &AnyChanMsg,
    now: SystemTime,
) -> Result<HandshakeOutput> {
    let cmd = msg.cmd();

    match substate {
        TransportSubState::TlsHandshaking | TransportSubState::TlsServerRenegotiating => {
            if !TransportSubState::permits_before_handshake(cmd) {
                return Err(Error::HandshakeProto(format!(
                    "{cmd} not permitted before the transport handshake completes"
                )));
            }
            // Receipt of any permitted command promotes us to v3
            // handshaking; the caller applies this to its own substate.
            if !matches!(cmd, ChanCmd::VERSIONS) {
                return Ok(HandshakeOutput::default());
            }
            // fall through: a VERSIONS cell here is processed below, same
            // as in OrHandshakingV3.
        }
        TransportSubState::OrHandshakingV2 => {
            if cmd != ChanCmd::VERSIONS {
                return Err(Error::HandshakeProto(
                    "only VERSIONS is acceptable in a v2 handshake".into(),
                ));
            }
        }
        TransportSubState::OrHandshakingV3 => {}
        TransportSubState::Open => {
            return Err(Error::HandshakeProto(
                "handshake engine invoked after the link is open".into(),
            ));
        }
    }

    // Fold the received frame into the rolling digest (spec §8's "updated
    // for every received handshake frame except AUTHENTICATE"); the
    // AUTHENTICATE body itself covers the digest up to this point, so
    // hashing it in would be circular.
    if !matches!(msg, AnyChanMsg::Authenticate(_)) {
        state.digest.update_received(&frame_bytes(msg)?);
    }

    let out = match msg {
        AnyChanMsg::Versions(v) => versions::process(state, substate, env, v),
        AnyChanMsg::Certs(c) => cert_gate(state, substate)
            .and_then(|()| certs::process(state, env, c))
            .map(|()| HandshakeOutput::default()),
        AnyChanMsg::AuthChallenge(c) => auth::process_auth_challenge(state, substate, env, c),
        AnyChanMsg::Authenticate(a) => {
            auth::process_authenticate(state, substate, env, a).map(|()| HandshakeOutput::default())
        }
        AnyChanMsg::Netinfo(n) => netinfo::process(state, substate, env, n, now),
        AnyChanMsg::Padding(_) | AnyChanMsg::Vpadding(_) | AnyChanMsg::Authorize(_) => {
            Ok(HandshakeOutput::default())
        }
        other => Err(Error::HandshakeProto(format!(
            "unexpected {} cell during handshake",
            other.cmd()
        ))),
    }?;

    // Every frame this call decides to send is folded in too (no
    // AUTHENTICATE exception on the sending side: our own digest snapshot
    // was already taken before we built it).
    for sent in &out.to_send {
        state.digest.update_sent(&frame_bytes(sent)?);
    }

    Ok(out)
}

/// Re-encode a handshake message to the bytes folded into the rolling
/// digest. This crate's own accounting, not a reproduction of the real
/// protocol's bit-exact transcript (see `DESIGN.md`).
fn frame_bytes(msg: &AnyChanMsg) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    msg.clone().encode_onto(&mut buf).map_err(|_| {
        Error::HandshakeProto("failed to encode a handshake frame for the rolling digest".into())
    })?;
    Ok(buf)
}

/// Shared gating for `CERTS` that doesn't depend on the payload (spec
/// §4.7: v3 only, `link_proto >= 3`, only once, not yet authenticated).
fn cert_gate<C: LinkCert>(state: &HandshakeState<C>, substate: TransportSubState) -> Result<()> {
    if substate != TransportSubState::OrHandshakingV3 || state.link_proto < 3 {
        return Err(Error::HandshakeProto(
            "CERTS is only valid in an established v3 handshake".into(),
        ));
    }
    if state.received_certs_cell {
        return Err(Error::HandshakeProto("duplicate CERTS cell".into()));
    }
    if state.authenticated {
        return Err(Error::HandshakeProto("CERTS after authentication".into()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_trusted(_: &RsaIdentity) -> bool {
        false
    }

    fn bare_env(my_link_protocols: &[u16]) -> HandshakeEnv<'_, RsaDerCert> {
        HandshakeEnv {
            my_link_protocols,
            public_server_mode: false,
            can_authenticate: false,
            our_identity_cert: None,
            our_identity: None,
            our_certs_cell: None,
            peer_session_public_key: None,
            sign_authenticate: None,
            is_trusted_directory: &no_trusted,
            their_apparent_addr: None,
            my_addrs: Vec::new(),
            real_addr: None,
        }
    }

    #[test]
    fn feed_folds_a_received_versions_cell_into_the_digest() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [2u16, 3];
        let env = bare_env(&protos);
        let before = state.digest.snapshot();
        let versions = AnyChanMsg::Versions(msg::Versions::new(vec![2u16]).unwrap());
        feed(&mut state, TransportSubState::OrHandshakingV2, &env, &versions, SystemTime::now()).unwrap();
        assert_ne!(before, state.digest.snapshot());
    }

    #[test]
    fn feed_folds_its_own_reply_into_the_sent_digest() {
        // A v2 VERSIONS negotiation replies with NETINFO; both the received
        // VERSIONS and the sent NETINFO should be folded in, so the digest
        // after feed() differs from a digest that only saw the received
        // frame.
        let mut state_a = HandshakeState::<RsaDerCert>::new(false);
        let mut state_b = HandshakeState::<RsaDerCert>::new(false);
        let protos = [2u16, 3];
        let env = bare_env(&protos);
        let versions = AnyChanMsg::Versions(msg::Versions::new(vec![2u16]).unwrap());

        feed(&mut state_a, TransportSubState::OrHandshakingV2, &env, &versions, SystemTime::now()).unwrap();
        state_b.digest.update_received(&frame_bytes(&versions).unwrap());

        assert_ne!(state_a.digest.snapshot(), state_b.digest.snapshot());
    }

    #[test]
    fn feed_rejects_frames_once_the_link_is_open() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [2u16];
        let env = bare_env(&protos);
        let versions = AnyChanMsg::Versions(msg::Versions::new(vec![2u16]).unwrap());
        let err = feed(&mut state, TransportSubState::Open, &env, &versions, SystemTime::now());
        assert!(err.is_err());
    }
}
