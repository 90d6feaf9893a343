//! Processing of `NETINFO` (spec §4.7, §6 "clock skew" and
//! "canonicalization").

use std::time::{SystemTime, UNIX_EPOCH};

use tor_cell::chancell::msg;

use crate::err::Error;
use crate::transport::TransportSubState;
use crate::Result;

use super::{HandshakeEnv, HandshakeOutput, HandshakeState, LinkCert, VERSIONS_FRESHNESS_WINDOW_SECS};

/// Handle a received `NETINFO` cell.
pub fn process<C: LinkCert>(
    state: &mut HandshakeState<C>,
    substate: TransportSubState,
    env: &HandshakeEnv<'_, C>,
    msg: &msg::Netinfo,
    now: SystemTime,
) -> Result<HandshakeOutput> {
    if substate != TransportSubState::OrHandshakingV3 && substate != TransportSubState::OrHandshakingV2 {
        return Err(Error::HandshakeProto(
            "NETINFO is only valid once a handshake is underway".into(),
        ));
    }
    if !state.received_versions {
        return Err(Error::HandshakeProto("NETINFO before VERSIONS".into()));
    }
    if substate == TransportSubState::OrHandshakingV3 && state.started_here && !state.authenticated {
        return Err(Error::HandshakeProto(
            "initiator received NETINFO without having authenticated the responder".into(),
        ));
    }
    if state.received_netinfo {
        return Err(Error::HandshakeProto("duplicate NETINFO".into()));
    }
    state.received_netinfo = true;

    let mut out = HandshakeOutput::default();

    if let Some(skew) = compute_skew(state, env, msg, now) {
        out.clock_skew_seconds = Some(skew);
        let peer_is_trusted = state
            .authenticated_peer_id
            .as_ref()
            .is_some_and(|id| (env.is_trusted_directory)(id));
        out.clock_skew_warn =
            peer_is_trusted || skew.unsigned_abs() > super::SKEW_WARN_THRESHOLD_SECS as u64;
    }

    if let (Some(their_claim), Some(real)) = (msg.their_addr(), env.real_addr) {
        if their_claim == real {
            out.is_canonical = Some(true);
        }
    }

    if !state.sent_netinfo {
        let reply = msg::Netinfo::from_relay(
            now.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0),
            env.their_apparent_addr,
            env.my_addrs.clone(),
        );
        out.to_send.push(msg::AnyChanMsg::Netinfo(reply));
        state.sent_netinfo = true;
    }

    out.peer_identity = state.authenticated_peer_id;
    out.became_open = state.sent_netinfo;
    Ok(out)
}

/// Compute the peer's clock skew from their `NETINFO` timestamp, if the
/// preconditions for a meaningful measurement hold (spec §6).
fn compute_skew<C: LinkCert>(
    state: &HandshakeState<C>,
    _env: &HandshakeEnv<'_, C>,
    msg: &msg::Netinfo,
    now: SystemTime,
) -> Option<i64> {
    let their_ts = msg.timestamp_raw();
    if their_ts == 0 {
        return None;
    }
    let sent_at = state.sent_versions_at?;
    let age = now.duration_since(sent_at).ok()?;
    if age.as_secs() > VERSIONS_FRESHNESS_WINDOW_SECS {
        return None;
    }
    let now_secs = now.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
    Some(i64::from(their_ts) - now_secs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handshake::RsaDerCert;

    fn no_trusted(_: &tor_llcrypto::pk::rsa::RsaIdentity) -> bool {
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

    fn v2_negotiated_state(started_here: bool) -> HandshakeState<RsaDerCert> {
        let mut state = HandshakeState::new(started_here);
        state.link_proto = 2;
        state.received_versions = true;
        state
    }

    #[test]
    fn rejects_netinfo_before_versions() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let env = bare_env(&[2]);
        let now = SystemTime::now();
        let err = process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Netinfo::from_client(None), now);
        assert!(err.is_err());
    }

    #[test]
    fn v2_netinfo_completes_the_handshake() {
        let mut state = v2_negotiated_state(false);
        let env = bare_env(&[2]);
        let now = SystemTime::now();
        let out = process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Netinfo::from_client(None), now).unwrap();
        assert!(out.became_open);
        assert!(matches!(out.to_send.as_slice(), [msg::AnyChanMsg::Netinfo(_)]));
    }

    #[test]
    fn rejects_a_duplicate_netinfo() {
        let mut state = v2_negotiated_state(false);
        let env = bare_env(&[2]);
        let now = SystemTime::now();
        process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Netinfo::from_client(None), now).unwrap();
        let err = process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Netinfo::from_client(None), now);
        assert!(err.is_err());
    }

    #[test]
    fn v3_initiator_must_authenticate_before_netinfo() {
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        state.link_proto = 3;
        state.received_versions = true;
        let env = bare_env(&[3]);
        let now = SystemTime::now();
        let err = process(&mut state, TransportSubState::OrHandshakingV3, &env, &msg::Netinfo::from_client(None), now);
        assert!(err.is_err());
    }

    #[test]
    fn skew_is_none_without_a_fresh_versions_timestamp() {
        let state = HandshakeState::<RsaDerCert>::new(true);
        let env = bare_env(&[2]);
        let now = SystemTime::now();
        let msg = msg::Netinfo::from_relay(
            now.duration_since(UNIX_EPOCH).unwrap().as_secs() as u32,
            None,
            Vec::new(),
        );
        // `sent_versions_at` was never set, so no skew measurement is
        // attempted.
        assert!(compute_skew(&state, &env, &msg, now).is_none());
    }

    #[test]
    fn skew_reflects_the_difference_from_our_clock() {
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        let now = SystemTime::now();
        state.sent_versions_at = Some(now);
        let env = bare_env(&[2]);
        let their_ts = now.duration_since(UNIX_EPOCH).unwrap().as_secs() as u32 + 100;
        let msg = msg::Netinfo::from_relay(their_ts, None, Vec::new());
        let skew = compute_skew(&state, &env, &msg, now).unwrap();
        assert!((95..=105).contains(&skew));
    }
}
