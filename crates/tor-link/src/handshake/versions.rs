//! Processing of the `VERSIONS` cell (spec §4.7).

use tor_cell::chancell::msg;

use crate::err::Error;
use crate::transport::TransportSubState;
use crate::Result;

use super::{HandshakeEnv, HandshakeOutput, HandshakeState, LinkCert};

/// Build the very first message an initiator sends on a new link: its own
/// `VERSIONS` cell. The responder has nothing to send until it hears from
/// us, so this has no counterpart on that side.
pub fn initiate<C: LinkCert>(
    state: &mut HandshakeState<C>,
    env: &HandshakeEnv<'_, C>,
    now: std::time::SystemTime,
) -> Result<HandshakeOutput> {
    state.sent_versions_at = Some(now);
    let mut out = HandshakeOutput::default();
    let versions = msg::AnyChanMsg::Versions(msg::Versions::new(env.my_link_protocols.to_vec())?);
    state.digest.update_sent(&super::frame_bytes(&versions)?);
    out.to_send.push(versions);
    Ok(out)
}

/// Handle a received `VERSIONS` cell: negotiate the link protocol and
/// queue whatever reply the negotiated version calls for.
pub fn process<C: LinkCert>(
    state: &mut HandshakeState<C>,
    substate: TransportSubState,
    env: &HandshakeEnv<'_, C>,
    msg: &msg::Versions,
) -> Result<HandshakeOutput> {
    if state.link_proto != 0 || state.received_versions {
        return Err(Error::HandshakeProto("duplicate VERSIONS cell".into()));
    }
    let shared = msg
        .best_shared_link_protocol(env.my_link_protocols)
        .ok_or_else(|| Error::HandshakeProto("no link protocol in common".into()))?;
    if shared == 1 {
        return Err(Error::HandshakeProto(
            "v1 never negotiates via VERSIONS".into(),
        ));
    }
    if shared < 3 && substate == TransportSubState::OrHandshakingV3 {
        return Err(Error::HandshakeProto(
            "downgrade to link protocol < 3 after a v3 handshake began".into(),
        ));
    }
    state.link_proto = shared;
    state.received_versions = true;

    let mut out = HandshakeOutput::default();
    if shared == 2 {
        out.to_send.push(msg::AnyChanMsg::Netinfo(
            build_netinfo_reply(env),
        ));
        state.sent_netinfo = true;
        return Ok(out);
    }

    // shared >= 3: a v3 handshake. Only the responder has anything to say
    // in immediate reply to VERSIONS; the initiator waits for CERTS and
    // (if it authenticates) AUTH_CHALLENGE.
    if !state.started_here {
        let our_certs_cell = env.our_certs_cell.clone().ok_or_else(|| {
            Error::HandshakeProto("cannot respond as a v3 responder with no identity configured".into())
        })?;
        out.to_send
            .push(msg::AnyChanMsg::Versions(msg::Versions::new(
                env.my_link_protocols.to_vec(),
            )?));
        out.to_send.push(msg::AnyChanMsg::Certs(our_certs_cell));
        if env.public_server_mode {
            let nonce = super::auth::random_challenge_nonce();
            state.auth_challenge_nonce = Some(nonce);
            out.to_send.push(msg::AnyChanMsg::AuthChallenge(
                msg::AuthChallenge::new(nonce, vec![super::AUTHTYPE_RSA_SHA256_TLSSECRET]),
            ));
        }
        // Our CERTS cell implicitly authenticates us to the peer, so we can
        // send NETINFO right away instead of waiting for AUTHENTICATE.
        out.to_send
            .push(msg::AnyChanMsg::Netinfo(build_netinfo_reply(env)));
        state.sent_netinfo = true;
    }
    Ok(out)
}

/// Build the `NETINFO` cell sent after a v2 handshake negotiates (no
/// certificates are exchanged at v2, so there is nothing to await first).
fn build_netinfo_reply<C: LinkCert>(env: &HandshakeEnv<'_, C>) -> msg::Netinfo {
    if env.public_server_mode {
        msg::Netinfo::from_relay(0, env.their_apparent_addr, env.my_addrs.clone())
    } else {
        msg::Netinfo::from_client(env.their_apparent_addr)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handshake::RsaDerCert;

    fn no_trusted(_: &tor_llcrypto::pk::rsa::RsaIdentity) -> bool {
        false
    }

    fn bare_env<'a>(
        my_link_protocols: &'a [u16],
        public_server_mode: bool,
    ) -> HandshakeEnv<'a, RsaDerCert> {
        HandshakeEnv {
            my_link_protocols,
            public_server_mode,
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
    fn negotiates_the_highest_shared_version() {
        // As the initiator, we have nothing further to send in immediate
        // reply to VERSIONS in a v3 handshake (we wait for CERTS).
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        let protos = [2u16, 3, 4];
        let env = bare_env(&protos, false);
        let out = process(&mut state, TransportSubState::OrHandshakingV3, &env, &msg::Versions::new(vec![2u16, 3]).unwrap()).unwrap();
        assert_eq!(state.link_proto, 3);
        assert!(out.to_send.is_empty());
    }

    #[test]
    fn v2_responder_replies_with_netinfo_directly() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [2u16];
        let env = bare_env(&protos, false);
        let out = process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Versions::new(vec![2u16]).unwrap()).unwrap();
        assert_eq!(state.link_proto, 2);
        assert!(matches!(out.to_send.as_slice(), [msg::AnyChanMsg::Netinfo(_)]));
        assert!(state.sent_netinfo);
    }

    #[test]
    fn rejects_when_no_protocol_is_shared() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [4u16];
        let env = bare_env(&protos, false);
        let err = process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Versions::new(vec![2u16]).unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_downgrade_below_v3_after_v3_began() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [2u16, 3];
        let env = bare_env(&protos, false);
        let err = process(&mut state, TransportSubState::OrHandshakingV3, &env, &msg::Versions::new(vec![2u16]).unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_a_duplicate_versions_cell() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [2u16, 3];
        let env = bare_env(&protos, false);
        process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Versions::new(vec![2u16]).unwrap()).unwrap();
        let err = process(&mut state, TransportSubState::OrHandshakingV2, &env, &msg::Versions::new(vec![2u16]).unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn v3_responder_replies_with_versions_certs_and_netinfo() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [3u16];
        let mut env = bare_env(&protos, false);
        env.our_certs_cell = Some(msg::Certs::new_empty());
        let out = process(&mut state, TransportSubState::OrHandshakingV3, &env, &msg::Versions::new(vec![3u16]).unwrap()).unwrap();
        assert!(matches!(
            out.to_send.as_slice(),
            [
                msg::AnyChanMsg::Versions(_),
                msg::AnyChanMsg::Certs(_),
                msg::AnyChanMsg::Netinfo(_),
            ]
        ));
        assert!(state.sent_netinfo);
    }

    #[test]
    fn v3_responder_without_identity_cannot_reply() {
        let mut state = HandshakeState::<RsaDerCert>::new(false);
        let protos = [3u16];
        let env = bare_env(&protos, false);
        let err = process(&mut state, TransportSubState::OrHandshakingV3, &env, &msg::Versions::new(vec![3u16]).unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn initiate_sends_our_versions_cell() {
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        let protos = [2u16, 3, 4];
        let env = bare_env(&protos, false);
        let out = initiate(&mut state, &env, std::time::SystemTime::now()).unwrap();
        assert!(matches!(out.to_send.as_slice(), [msg::AnyChanMsg::Versions(_)]));
        assert!(state.sent_versions_at.is_some());
    }

    #[test]
    fn initiate_folds_the_sent_versions_cell_into_the_digest() {
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        let protos = [2u16, 3, 4];
        let env = bare_env(&protos, false);
        let before = state.digest.snapshot();
        initiate(&mut state, &env, std::time::SystemTime::now()).unwrap();
        assert_ne!(before, state.digest.snapshot());
    }

}
