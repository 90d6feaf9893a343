//! Processing of the `CERTS` cell itself (spec §4.7).
//!
//! The certificate *type* here is abstracted behind [`super::LinkCert`];
//! this module only knows the CERTS cell's own framing (`(cert_type,
//! body)` pairs) and the protocol rules about which types are required
//! for which role.

use tor_cell::chancell::msg;

use crate::err::Error;
use crate::Result;

use super::{identity_of, HandshakeEnv, HandshakeState, LinkCert};

/// Cert-type code for the self-signed RSA identity certificate
/// (`ID_1024`). Chosen to match this crate's own `CERTS` framing; see
/// `DESIGN.md` for why it is not required to equal the real protocol's
/// registry value.
pub const CERTTYPE_ID_1024: u8 = 2;
/// Cert-type code for the RSA1024 TLS link certificate (`TLS_LINK`),
/// sent by responders.
pub const CERTTYPE_TLS_LINK: u8 = 1;
/// Cert-type code for the RSA1024 authentication certificate
/// (`AUTH_1024`), sent by initiators.
pub const CERTTYPE_AUTH_1024: u8 = 3;

/// Handle one `CERTS` cell. Shared gating (duplicate/role/ordering
/// checks that don't need the payload) has already run in
/// [`super::cert_gate`].
pub fn process<C: LinkCert>(
    state: &mut HandshakeState<C>,
    env: &HandshakeEnv<'_, C>,
    msg: &msg::Certs,
) -> Result<()> {
    let id_body = msg
        .cert_body(CERTTYPE_ID_1024)
        .ok_or_else(|| Error::CertsInvalid("CERTS cell missing ID_1024".into()))?;
    let id_cert = C::parse(id_body)?;
    if !id_cert.is_self_signed() {
        return Err(Error::CertsInvalid("ID_1024 is not self-signed".into()));
    }
    if !id_cert.valid_at(std::time::SystemTime::now()) {
        return Err(Error::CertsInvalid("ID_1024 is expired or not yet valid".into()));
    }

    // The peer is a responder iff it sent TLS_LINK rather than AUTH_1024;
    // a well-formed peer sends exactly one of the two alongside ID_1024.
    let tls_link = msg.cert_body(CERTTYPE_TLS_LINK);
    let auth_1024 = msg.cert_body(CERTTYPE_AUTH_1024);
    match (tls_link, auth_1024) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(Error::CertsInvalid(
                "CERTS cell must carry exactly one of TLS_LINK, AUTH_1024".into(),
            ));
        }
        (Some(body), None) => {
            let link_cert = C::parse(body)?;
            if !link_cert.signed_by(id_cert.subject_rsa_key()) {
                return Err(Error::CertsInvalid("TLS_LINK not signed by ID_1024".into()));
            }
            if !link_cert.valid_at(std::time::SystemTime::now()) {
                return Err(Error::CertsInvalid("TLS_LINK is expired or not yet valid".into()));
            }
            if let Some(peer_key) = &env.peer_session_public_key {
                if link_cert.subject_rsa_key().to_rsa_identity() != peer_key.to_rsa_identity() {
                    return Err(Error::CertsInvalid(
                        "TLS_LINK subject key does not match the live session key".into(),
                    ));
                }
            }
            // Validating {ID_1024, TLS_LINK} is the initiator's entire
            // proof of the responder's identity; there is no further
            // AUTHENTICATE step on this side (spec §4.7).
            state.authenticated = true;
            state.authenticated_peer_id = Some(identity_of(&id_cert));
        }
        (None, Some(body)) => {
            let auth_cert = C::parse(body)?;
            if !auth_cert.signed_by(id_cert.subject_rsa_key()) {
                return Err(Error::CertsInvalid("AUTH_1024 not signed by ID_1024".into()));
            }
            if !auth_cert.valid_at(std::time::SystemTime::now()) {
                return Err(Error::CertsInvalid("AUTH_1024 is expired or not yet valid".into()));
            }
            state.auth_cert = Some(auth_cert);
        }
    }

    state.id_cert = Some(id_cert);
    state.received_certs_cell = true;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handshake::RsaDerCert;

    fn no_trusted(_: &tor_llcrypto::pk::rsa::RsaIdentity) -> bool {
        false
    }

    fn bare_env() -> HandshakeEnv<'static, RsaDerCert> {
        HandshakeEnv {
            my_link_protocols: &[3],
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

    // None of these cases reach real certificate parsing: they are all
    // rejected by `CERTS`'s own framing rules before `C::parse` is ever
    // called on a certificate body, so they need no real RSA key material.

    #[test]
    fn rejects_a_certs_cell_with_no_id_1024() {
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        let env = bare_env();
        let cell = msg::Certs::new_empty();
        let err = process(&mut state, &env, &cell);
        assert!(matches!(err, Err(Error::CertsInvalid(_))));
    }

    #[test]
    fn rejects_id_1024_that_fails_to_parse() {
        let mut state = HandshakeState::<RsaDerCert>::new(true);
        let env = bare_env();
        let mut cell = msg::Certs::new_empty();
        cell.push_cert_body(CERTTYPE_ID_1024, vec![0u8; 4]);
        let err = process(&mut state, &env, &cell);
        assert!(err.is_err());
    }
}
