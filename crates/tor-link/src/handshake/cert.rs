//! Certificate validation for the `CERTS` cell (spec §4.7).
//!
//! This crate does not implement an X.509 decoder: parsing the DER blobs
//! carried in a `CERTS` cell is delegated to whatever certificate type the
//! embedder plugs in via [`LinkCert`], following the same "abstract the
//! validation behind a trait" shape `tor_checkable` already uses for
//! [`tor_checkable::SelfSigned`]/[`tor_checkable::ExternallySigned`]. What
//! lives here is the *protocol* logic: which cert types are required for
//! which role, duplicate detection, and how a validated cert's key becomes
//! the authenticated peer identity.

use std::time::SystemTime;

use tor_llcrypto::d::Sha1;
use tor_llcrypto::pk::rsa::{PublicKey, RsaIdentity};

use digest::Digest;

use crate::err::Error;

/// A certificate as carried in one `(cert_type, cert_len, cert_bytes)`
/// entry of a `CERTS` cell, once decoded.
pub trait LinkCert: Sized {
    /// Decode a certificate from its DER (or DER-like) wire bytes.
    fn parse(der: &[u8]) -> Result<Self, Error>;

    /// The RSA public key this certificate attests to (the "subject").
    fn subject_rsa_key(&self) -> &PublicKey;

    /// Return true if this certificate is self-signed (its own subject
    /// key signs it) -- expected for the `ID_1024` certificate.
    fn is_self_signed(&self) -> bool;

    /// Return true if this certificate's signature verifies under
    /// `signer`'s key -- used to check that the `TLS_LINK`/`AUTH_1024`
    /// certs were issued by the peer's `ID_1024` key.
    fn signed_by(&self, signer: &PublicKey) -> bool;

    /// Return true if `when` falls within this certificate's validity
    /// window.
    fn valid_at(&self, when: SystemTime) -> bool;
}

/// A minimal concrete [`LinkCert`] good enough for the RSA-1024 link
/// certificates this crate's handshake engine validates.
///
/// The wire format consumed by [`RsaDerCert::parse`] is a thin framing
/// around the subject key's DER bytes, a validity window, and an optional
/// issuer signature: `[4:not_before_unix][4:not_after_unix]
/// [2:subject_key_der_len][subject_key_der][2:sig_len][sig]`. A real
/// deployment would swap this for a full X.509 parser; the validation
/// *logic* in [`super::certs`] does not depend on which parser produced
/// the `LinkCert`.
#[derive(Clone, Debug)]
pub struct RsaDerCert {
    /// The certificate's claimed subject key.
    subject_key: PublicKey,
    /// Validity window, inclusive.
    not_before: SystemTime,
    not_after: SystemTime,
    /// Signature over the subject key's DER bytes, empty if self-signed
    /// and the subject key's own signature is embedded instead.
    signature: Vec<u8>,
    /// True if this certificate asserts it is self-signed.
    self_signed: bool,
}

impl RsaDerCert {
    /// Construct a self-signed certificate for `key`, valid over
    /// `[not_before, not_after]`, signing `signature` over its own key
    /// bytes.
    pub fn new_self_signed(
        key: PublicKey,
        not_before: SystemTime,
        not_after: SystemTime,
        signature: Vec<u8>,
    ) -> Self {
        RsaDerCert {
            subject_key: key,
            not_before,
            not_after,
            signature,
            self_signed: true,
        }
    }

    /// Construct a certificate for `key`, externally signed (by some
    /// other key, checked later via [`LinkCert::signed_by`]).
    pub fn new_signed(
        key: PublicKey,
        not_before: SystemTime,
        not_after: SystemTime,
        signature: Vec<u8>,
    ) -> Self {
        RsaDerCert {
            subject_key: key,
            not_before,
            not_after,
            signature,
            self_signed: false,
        }
    }
}

impl LinkCert for RsaDerCert {
    fn parse(der: &[u8]) -> Result<Self, Error> {
        // See the struct-level docs for the (intentionally simple) wire
        // format; a real implementation would hand `der` to an X.509
        // decoder instead.
        let mut r = tor_bytes::Reader::from_slice(der);
        let not_before = r
            .take_u32()
            .map_err(|e| Error::CertsInvalid(format!("truncated cert: {e}")))?;
        let not_after = r
            .take_u32()
            .map_err(|e| Error::CertsInvalid(format!("truncated cert: {e}")))?;
        let key_len = r
            .take_u16()
            .map_err(|e| Error::CertsInvalid(format!("truncated cert: {e}")))? as usize;
        let key_der = r
            .take(key_len)
            .map_err(|e| Error::CertsInvalid(format!("truncated cert key: {e}")))?;
        let subject_key = PublicKey::from_der(key_der)
            .ok_or_else(|| Error::CertsInvalid("bad subject key DER".into()))?;
        let sig_len = r
            .take_u16()
            .map_err(|e| Error::CertsInvalid(format!("truncated cert: {e}")))? as usize;
        let signature = r
            .take(sig_len)
            .map_err(|e| Error::CertsInvalid(format!("truncated cert signature: {e}")))?
            .to_vec();
        Ok(RsaDerCert {
            subject_key,
            not_before: std::time::UNIX_EPOCH + std::time::Duration::from_secs(not_before.into()),
            not_after: std::time::UNIX_EPOCH + std::time::Duration::from_secs(not_after.into()),
            signature,
            self_signed: false,
        })
    }

    fn subject_rsa_key(&self) -> &PublicKey {
        &self.subject_key
    }

    fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    fn signed_by(&self, signer: &PublicKey) -> bool {
        let digest = Sha1::digest(self.subject_key.to_der());
        signer.verify(&digest, &self.signature).is_ok()
    }

    fn valid_at(&self, when: SystemTime) -> bool {
        when >= self.not_before && when <= self.not_after
    }
}

/// Compute the SHA-1 identity digest of a certificate's subject key (spec
/// §3 `peer_identity_digest`, §4.7 "compute the SHA-1 of the ID cert's
/// key as the authenticated peer identity").
pub fn identity_of(cert: &impl LinkCert) -> RsaIdentity {
    cert.subject_rsa_key().to_rsa_identity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_truncated_cert() {
        // Not even enough bytes for the two validity-window fields.
        let err = RsaDerCert::parse(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::CertsInvalid(_)));
    }

    #[test]
    fn parse_rejects_bad_subject_key_der() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes()); // not_before
        body.extend_from_slice(&1u32.to_be_bytes()); // not_after
        body.extend_from_slice(&3u16.to_be_bytes()); // key_len
        body.extend_from_slice(b"bad"); // garbage key DER
        body.extend_from_slice(&0u16.to_be_bytes()); // sig_len
        let err = RsaDerCert::parse(&body).unwrap_err();
        assert!(matches!(err, Error::CertsInvalid(_)));
    }
}
