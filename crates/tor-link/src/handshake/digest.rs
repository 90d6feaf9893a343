//! The rolling handshake digest used by `AUTHENTICATE` (spec §3, §9).

use tor_llcrypto::d::Sha256;

use digest::Digest;

/// A running SHA-256 digest accumulated over the on-wire bytes of every
/// handshake frame sent and received, used when computing the
/// `AUTHENTICATE` body.
///
/// Per the design notes (§9): `AUTHENTICATE` itself is never folded into
/// the digest on receipt, because the authenticator is computed over the
/// digest *up to but not including* it.
#[derive(Clone)]
pub struct RollingDigest {
    /// The SHA-256 state so far.
    hasher: Sha256,
}

impl Default for RollingDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingDigest {
    /// Start a new, empty rolling digest.
    pub fn new() -> Self {
        RollingDigest {
            hasher: Sha256::new(),
        }
    }

    /// Fold in the on-wire bytes of a frame we received.
    pub fn update_received(&mut self, wire_bytes: &[u8]) {
        self.hasher.update(wire_bytes);
    }

    /// Fold in the on-wire bytes of a frame we sent.
    pub fn update_sent(&mut self, wire_bytes: &[u8]) {
        self.hasher.update(wire_bytes);
    }

    /// Return the digest of everything folded in so far, without
    /// consuming the running state (so more frames can still be added).
    pub fn snapshot(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_changes_as_frames_accumulate() {
        let mut d = RollingDigest::new();
        let empty = d.snapshot();
        d.update_sent(b"VERSIONS frame bytes");
        let after_one = d.snapshot();
        assert_ne!(empty, after_one);
        d.update_received(b"CERTS frame bytes");
        let after_two = d.snapshot();
        assert_ne!(after_one, after_two);
    }

    #[test]
    fn order_matters() {
        let mut a = RollingDigest::new();
        a.update_sent(b"A");
        a.update_sent(b"B");
        let mut b = RollingDigest::new();
        b.update_sent(b"B");
        b.update_sent(b"A");
        assert_ne!(a.snapshot(), b.snapshot());
    }
}
