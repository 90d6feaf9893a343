//! Ambient configuration knobs for the link layer.
//!
//! This layer persists nothing (spec §6: "Persisted state: None"), but it
//! still needs a few knobs supplied by whatever embeds it, mirroring how
//! `tor-proto` takes comparable settings as constructor parameters rather
//! than reading global configuration directly.

use tor_llcrypto::pk::rsa::RsaIdentity;

/// Configuration consulted by the handshake engine and the relay-crypt
/// dispatcher.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct LinkConfig {
    /// Whether this relay operates in public-server mode.
    ///
    /// A public server sends `AUTH_CHALLENGE` to clients during the v3
    /// handshake and replies with `AUTHENTICATE` when challenged (spec
    /// §4.7).
    pub public_server_mode: bool,

    /// Identities of directories we trust enough to log clock skew from
    /// them at `WARN` instead of `INFO` (spec §4.7, §7).
    pub trusted_directories: Vec<RsaIdentity>,

    /// Number of worker threads the relay-crypt dispatcher should keep
    /// running (spec §4.8).
    pub num_relaycrypt_workers: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            public_server_mode: false,
            trusted_directories: Vec::new(),
            num_relaycrypt_workers: 0,
        }
    }
}

impl LinkConfig {
    /// Return true if `id` is one of our trusted directories.
    pub fn is_trusted_directory(&self, id: &RsaIdentity) -> bool {
        self.trusted_directories.contains(id)
    }
}
