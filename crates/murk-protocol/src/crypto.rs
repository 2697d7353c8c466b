/// The two-layer crypto envelope.
///
/// Murk seals every encoded frame with a per-session symmetric key and,
/// when the connection belongs to a community, with the community's
/// passphrase-derived group key as an additional outer layer:
///
/// ```text
/// seal: group( session( frame ) )      open: session( group( bytes ) )
/// ```
///
/// The nesting order is load-bearing. Swapping it on decode fails
/// authentication instead of producing plausible garbage, which is the
/// reason the frame checksum sits inside the seal — checksum failures
/// and crypto failures are distinguishable.
///
/// The cipher itself is an injected oracle behind the [`Cipher`] trait;
/// the default is XChaCha20-Poly1305 with a random 24-byte nonce
/// prepended to the ciphertext.
use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::error::MurkProtocolError;
use crate::types::GroupId;

/// HKDF info string for group key derivation (domain separation).
const GROUP_HKDF_INFO: &[u8] = b"murk-group-xchacha20poly1305-v1";

/// Domain prefix for relay password proofs.
const CREDENTIALS_PREFIX: &[u8] = b"murk-relay-credentials-v1";

/// Symmetric seal/open oracle keyed by a session or group secret.
///
/// `open` must fail on any authentication error — callers map that
/// failure to `SessionInvalid` and trigger a re-handshake, never a
/// silent retry with the same key.
pub trait Cipher: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, MurkProtocolError>;
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, MurkProtocolError>;
}

// ── Default oracle ─────────────────────────────────────────────────────

/// XChaCha20-Poly1305 cipher with a random 24-byte nonce per seal,
/// prepended to the ciphertext.
pub struct SymmetricCipher {
    cipher: XChaCha20Poly1305,
}

impl SymmetricCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
        }
    }

    /// Generate a fresh random session key and its cipher.
    pub fn generate() -> ([u8; 32], Self) {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        (key, Self::new(key))
    }

    /// Derive a group cipher from a shared passphrase.
    ///
    /// HKDF-SHA256 with the community id as salt, so the same
    /// passphrase yields distinct keys for distinct communities.
    pub fn from_passphrase(passphrase: &str, group: GroupId) -> Self {
        let salt = group.as_raw().to_le_bytes();
        let hkdf = Hkdf::<Sha256>::new(Some(&salt), passphrase.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(GROUP_HKDF_INFO, &mut key)
            .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
        Self::new(key)
    }
}

impl Cipher for SymmetricCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, MurkProtocolError> {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| MurkProtocolError::SessionInvalid)?;

        let mut out = Vec::with_capacity(24 + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, MurkProtocolError> {
        if ciphertext.len() < 24 {
            return Err(MurkProtocolError::SessionInvalid);
        }
        let (nonce_bytes, body) = ciphertext.split_at(24);
        let nonce = XNonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, body)
            .map_err(|_| MurkProtocolError::SessionInvalid)
    }
}

/// Identity oracle for the pre-session handshake exchange: a connection
/// that has no session yet seals with this, and the handshake message
/// carries the key material for the real session cipher.
pub struct PlainCipher;

impl Cipher for PlainCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, MurkProtocolError> {
        Ok(plaintext.to_vec())
    }

    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, MurkProtocolError> {
        Ok(ciphertext.to_vec())
    }
}

// ── The layered envelope ───────────────────────────────────────────────

/// Applies/removes the session layer and, when active, the group layer
/// in the required nesting order: session innermost, group outermost.
#[derive(Clone)]
pub struct CryptoEnvelope {
    session: Arc<dyn Cipher>,
    group: Option<Arc<dyn Cipher>>,
}

impl CryptoEnvelope {
    pub fn new(session: Arc<dyn Cipher>, group: Option<Arc<dyn Cipher>>) -> Self {
        Self { session, group }
    }

    /// Session-only envelope.
    pub fn session_only(session: Arc<dyn Cipher>) -> Self {
        Self {
            session,
            group: None,
        }
    }

    /// Pre-session envelope (identity session layer, optional group).
    pub fn plaintext(group: Option<Arc<dyn Cipher>>) -> Self {
        Self {
            session: Arc::new(PlainCipher),
            group,
        }
    }

    pub fn has_group_layer(&self) -> bool {
        self.group.is_some()
    }

    /// Same session layer with a different group layer.
    pub fn with_group(&self, group: Option<Arc<dyn Cipher>>) -> Self {
        Self {
            session: self.session.clone(),
            group,
        }
    }

    /// `seal = group?( session( body ) )`
    pub fn seal(&self, body: &[u8]) -> Result<Vec<u8>, MurkProtocolError> {
        let inner = self.session.seal(body)?;
        match &self.group {
            Some(group) => group.seal(&inner),
            None => Ok(inner),
        }
    }

    /// `open = session( group?( bytes ) )`
    pub fn open(&self, bytes: &[u8]) -> Result<Vec<u8>, MurkProtocolError> {
        let inner = match &self.group {
            Some(group) => group.open(bytes)?,
            None => bytes.to_vec(),
        };
        self.session.open(&inner)
    }
}

/// SHA-256 proof of a relay password, sent in the handshake.
pub fn password_proof(password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CREDENTIALS_PREFIX);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}
