//! Encryption key material carried in the superblock (§3.1). The
//! filesystem's random master key is wrapped with a key derived from the
//! user's passphrase via `scrypt` (the same KDF bcachefs itself uses for
//! `set-passphrase`/`unlock`) and `chacha20poly1305` as the AEAD, so a
//! stolen device image alone never reveals the master key.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use cowfs_types::{Error, Result};
use scrypt::Params as ScryptParams;

pub const MASTER_KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
    pub salt: [u8; 16],
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
            salt: [0; 16],
        }
    }
}

/// The encrypted key material stored in the superblock's crypt section:
/// nonce + ciphertext (which includes the Poly1305 tag) wrapping the
/// 32-byte master key.
#[derive(Debug, Clone)]
pub struct EncryptionKeyMaterial {
    pub kdf: KdfParams,
    pub nonce: [u8; 12],
    pub wrapped_key: Vec<u8>,
}

fn derive_wrapping_key(passphrase: &str, kdf: &KdfParams) -> Result<[u8; 32]> {
    let params = ScryptParams::new(kdf.log_n, kdf.r, kdf.p, 32)
        .map_err(|_| Error::InvalidArgument("bad scrypt parameters"))?;
    let mut out = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), &kdf.salt, &params, &mut out)
        .map_err(|_| Error::InvalidArgument("scrypt derivation failed"))?;
    Ok(out)
}

impl EncryptionKeyMaterial {
    /// `set-passphrase`: wraps a freshly generated master key.
    pub fn seal(passphrase: &str, master_key: &[u8; MASTER_KEY_LEN]) -> Result<Self> {
        let mut salt = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
        let kdf = KdfParams { salt, ..Default::default() };
        let wrapping_key = derive_wrapping_key(passphrase, &kdf)?;

        let mut nonce = [0u8; 12];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&wrapping_key));
        let wrapped_key = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: master_key, aad: b"cowfs-key" })
            .map_err(|_| Error::InvalidArgument("key wrap failed"))?;

        Ok(Self { kdf, nonce, wrapped_key })
    }

    /// `unlock`: recovers the master key given the passphrase.
    pub fn unlock(&self, passphrase: &str) -> Result<[u8; MASTER_KEY_LEN]> {
        let wrapping_key = derive_wrapping_key(passphrase, &self.kdf)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&wrapping_key));
        let plain = cipher
            .decrypt(
                Nonce::from_slice(&self.nonce),
                Payload { msg: &self.wrapped_key, aad: b"cowfs-key" },
            )
            .map_err(|_| Error::InvalidArgument("wrong passphrase"))?;
        plain
            .try_into()
            .map_err(|_| Error::InvalidArgument("corrupt key material"))
    }

    /// `remove-passphrase`: re-seals with an empty passphrase so future
    /// mounts need no prompt. Kept distinct from a `None` variant so the
    /// on-disk format stays uniform.
    pub fn remove_passphrase(master_key: &[u8; MASTER_KEY_LEN]) -> Result<Self> {
        Self::seal("", master_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_unlock_round_trips() {
        let master_key = [0x42u8; MASTER_KEY_LEN];
        let sealed = EncryptionKeyMaterial::seal("hunter2", &master_key).unwrap();
        let recovered = sealed.unlock("hunter2").unwrap();
        assert_eq!(recovered, master_key);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let master_key = [0x42u8; MASTER_KEY_LEN];
        let sealed = EncryptionKeyMaterial::seal("hunter2", &master_key).unwrap();
        assert!(sealed.unlock("wrong").is_err());
    }
}
