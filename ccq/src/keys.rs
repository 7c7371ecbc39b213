//! Loading key material from disk.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use libp2p::identity::Keypair;
use tracing::info;

use crate::{crypto::SecretKey, error::KeyError};

/// Supplies the key query requests are signed with.
pub trait KeyProvider {
    fn signing_key(&self) -> Result<SecretKey, KeyError>;
}

impl KeyProvider for SecretKey {
    fn signing_key(&self) -> Result<SecretKey, KeyError> {
        Ok(self.clone())
    }
}

/// Reads a hex encoded secp256k1 secret key from a file. Surrounding whitespace and a `0x` prefix are ignored.
#[derive(Debug, Clone)]
pub struct HexFileKeyProvider {
    path: PathBuf,
}

impl HexFileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HexFileKeyProvider { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyProvider for HexFileKeyProvider {
    fn signing_key(&self) -> Result<SecretKey, KeyError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| KeyError::Io {
            path: self.path.clone(),
            source,
        })?;
        SecretKey::from_hex(&contents)
    }
}

/// Loads the libp2p identity stored at `path`, or generates a new ed25519 identity and stores it there.
pub fn get_or_create_node_key(path: &Path) -> Result<Keypair> {
    if path.exists() {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read node key {}", path.display()))?;
        let key_pair = Keypair::from_protobuf_encoding(&bytes)
            .with_context(|| format!("failed to decode node key {}", path.display()))?;
        info!(path = %path.display(), "found existing node key");
        return Ok(key_pair);
    }

    info!(path = %path.display(), "no node key found, generating a new one");
    let key_pair = Keypair::generate_ed25519();
    let bytes = key_pair.to_protobuf_encoding()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write node key {}", path.display()))?;
    Ok(key_pair)
}
