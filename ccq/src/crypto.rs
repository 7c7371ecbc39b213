//! Digests and signatures used to authenticate queries and responses.
//!
//! Requests are signed over `keccak256(prefix || request)`, where the prefix names the environment. A signature made
//! for one environment therefore never verifies on another. Responses are signed over
//! `keccak256(prefix || keccak256(response))` with a single, environment-independent prefix.

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use alloy::primitives::Address;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::{error::KeyError, query::SIGNATURE_LENGTH};

const QUERY_REQUEST_PREFIX_MAINNET: &[u8; 35] = b"mainnet_query_request_000000000000|";
const QUERY_REQUEST_PREFIX_TESTNET: &[u8; 35] = b"testnet_query_request_000000000000|";
const QUERY_REQUEST_PREFIX_DEVNET: &[u8; 35] = b"devnet_query_request_0000000000000|";
const QUERY_RESPONSE_PREFIX: &[u8; 35] = b"query_response_0000000000000000000|";

/// The network a request is destined for. Mixed into the request digest to prevent cross-network replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    MainNet,
    TestNet,
    DevNet,
}

impl Environment {
    fn query_request_prefix(&self) -> &'static [u8] {
        match self {
            Environment::MainNet => QUERY_REQUEST_PREFIX_MAINNET,
            Environment::TestNet => QUERY_REQUEST_PREFIX_TESTNET,
            Environment::DevNet => QUERY_REQUEST_PREFIX_DEVNET,
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Environment::MainNet),
            "testnet" => Ok(Environment::TestNet),
            "devnet" => Ok(Environment::DevNet),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn compute<T: AsRef<[S]>, S: AsRef<[u8]>>(preimages: T) -> Hash {
        let mut hasher = Keccak256::new();
        for preimage in preimages.as_ref() {
            hasher.update(preimage.as_ref());
        }
        Self(hasher.finalize().into())
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// The digest a requester signs. Pure: it depends only on `env` and `request`.
pub fn query_request_digest(env: Environment, request: &[u8]) -> Hash {
    Hash::compute([env.query_request_prefix(), request])
}

/// The digest a responder signs over an encoded [crate::query::QueryResponsePublication].
pub fn query_response_digest(response: &[u8]) -> Hash {
    let inner = Hash::compute([response]);
    Hash::compute([QUERY_RESPONSE_PREFIX.as_slice(), inner.as_bytes()])
}

/// A secp256k1 key used to sign query requests.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    /// Generates a random key.
    pub fn new() -> SecretKey {
        SecretKey(SigningKey::random(&mut rand::rngs::OsRng))
    }

    pub fn new_from_rng<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> SecretKey {
        SecretKey(SigningKey::random(rng))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SecretKey, KeyError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;

        if bytes == [0; 32] {
            return Err(KeyError::Zero);
        }

        SigningKey::from_bytes(&bytes.into())
            .map(SecretKey)
            .map_err(|_| KeyError::OutOfRange)
    }

    pub fn from_hex(s: &str) -> Result<SecretKey, KeyError> {
        let s = s.trim();
        let bytes_vec = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        Self::from_bytes(&bytes_vec)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// The Ethereum-style address of this key. This is what responders allow-list.
    pub fn address(&self) -> Address {
        address_of(self.0.verifying_key())
    }

    /// Produces a 65-byte recoverable signature `r || s || v` over a prehashed digest, with `v` in `{0, 1}`.
    pub fn sign(&self, digest: &Hash) -> Result<[u8; SIGNATURE_LENGTH], KeyError> {
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(KeyError::Signing)?;
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&self.address()).finish()
    }
}

/// Recovers the address that produced a 65-byte recoverable signature over `digest`.
pub fn recover_signer(digest: &Hash, signature: &[u8]) -> Result<Address, KeyError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(KeyError::InvalidSignature(format!(
            "length {}",
            signature.len()
        )));
    }
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
    // Accept both the raw `{0, 1}` and Ethereum's legacy `{27, 28}` encodings of `v`.
    let v = match signature[64] {
        v @ 0..=1 => v,
        v @ 27..=28 => v - 27,
        v => return Err(KeyError::InvalidSignature(format!("recovery id {v}"))),
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| KeyError::InvalidSignature(format!("recovery id {v}")))?;
    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recovery_id)
        .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
    Ok(address_of(&key))
}

fn address_of(key: &VerifyingKey) -> Address {
    // Remove the first byte before hashing - The first byte specifies the encoding tag.
    let encoded = key.to_encoded_point(false);
    Address::from_slice(&Keccak256::digest(&encoded.as_bytes()[1..])[12..32])
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn prefixes_have_equal_length() {
        for prefix in [
            QUERY_REQUEST_PREFIX_MAINNET,
            QUERY_REQUEST_PREFIX_TESTNET,
            QUERY_REQUEST_PREFIX_DEVNET,
            QUERY_RESPONSE_PREFIX,
        ] {
            assert_eq!(prefix.len(), 35);
            assert_eq!(prefix[34], b'|');
        }
    }

    #[test]
    fn request_digest_is_pure() {
        let request = b"some request bytes";
        assert_eq!(
            query_request_digest(Environment::MainNet, request),
            query_request_digest(Environment::MainNet, request)
        );
    }

    #[test]
    fn request_digest_depends_on_environment() {
        let request = b"some request bytes";
        let main = query_request_digest(Environment::MainNet, request);
        let test = query_request_digest(Environment::TestNet, request);
        let dev = query_request_digest(Environment::DevNet, request);
        assert_ne!(main, test);
        assert_ne!(main, dev);
        assert_ne!(test, dev);
    }

    #[test]
    fn request_digest_matches_manual_keccak() {
        let expected: [u8; 32] =
            Keccak256::digest(b"mainnet_query_request_000000000000|abc").into();
        assert_eq!(query_request_digest(Environment::MainNet, b"abc").0, expected);
    }

    #[test]
    fn sign_and_recover() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let key = SecretKey::new_from_rng(&mut rng);
        let digest = query_request_digest(Environment::DevNet, b"request");

        let signature = key.sign(&digest).unwrap();
        assert!(signature[64] <= 1);
        assert_eq!(recover_signer(&digest, &signature).unwrap(), key.address());

        // Signing is deterministic (RFC 6979).
        assert_eq!(signature, key.sign(&digest).unwrap());

        let mut legacy = signature;
        legacy[64] += 27;
        assert_eq!(recover_signer(&digest, &legacy).unwrap(), key.address());

        let other = query_request_digest(Environment::MainNet, b"request");
        assert_ne!(recover_signer(&other, &signature).ok(), Some(key.address()));
    }

    #[test]
    fn known_address() {
        // The well-known first development account.
        let key = SecretKey::from_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            key.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(matches!(
            SecretKey::from_bytes(&[1; 31]),
            Err(KeyError::InvalidLength(31))
        ));
        assert!(matches!(SecretKey::from_bytes(&[0; 32]), Err(KeyError::Zero)));
        assert!(matches!(
            SecretKey::from_bytes(&[0xff; 32]),
            Err(KeyError::OutOfRange)
        ));
        assert!(matches!(SecretKey::from_hex("zz"), Err(KeyError::Hex(_))));
    }

    #[test]
    fn environment_from_str() {
        assert_eq!(
            "MainNet".parse::<Environment>().unwrap(),
            Environment::MainNet
        );
        assert_eq!(
            "devnet".parse::<Environment>().unwrap(),
            Environment::DevNet
        );
        assert!("localnet".parse::<Environment>().is_err());
    }
}
