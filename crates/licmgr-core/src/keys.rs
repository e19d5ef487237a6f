//! Key material contracts shared by the local RSA and remote KMS stores.
//!
//! [`KeyPair`] is the capability set every key store implements: opaque key
//! identifiers (a filesystem path, URL or remote ARN), the key type and the
//! modulus length. [`LicenseSigner`] is the signing capability the JWT layer
//! delegates to; the local implementation signs in-process while the remote
//! one round-trips to a key management service that never releases private
//! key bytes.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LicenseResult;

/// Asymmetric key family. The set is closed; it mirrors what the remote key
/// service can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    /// RSA keys (2048 bits or longer).
    #[serde(rename = "RSA")]
    Rsa,
    /// NIST-curve elliptic keys (P-256/P-384/P-521).
    #[serde(rename = "ECC_NIST")]
    EccNist,
    /// SECG elliptic keys (secp256k1).
    #[serde(rename = "ECC_SECG")]
    EccSecg,
}

impl KeyType {
    /// Wire name of the key family.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::EccNist => "ECC_NIST",
            KeyType::EccSecg => "ECC_SECG",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// JOSE signature algorithms accepted for license tokens.
///
/// RS* is RSASSA PKCS#1 v1.5, PS* is RSASSA-PSS, ES* is ECDSA. The local
/// signer covers the RSA families; ES* tokens are produced through the
/// remote signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum SigningAlgorithm {
    /// RSASSA PKCS#1 v1.5 with SHA-256.
    RS256,
    /// RSASSA PKCS#1 v1.5 with SHA-384.
    RS384,
    /// RSASSA PKCS#1 v1.5 with SHA-512.
    RS512,
    /// RSASSA-PSS with SHA-256.
    PS256,
    /// RSASSA-PSS with SHA-384.
    PS384,
    /// RSASSA-PSS with SHA-512.
    PS512,
    /// ECDSA over P-256 with SHA-256.
    ES256,
    /// ECDSA over P-384 with SHA-384.
    ES384,
    /// ECDSA over P-521 with SHA-512.
    ES512,
}

impl SigningAlgorithm {
    /// Algorithm name as registered in the JOSE registry (the JWT `alg`
    /// header value).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        }
    }

    /// SHA digest width in bits.
    pub fn sha_bits(self) -> u32 {
        match self {
            Self::RS256 | Self::PS256 | Self::ES256 => 256,
            Self::RS384 | Self::PS384 | Self::ES384 => 384,
            Self::RS512 | Self::PS512 | Self::ES512 => 512,
        }
    }

    /// True for the RSA families (both paddings).
    pub fn is_rsa(self) -> bool {
        matches!(
            self,
            Self::RS256 | Self::RS384 | Self::RS512 | Self::PS256 | Self::PS384 | Self::PS512
        )
    }

    /// True for RSASSA-PSS padding.
    pub fn uses_pss(self) -> bool {
        matches!(self, Self::PS256 | Self::PS384 | Self::PS512)
    }

    /// Parse a JOSE algorithm name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "RS512" => Some(Self::RS512),
            "PS256" => Some(Self::PS256),
            "PS384" => Some(Self::PS384),
            "PS512" => Some(Self::PS512),
            "ES256" => Some(Self::ES256),
            "ES384" => Some(Self::ES384),
            "ES512" => Some(Self::ES512),
            _ => None,
        }
    }
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        Self::RS256
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A pair of asymmetric keys. One side may be absent, in which case its
/// identifier is the empty string; at least one identifier is always
/// populated.
pub trait KeyPair: Send + Sync {
    /// Identity of the public key: a filesystem path, URL or remote ARN.
    fn public_key_id(&self) -> &str;

    /// Identity of the private key. Empty for verification-only pairs.
    fn private_key_id(&self) -> &str;

    /// Key family of the pair.
    fn key_type(&self) -> KeyType;

    /// Modulus / curve length in bits.
    fn key_length(&self) -> usize;
}

/// Something that can sign the canonical JWT signing input.
///
/// Implementations return the unpadded base64url signature segment that is
/// appended to `header.payload`. The remote implementation suspends on the
/// network; callers must treat `sign` as a suspension point.
#[async_trait]
pub trait LicenseSigner: Send + Sync {
    /// Algorithm this signer produces signatures for.
    fn algorithm(&self) -> SigningAlgorithm;

    /// Sign `message` (the bytes of `header_b64.payload_b64`) and return
    /// the URL-safe, unpadded base64 signature segment.
    async fn sign(&self, message: &[u8]) -> LicenseResult<String>;
}
