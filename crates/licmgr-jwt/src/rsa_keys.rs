//! In-process RSA key store.
//!
//! Holds a verification key and optionally the matching signing key. A
//! store without the private half can only verify, never issue. PEM import
//! accepts PKCS#1 (`RSA PRIVATE KEY`) with a PKCS#8 (`PRIVATE KEY`)
//! fallback for the private side and PKIX (`PUBLIC KEY`) with a PKCS#1
//! fallback for the public side.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info};

use licmgr_core::{KeyPair, KeyType, LicenseError, LicenseResult, MIN_RSA_BITS};

/// RSA key pair held in process memory.
#[derive(Debug, Clone)]
pub struct RsaKeyStore {
    verify_key: RsaPublicKey,
    sign_key: Option<RsaPrivateKey>,
    public_id: String,
    private_id: String,
    bits: usize,
}

impl RsaKeyStore {
    /// Generate a fresh key pair.
    ///
    /// `bits` must be at least 2048; 2048 and 4096 are the expected sizes.
    pub fn generate(bits: usize) -> LicenseResult<Self> {
        if bits < MIN_RSA_BITS {
            return Err(LicenseError::Crypto(format!(
                "RSA key length {bits} below the {MIN_RSA_BITS}-bit minimum"
            )));
        }

        let mut rng = rand::thread_rng();
        let sign_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| LicenseError::Crypto(format!("RSA key generation failed: {e}")))?;
        let verify_key = sign_key.to_public_key();

        info!(bits, "generated RSA signing key pair");

        Ok(Self {
            verify_key,
            sign_key: Some(sign_key),
            public_id: "in-memory:public".to_string(),
            private_id: "in-memory:private".to_string(),
            bits,
        })
    }

    /// Build a store from PEM buffers.
    ///
    /// At least one side must be non-empty. When only the private side is
    /// supplied the public key is derived from it; when both are supplied
    /// they must belong together.
    pub fn from_pem(public_pem: &[u8], private_pem: &[u8]) -> LicenseResult<Self> {
        let sign_key = if private_pem.is_empty() {
            None
        } else {
            Some(parse_private_pem(private_pem)?)
        };

        let verify_key = if public_pem.is_empty() {
            match &sign_key {
                Some(key) => key.to_public_key(),
                None => {
                    return Err(LicenseError::Configuration(
                        "at least a public key must be specified".to_string(),
                    ))
                }
            }
        } else {
            let public = parse_public_pem(public_pem)?;
            if let Some(key) = &sign_key {
                if key.to_public_key() != public {
                    return Err(LicenseError::Crypto(
                        "public key does not match the supplied private key".to_string(),
                    ));
                }
            }
            public
        };

        let bits = verify_key.size() * 8;
        if bits < MIN_RSA_BITS {
            return Err(LicenseError::Crypto(format!(
                "RSA key length {bits} below the {MIN_RSA_BITS}-bit minimum"
            )));
        }

        debug!(bits, has_private = sign_key.is_some(), "loaded RSA keys from PEM");

        Ok(Self {
            public_id: if public_pem.is_empty() {
                String::new()
            } else {
                "buffer:public".to_string()
            },
            private_id: if private_pem.is_empty() {
                String::new()
            } else {
                "buffer:private".to_string()
            },
            verify_key,
            sign_key,
            bits,
        })
    }

    /// Build a store from PEM files.
    ///
    /// An empty path means that side is absent; if only the private path is
    /// given the public key is derived from it.
    pub async fn from_files(public_path: &str, private_path: &str) -> LicenseResult<Self> {
        let public_pem = if public_path.is_empty() {
            Vec::new()
        } else {
            tokio::fs::read(public_path).await?
        };
        let private_pem = if private_path.is_empty() {
            Vec::new()
        } else {
            tokio::fs::read(private_path).await?
        };

        let mut store = Self::from_pem(&public_pem, &private_pem)?;
        if !public_path.is_empty() {
            store.public_id = public_path.to_string();
        }
        if !private_path.is_empty() {
            store.private_id = private_path.to_string();
        }
        Ok(store)
    }

    /// The verification key. Always present.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.verify_key
    }

    /// The signing key, absent for verification-only stores.
    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        self.sign_key.as_ref()
    }
}

impl KeyPair for RsaKeyStore {
    fn public_key_id(&self) -> &str {
        &self.public_id
    }

    fn private_key_id(&self) -> &str {
        &self.private_id
    }

    fn key_type(&self) -> KeyType {
        KeyType::Rsa
    }

    fn key_length(&self) -> usize {
        self.bits
    }
}

fn parse_private_pem(pem: &[u8]) -> LicenseResult<RsaPrivateKey> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| LicenseError::Crypto("private key PEM is not valid UTF-8".to_string()))?;
    RsaPrivateKey::from_pkcs1_pem(text)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(text))
        .map_err(|e| LicenseError::Crypto(format!("malformed RSA private key PEM: {e}")))
}

fn parse_public_pem(pem: &[u8]) -> LicenseResult<RsaPublicKey> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| LicenseError::Crypto("public key PEM is not valid UTF-8".to_string()))?;
    RsaPublicKey::from_public_key_pem(text)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(text))
        .map_err(|e| LicenseError::Crypto(format!("malformed RSA public key PEM: {e}")))
}
