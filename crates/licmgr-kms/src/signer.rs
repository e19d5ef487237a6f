//! Remote signer over a [`KmsKeyStore`].
//!
//! The service response carries the signature as standard base64 text; the
//! token needs the URL-safe unpadded form. The conversion is a plain
//! character substitution: `+` to `-`, `/` to `_`, `=` stripped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use licmgr_core::{LicenseResult, LicenseSigner, SigningAlgorithm};

use crate::keystore::KmsKeyStore;

/// Signs license tokens through the remote key service.
#[derive(Debug, Clone)]
pub struct KmsSigner {
    store: Arc<KmsKeyStore>,
    algorithm: SigningAlgorithm,
}

impl KmsSigner {
    /// Signer over `store` with the given algorithm.
    pub fn new(store: Arc<KmsKeyStore>, algorithm: SigningAlgorithm) -> Self {
        Self { store, algorithm }
    }

    /// Signer with the default algorithm (RS256).
    pub fn with_default_algorithm(store: Arc<KmsKeyStore>) -> Self {
        Self::new(store, SigningAlgorithm::default())
    }
}

#[async_trait]
impl LicenseSigner for KmsSigner {
    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    async fn sign(&self, message: &[u8]) -> LicenseResult<String> {
        let response = self.store.remote_sign(message, self.algorithm).await?;
        debug!(key_ref = %self.store.key_ref(), alg = %self.algorithm, "remote signature produced");
        Ok(to_url_safe(&response))
    }
}

/// Turn standard base64 text into the URL-safe unpadded alphabet.
pub fn to_url_safe(standard_b64: &str) -> String {
    standard_b64
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect()
}
