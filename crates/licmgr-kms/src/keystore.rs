//! Remote-backed key store with a cached public key.
//!
//! The store is a [`KeyPair`] whose private identifier is the remote key
//! reference; private key bytes never enter the process. The public half is
//! fetched on demand and cached; concurrent non-forced fetches coalesce
//! into a single upstream call (single-flight).

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use licmgr_core::{KeyPair, KeyType, LicenseResult, SigningAlgorithm};

use crate::api::{with_cancellation, KmsApi, MessageType, RemoteSigningAlgorithm};

/// Key pair managed by the remote service.
pub struct KmsKeyStore {
    api: Arc<dyn KmsApi>,
    cancel: CancellationToken,
    key_ref: String,
    public_id: String,
    key_type: KeyType,
    bits: usize,
    cache: RwLock<Option<Arc<Vec<u8>>>>,
    fetch_lock: Mutex<()>,
}

impl KmsKeyStore {
    /// Store for the remote key `key_ref`.
    ///
    /// `cancel` is the ambient request context every remote call runs
    /// under. The public identifier defaults to the key reference; use
    /// [`KmsKeyStore::with_public_id`] when the public key is offloaded to
    /// a local path.
    pub fn new(
        api: Arc<dyn KmsApi>,
        cancel: CancellationToken,
        key_ref: impl Into<String>,
        key_type: KeyType,
        bits: usize,
    ) -> Self {
        let key_ref = key_ref.into();
        Self {
            api,
            cancel,
            public_id: key_ref.clone(),
            key_ref,
            key_type,
            bits,
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Override the public key identifier (e.g. a filesystem path the key
    /// has been offloaded to).
    pub fn with_public_id(mut self, id: impl Into<String>) -> Self {
        self.public_id = id.into();
        self
    }

    /// The remote key reference used for signing.
    pub fn key_ref(&self) -> &str {
        &self.key_ref
    }

    /// Fetch the public key PEM bytes.
    ///
    /// Served from the in-process cache when possible; `force` bypasses the
    /// cache and refreshes it. Concurrent non-forced fetches for this key
    /// de-duplicate to one remote call.
    pub async fn fetch_public_key(&self, force: bool) -> LicenseResult<Arc<Vec<u8>>> {
        if !force {
            if let Some(cached) = self.cache.read().await.as_ref() {
                debug!(key_ref = %self.key_ref, "public key served from cache");
                return Ok(cached.clone());
            }
        }

        let _flight = self.fetch_lock.lock().await;

        // A concurrent fetch may have landed while we waited for the lock.
        if !force {
            if let Some(cached) = self.cache.read().await.as_ref() {
                return Ok(cached.clone());
            }
        }

        let pem = with_cancellation(
            &self.cancel,
            "get_public_key",
            self.api.get_public_key(&self.cancel, &self.key_ref),
        )
        .await?;
        let pem = Arc::new(pem);
        *self.cache.write().await = Some(pem.clone());
        info!(key_ref = %self.key_ref, "fetched public key from key service");
        Ok(pem)
    }

    /// Sign `message` remotely. Returns the signature as the standard
    /// base64 text of the service response.
    pub async fn remote_sign(
        &self,
        message: &[u8],
        algorithm: SigningAlgorithm,
    ) -> LicenseResult<String> {
        with_cancellation(
            &self.cancel,
            "sign",
            self.api.sign(
                &self.cancel,
                &self.key_ref,
                message,
                RemoteSigningAlgorithm::from(algorithm),
                MessageType::Raw,
            ),
        )
        .await
    }

    /// Verify a signature inside the service, skipping any local key.
    pub async fn remote_verify(
        &self,
        message: &[u8],
        signature: &[u8],
        algorithm: SigningAlgorithm,
    ) -> LicenseResult<bool> {
        with_cancellation(
            &self.cancel,
            "verify",
            self.api.verify(
                &self.cancel,
                &self.key_ref,
                message,
                signature,
                RemoteSigningAlgorithm::from(algorithm),
                MessageType::Raw,
            ),
        )
        .await
    }
}

impl KeyPair for KmsKeyStore {
    fn public_key_id(&self) -> &str {
        &self.public_id
    }

    fn private_key_id(&self) -> &str {
        &self.key_ref
    }

    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn key_length(&self) -> usize {
        self.bits
    }
}

impl std::fmt::Debug for KmsKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsKeyStore")
            .field("key_ref", &self.key_ref)
            .field("key_type", &self.key_type)
            .field("bits", &self.bits)
            .finish()
    }
}
