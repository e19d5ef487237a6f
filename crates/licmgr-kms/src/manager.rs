//! Fluent manager for remote key lifecycle operations.
//!
//! Mirrors the issuance side's error discipline: the first remote failure
//! latches, subsequent operations are no-ops until `clear_error()`, and
//! terminal operations return empty values while latched.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use licmgr_core::{KeyType, LicenseError, SigningAlgorithm};

use crate::api::{
    with_cancellation, KeyOrigin, KeySpec, KeyUsage, KmsApi, MessageType, RemoteSigningAlgorithm,
};
use crate::signer::to_url_safe;

/// Shortest deletion window the service accepts, in days.
const MIN_PENDING_DAYS: i32 = 7;
/// Longest deletion window the service accepts, in days.
const MAX_PENDING_DAYS: i32 = 30;

const KEY_DESCRIPTION: &str = "Used for licensing purposes";

/// Key lifecycle operations against the remote service.
pub struct KmsManager {
    api: Arc<dyn KmsApi>,
    cancel: CancellationToken,
    last_error: Option<LicenseError>,
}

impl KmsManager {
    /// Manager running remote calls under the ambient context `cancel`.
    pub fn new(api: Arc<dyn KmsApi>, cancel: CancellationToken) -> Self {
        Self {
            api,
            cancel,
            last_error: None,
        }
    }

    /// Last latched error, if any.
    pub fn error(&self) -> Option<&LicenseError> {
        self.last_error.as_ref()
    }

    /// Clear the latched error, chainable.
    pub fn clear_error(&mut self) -> &mut Self {
        self.last_error = None;
        self
    }

    fn latch(&mut self, error: LicenseError) {
        warn!(category = error.category(), %error, "key service manager latched error");
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
    }

    /// Create a signing key; returns its remote reference, or the empty
    /// string on failure (latched).
    pub async fn create_key(
        &mut self,
        key_type: KeyType,
        bits: usize,
        tags: &BTreeMap<String, String>,
        policy: Option<&str>,
    ) -> String {
        if self.last_error.is_some() {
            return String::new();
        }

        let spec = KeySpec { key_type, bits };
        let result = with_cancellation(
            &self.cancel,
            "create_key",
            self.api.create_key(
                &self.cancel,
                spec,
                KeyOrigin::Service,
                KeyUsage::SignVerify,
                KEY_DESCRIPTION,
                tags,
                policy,
            ),
        )
        .await;

        match result {
            Ok(key_ref) => {
                info!(%spec, key_ref = %key_ref, "created remote signing key");
                key_ref
            }
            Err(error) => {
                self.latch(error);
                String::new()
            }
        }
    }

    /// Sign `message` remotely and return the URL-safe token segment, or
    /// the empty string on failure (latched).
    pub async fn sign(
        &mut self,
        key_ref: &str,
        algorithm: SigningAlgorithm,
        message: &[u8],
    ) -> String {
        if self.last_error.is_some() {
            return String::new();
        }

        let result = with_cancellation(
            &self.cancel,
            "sign",
            self.api.sign(
                &self.cancel,
                key_ref,
                message,
                RemoteSigningAlgorithm::from(algorithm),
                MessageType::Raw,
            ),
        )
        .await;

        match result {
            Ok(signature) => to_url_safe(&signature),
            Err(error) => {
                self.latch(error);
                String::new()
            }
        }
    }

    /// Verify a signature inside the service. False on failure (latched).
    pub async fn verify(
        &mut self,
        key_ref: &str,
        algorithm: SigningAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> bool {
        if self.last_error.is_some() {
            return false;
        }

        let result = with_cancellation(
            &self.cancel,
            "verify",
            self.api.verify(
                &self.cancel,
                key_ref,
                message,
                signature,
                RemoteSigningAlgorithm::from(algorithm),
                MessageType::Raw,
            ),
        )
        .await;

        match result {
            Ok(valid) => valid,
            Err(error) => {
                self.latch(error);
                false
            }
        }
    }

    /// Fetch the public key PEM bytes. Empty on failure (latched).
    pub async fn get_public_key(&mut self, key_ref: &str) -> Vec<u8> {
        if self.last_error.is_some() {
            return Vec::new();
        }

        let result = with_cancellation(
            &self.cancel,
            "get_public_key",
            self.api.get_public_key(&self.cancel, key_ref),
        )
        .await;

        match result {
            Ok(pem) => pem,
            Err(error) => {
                self.latch(error);
                Vec::new()
            }
        }
    }

    /// Schedule deletion of a remote key, chainable. `pending_days` is
    /// clamped into the service's accepted window silently.
    pub async fn schedule_delete_key(&mut self, key_ref: &str, pending_days: i32) -> &mut Self {
        if self.last_error.is_some() {
            return self;
        }

        let pending_days = pending_days.clamp(MIN_PENDING_DAYS, MAX_PENDING_DAYS);
        let result = with_cancellation(
            &self.cancel,
            "schedule_key_deletion",
            self.api
                .schedule_key_deletion(&self.cancel, key_ref, pending_days),
        )
        .await;

        if let Err(error) = result {
            self.latch(error);
        } else {
            info!(key_ref = %key_ref, pending_days, "scheduled remote key deletion");
        }
        self
    }
}
