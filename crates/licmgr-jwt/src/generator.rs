//! License generator and its fluent builder facade.
//!
//! The [`Generator`] holds issuer-level defaults and the signer. Errors
//! latch into a per-instance slot: once latched, every builder operation is
//! a no-op and terminal operations return empty values until
//! `clear_error()`. Signing failures are fail-closed - the caller gets an
//! empty token, never a half-signed one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use licmgr_core::{ClaimSet, LicenseError, LicenseSigner};

use crate::signer::{encode_payload, sign_claims, unix_now};

/// Issues license tokens from issuer-level defaults.
pub struct Generator {
    audience: String,
    issuer: String,
    license_length: Duration,
    client_id: String,
    client_secret: String,
    signer: Option<Arc<dyn LicenseSigner>>,
    last_error: Option<LicenseError>,
}

impl Generator {
    /// Generator without a signer. `create` emits the canonical payload
    /// JSON unsigned - useful for inspection and tests.
    pub fn new() -> Self {
        Self {
            audience: String::new(),
            issuer: String::new(),
            license_length: Duration::ZERO,
            client_id: String::new(),
            client_secret: String::new(),
            signer: None,
            last_error: None,
        }
    }

    /// Generator that signs with `signer`.
    pub fn with_signer(signer: Arc<dyn LicenseSigner>) -> Self {
        Self {
            signer: Some(signer),
            ..Self::new()
        }
    }

    /// Last latched error, if any.
    pub fn error(&self) -> Option<&LicenseError> {
        self.last_error.as_ref()
    }

    /// Clear the latched error so the chain becomes operational again.
    pub fn clear_error(&mut self) -> &mut Self {
        self.last_error = None;
        self
    }

    fn latched(&self) -> bool {
        self.last_error.is_some()
    }

    fn latch(&mut self, error: LicenseError) {
        warn!(category = error.category(), %error, "license generator latched error");
        if self.last_error.is_none() {
            self.last_error = Some(error);
        }
    }

    /// Set the default audience (`aud`).
    pub fn audience(&mut self, aud: impl Into<String>) -> &mut Self {
        if !self.latched() {
            self.audience = aud.into();
        }
        self
    }

    /// Set the default issuer (`iss`).
    pub fn issuer(&mut self, iss: impl Into<String>) -> &mut Self {
        if !self.latched() {
            self.issuer = iss.into();
        }
        self
    }

    /// Set the default license length: `exp = now + length`, converted to
    /// whole seconds by integer division. Verification uses the same
    /// convention.
    pub fn license_length(&mut self, length: Duration) -> &mut Self {
        if !self.latched() {
            self.license_length = length;
        }
        self
    }

    /// Set the default OAuth client id.
    pub fn client_id(&mut self, id: impl Into<String>) -> &mut Self {
        if !self.latched() {
            self.client_id = id.into();
        }
        self
    }

    /// Set the default OAuth client secret.
    pub fn client_secret(&mut self, secret: impl Into<String>) -> &mut Self {
        if !self.latched() {
            self.client_secret = secret.into();
        }
        self
    }

    /// Create a claim set pre-populated from the defaults: fresh `jti`,
    /// `iat = nbf = now`, `exp = now + license_length`.
    ///
    /// Returns an empty claim set and latches when the wall clock is
    /// unusable.
    pub fn create_claim_set(&mut self) -> ClaimSet {
        if self.latched() {
            return ClaimSet::default();
        }

        let now = unix_now();
        if now == 0 {
            self.latch(LicenseError::Configuration(
                "system clock is before the unix epoch".to_string(),
            ));
            return ClaimSet::default();
        }

        ClaimSet {
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
            exp: now + self.license_length.as_secs() as i64,
            iat: now,
            nbf: now,
            jti: Uuid::new_v4().to_string(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            ..ClaimSet::default()
        }
    }

    /// Serialize and sign `claims` into a license token.
    ///
    /// Without a configured signer the canonical payload JSON is returned
    /// unsigned. Any failure latches and yields the empty string.
    pub async fn create(&mut self, claims: &ClaimSet) -> String {
        if self.latched() {
            return String::new();
        }

        if let Err(error) = claims.validate() {
            self.latch(error);
            return String::new();
        }

        let result = match &self.signer {
            None => encode_payload(claims),
            Some(signer) => sign_claims(claims, signer.as_ref()).await,
        };

        match result {
            Ok(token) => {
                info!(jti = %claims.jti, signed = self.signer.is_some(), "issued license");
                token
            }
            Err(error) => {
                self.latch(error);
                String::new()
            }
        }
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

/// Chainable facade over [`Generator`].
///
/// Holds no state of its own; every method delegates and returns the
/// builder so defaults read as one expression.
pub struct LicenseBuilder {
    generator: Generator,
}

impl LicenseBuilder {
    /// Builder around an unsigned generator.
    pub fn new() -> Self {
        Self {
            generator: Generator::new(),
        }
    }

    /// Builder around a signing generator.
    pub fn with_signer(signer: Arc<dyn LicenseSigner>) -> Self {
        Self {
            generator: Generator::with_signer(signer),
        }
    }

    /// Last latched error, if any.
    pub fn error(&self) -> Option<&LicenseError> {
        self.generator.error()
    }

    /// Clear the latched error, chainable.
    pub fn clear_error(mut self) -> Self {
        self.generator.clear_error();
        self
    }

    /// Set the default audience, chainable.
    pub fn audience(mut self, aud: impl Into<String>) -> Self {
        self.generator.audience(aud);
        self
    }

    /// Set the default issuer, chainable.
    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.generator.issuer(iss);
        self
    }

    /// Set the default license length, chainable.
    pub fn license_length(mut self, length: Duration) -> Self {
        self.generator.license_length(length);
        self
    }

    /// Set the default OAuth client id, chainable.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.generator.client_id(id);
        self
    }

    /// Set the default OAuth client secret, chainable.
    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.generator.client_secret(secret);
        self
    }

    /// See [`Generator::create_claim_set`].
    pub fn create_claim_set(&mut self) -> ClaimSet {
        self.generator.create_claim_set()
    }

    /// See [`Generator::create`].
    pub async fn create(&mut self, claims: &ClaimSet) -> String {
        self.generator.create(claims).await
    }

    /// Unwrap the underlying generator.
    pub fn into_generator(self) -> Generator {
        self.generator
    }
}

impl Default for LicenseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
