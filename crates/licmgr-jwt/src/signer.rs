//! Canonical JWT serialization, local RSA signing and verification.
//!
//! A signed license is `b64url(header) "." b64url(payload) "." b64url(sig)`
//! with no padding anywhere. The header is always `{"alg":<alg>,"typ":"JWT"}`
//! in that key order; the payload is the claim set's canonical JSON. The
//! signature input handed to a [`LicenseSigner`] is the byte string
//! `header_b64 "." payload_b64`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rsa::pkcs1v15;
use rsa::pss;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use tracing::debug;

use licmgr_core::{ClaimSet, LicenseError, LicenseResult, LicenseSigner, SigningAlgorithm};

use crate::rsa_keys::RsaKeyStore;

/// JOSE header of a license token. Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoseHeader {
    /// Signature algorithm name from the JOSE registry.
    pub alg: SigningAlgorithm,
    /// Always `"JWT"`.
    pub typ: String,
}

impl JoseHeader {
    /// Header for the given algorithm.
    pub fn new(alg: SigningAlgorithm) -> Self {
        Self {
            alg,
            typ: "JWT".to_string(),
        }
    }
}

/// Canonical JSON payload for a claim set.
pub fn encode_payload(claims: &ClaimSet) -> LicenseResult<String> {
    serde_json::to_string(claims)
        .map_err(|e| LicenseError::Configuration(format!("claims serialization failed: {e}")))
}

/// Pretty-printed canonical payload, for inspection and debugging.
pub fn encode_payload_indent(claims: &ClaimSet) -> LicenseResult<String> {
    serde_json::to_string_pretty(claims)
        .map_err(|e| LicenseError::Configuration(format!("claims serialization failed: {e}")))
}

/// The `header_b64.payload_b64` signing input for a claim set.
pub fn signing_input(alg: SigningAlgorithm, claims: &ClaimSet) -> LicenseResult<String> {
    let header_json = serde_json::to_string(&JoseHeader::new(alg))
        .map_err(|e| LicenseError::Configuration(format!("header serialization failed: {e}")))?;
    let payload_json = encode_payload(claims)?;
    Ok(format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(payload_json)
    ))
}

/// Serialize and sign a claim set into a complete license token.
pub async fn sign_claims(
    claims: &ClaimSet,
    signer: &dyn LicenseSigner,
) -> LicenseResult<String> {
    let input = signing_input(signer.algorithm(), claims)?;
    let signature = signer.sign(input.as_bytes()).await?;
    debug!(alg = %signer.algorithm(), "signed license token");
    Ok(format!("{input}.{signature}"))
}

/// Local RSA signer over an in-process key store.
#[derive(Debug, Clone)]
pub struct RsaSigner {
    keys: Arc<RsaKeyStore>,
    algorithm: SigningAlgorithm,
}

impl RsaSigner {
    /// Signer using `keys` with the given RSA algorithm (RS* or PS*).
    pub fn new(keys: Arc<RsaKeyStore>, algorithm: SigningAlgorithm) -> LicenseResult<Self> {
        if !algorithm.is_rsa() {
            return Err(LicenseError::Crypto(format!(
                "local signer supports RSA algorithms only, got {algorithm}"
            )));
        }
        Ok(Self { keys, algorithm })
    }

    /// Signer with the default algorithm (RS256).
    pub fn with_default_algorithm(keys: Arc<RsaKeyStore>) -> Self {
        Self {
            keys,
            algorithm: SigningAlgorithm::default(),
        }
    }
}

#[async_trait::async_trait]
impl LicenseSigner for RsaSigner {
    fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    async fn sign(&self, message: &[u8]) -> LicenseResult<String> {
        let key = self.keys.private_key().ok_or_else(|| {
            LicenseError::Configuration("key store holds no private key; cannot sign".to_string())
        })?;
        let signature = sign_rsa(message, self.algorithm, key)?;
        Ok(URL_SAFE_NO_PAD.encode(signature))
    }
}

/// Produce raw RSA signature bytes for `message`.
fn sign_rsa(
    message: &[u8],
    algorithm: SigningAlgorithm,
    key: &RsaPrivateKey,
) -> LicenseResult<Vec<u8>> {
    let sign_err = |e: signature::Error| LicenseError::Crypto(format!("RSA signing failed: {e}"));
    let mut rng = rand::thread_rng();

    let bytes = match algorithm {
        SigningAlgorithm::RS256 => pkcs1v15::SigningKey::<Sha256>::new(key.clone())
            .try_sign(message)
            .map_err(sign_err)?
            .to_vec(),
        SigningAlgorithm::RS384 => pkcs1v15::SigningKey::<Sha384>::new(key.clone())
            .try_sign(message)
            .map_err(sign_err)?
            .to_vec(),
        SigningAlgorithm::RS512 => pkcs1v15::SigningKey::<Sha512>::new(key.clone())
            .try_sign(message)
            .map_err(sign_err)?
            .to_vec(),
        SigningAlgorithm::PS256 => pss::BlindedSigningKey::<Sha256>::new(key.clone())
            .try_sign_with_rng(&mut rng, message)
            .map_err(sign_err)?
            .to_vec(),
        SigningAlgorithm::PS384 => pss::BlindedSigningKey::<Sha384>::new(key.clone())
            .try_sign_with_rng(&mut rng, message)
            .map_err(sign_err)?
            .to_vec(),
        SigningAlgorithm::PS512 => pss::BlindedSigningKey::<Sha512>::new(key.clone())
            .try_sign_with_rng(&mut rng, message)
            .map_err(sign_err)?
            .to_vec(),
        other => {
            return Err(LicenseError::Crypto(format!(
                "unsupported local signing algorithm: {other}"
            )))
        }
    };

    Ok(bytes)
}

/// Verify raw RSA signature bytes over `message`.
pub fn verify_rsa_signature(
    message: &[u8],
    signature: &[u8],
    algorithm: SigningAlgorithm,
    key: &RsaPublicKey,
) -> LicenseResult<()> {
    let bad_sig =
        |e: signature::Error| LicenseError::Crypto(format!("signature verification failed: {e}"));
    let bad_form = |_| LicenseError::Crypto("malformed signature encoding".to_string());

    match algorithm {
        SigningAlgorithm::RS256 => {
            let sig = pkcs1v15::Signature::try_from(signature).map_err(bad_form)?;
            pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                .verify(message, &sig)
                .map_err(bad_sig)
        }
        SigningAlgorithm::RS384 => {
            let sig = pkcs1v15::Signature::try_from(signature).map_err(bad_form)?;
            pkcs1v15::VerifyingKey::<Sha384>::new(key.clone())
                .verify(message, &sig)
                .map_err(bad_sig)
        }
        SigningAlgorithm::RS512 => {
            let sig = pkcs1v15::Signature::try_from(signature).map_err(bad_form)?;
            pkcs1v15::VerifyingKey::<Sha512>::new(key.clone())
                .verify(message, &sig)
                .map_err(bad_sig)
        }
        SigningAlgorithm::PS256 => {
            let sig = pss::Signature::try_from(signature).map_err(bad_form)?;
            pss::VerifyingKey::<Sha256>::new(key.clone())
                .verify(message, &sig)
                .map_err(bad_sig)
        }
        SigningAlgorithm::PS384 => {
            let sig = pss::Signature::try_from(signature).map_err(bad_form)?;
            pss::VerifyingKey::<Sha384>::new(key.clone())
                .verify(message, &sig)
                .map_err(bad_sig)
        }
        SigningAlgorithm::PS512 => {
            let sig = pss::Signature::try_from(signature).map_err(bad_form)?;
            pss::VerifyingKey::<Sha512>::new(key.clone())
                .verify(message, &sig)
                .map_err(bad_sig)
        }
        other => Err(LicenseError::Crypto(format!(
            "unsupported verification algorithm: {other}"
        ))),
    }
}

/// Split and decode a token without verifying its signature.
pub fn decode_token(token: &str) -> LicenseResult<(JoseHeader, ClaimSet)> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(LicenseError::Crypto(
            "token is not a three-segment JWT".to_string(),
        ));
    }
    let (header_b64, payload_b64) = (segments[0], segments[1]);

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|e| LicenseError::Crypto(format!("malformed header segment: {e}")))?;
    let payload_json = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| LicenseError::Crypto(format!("malformed payload segment: {e}")))?;

    let header: JoseHeader = serde_json::from_slice(&header_json)
        .map_err(|e| LicenseError::Crypto(format!("header is not valid JSON: {e}")))?;
    let claims: ClaimSet = serde_json::from_slice(&payload_json)
        .map_err(|e| LicenseError::Crypto(format!("payload is not valid JSON: {e}")))?;

    Ok((header, claims))
}

/// Token verifier bound to a single public key for one audience.
///
/// Verifies the signature locally (no remote round-trip), then the audience
/// and the validity window using the same whole-seconds convention issuance
/// uses.
#[derive(Debug, Clone)]
pub struct Validator {
    verify_key: RsaPublicKey,
    audience: String,
}

impl Validator {
    /// Validator for tokens addressed to `audience`, verified with `key`.
    ///
    /// An empty audience disables the audience check.
    pub fn new(key: RsaPublicKey, audience: impl Into<String>) -> Self {
        Self {
            verify_key: key,
            audience: audience.into(),
        }
    }

    /// Verify `token` and return its claims.
    pub fn validate(&self, token: &str) -> LicenseResult<ClaimSet> {
        self.validate_at(token, unix_now())
    }

    /// Verify `token` as of the given Unix timestamp.
    pub fn validate_at(&self, token: &str, now: i64) -> LicenseResult<ClaimSet> {
        let (header, claims) = decode_token(token)?;
        if header.typ != "JWT" {
            return Err(LicenseError::Crypto(format!(
                "unexpected token type {:?}",
                header.typ
            )));
        }
        if !header.alg.is_rsa() {
            return Err(LicenseError::Crypto(format!(
                "validator holds an RSA key but token uses {}",
                header.alg
            )));
        }

        let signature_b64 = token.rsplit('.').next().unwrap_or_default();
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| LicenseError::Crypto(format!("malformed signature segment: {e}")))?;
        let signed_len = token.len() - signature_b64.len() - 1;
        verify_rsa_signature(
            token[..signed_len].as_bytes(),
            &signature,
            header.alg,
            &self.verify_key,
        )?;

        if !self.audience.is_empty() && claims.aud != self.audience {
            return Err(LicenseError::Crypto(format!(
                "audience mismatch: token for {:?}",
                claims.aud
            )));
        }
        if claims.exp != 0 && now >= claims.exp {
            return Err(LicenseError::Crypto(format!(
                "license {} expired at {}",
                claims.jti, claims.exp
            )));
        }
        if claims.nbf != 0 && now < claims.nbf {
            return Err(LicenseError::Crypto(format!(
                "license {} not valid before {}",
                claims.jti, claims.nbf
            )));
        }

        Ok(claims)
    }
}

/// Current time as whole seconds since the Unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
