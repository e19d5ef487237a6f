//! License claim sets and their canonical JSON form.
//!
//! A [`ClaimSet`] is what gets serialized into the JWT payload. The struct's
//! field declaration order is the canonical member order (`aud`, `iss`,
//! `sub`, `exp`, `iat`, `nbf`, `jti`, `client_id`, `client_secret`, `scope`,
//! `features`); empty strings, zero timestamps and empty maps are omitted.
//! The `features` map and each feature's `claims` map are B-tree maps so
//! their keys serialize in lexicographic order on every platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LicenseError, LicenseResult};
use crate::scope::ScopeSet;

fn is_zero(ts: &i64) -> bool {
    *ts == 0
}

/// Per-feature configuration granted by a license.
///
/// The `claims` map holds scalar or boolean settings, e.g. access level and
/// channel flags for a `settings` feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Named settings for the feature. Keys serialize in lexicographic
    /// order; an empty map is omitted from the payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl Feature {
    /// Feature with no per-feature claims.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one claim value, chainable.
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}

/// The full set of claims embedded in a license token.
///
/// Registered claims follow RFC 7519; `client_id`/`client_secret` follow the
/// OAuth token-exchange registry; `scope` is the space-joined feature list
/// and `features` the non-standard per-feature claims map.
///
/// Lifecycle: the issuance generator creates a pre-populated set (fresh
/// `jti`, `iat = nbf = now`, computed `exp`), the caller adds features and a
/// subject, and signing freezes it; a signed token is never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Audience: base address of the licensed resource (`aud`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aud: String,

    /// Principal that issued the license (`iss`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,

    /// Principal the license is issued to (`sub`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,

    /// Expiry, seconds since the Unix epoch (`exp`).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exp: i64,

    /// Issue time, seconds since the Unix epoch (`iat`).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub iat: i64,

    /// Activation time, seconds since the Unix epoch (`nbf`). May be in the
    /// future.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub nbf: i64,

    /// Unique license id (`jti`), distinct for every generated license even
    /// when the same claims are issued twice.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,

    /// OAuth 2.0 client id used against the cloud services.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    /// OAuth 2.0 client secret. Omitted when the system embeds its own.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,

    /// Space-separated feature names granted by this license. Order is the
    /// order features were added; duplicates never occur.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,

    /// Per-feature claims, keyed by feature name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, Feature>,
}

impl ClaimSet {
    /// Empty claim set. Issuance callers should prefer
    /// `Generator::create_claim_set`, which pre-populates ids and times.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject, chainable.
    pub fn with_subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = sub.into();
        self
    }

    /// Append a feature name to `scope`, chainable.
    ///
    /// Duplicates are ignored. Name validity (`[a-z0-9_-]`) is enforced at
    /// signing time so the fluent chain never breaks here.
    pub fn with_feature(mut self, name: impl Into<String>) -> Self {
        self.add_feature(name);
        self
    }

    /// Replace the per-feature claims map, chainable.
    pub fn with_feature_details(mut self, features: BTreeMap<String, Feature>) -> Self {
        self.features = features;
        self
    }

    /// Append a feature name to `scope` unless already present.
    pub fn add_feature(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name.is_empty() || self.scopes().contains(&name) {
            return;
        }
        if self.scope.is_empty() {
            self.scope = name;
        } else {
            self.scope.push(' ');
            self.scope.push_str(&name);
        }
    }

    /// The `scope` claim as a set.
    pub fn scopes(&self) -> ScopeSet {
        ScopeSet::parse(&self.scope)
    }

    /// Check the claim set against the model invariants: timestamp ordering
    /// (`exp > iat >= nbf` where present) and the feature-name charset.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.exp != 0 && self.iat != 0 && self.exp <= self.iat {
            return Err(LicenseError::Configuration(format!(
                "exp ({}) must be after iat ({})",
                self.exp, self.iat
            )));
        }
        if self.iat != 0 && self.nbf != 0 && self.iat < self.nbf {
            return Err(LicenseError::Configuration(format!(
                "iat ({}) must not precede nbf ({})",
                self.iat, self.nbf
            )));
        }
        for token in self.scopes().iter() {
            if !is_valid_feature_name(token) {
                return Err(LicenseError::Configuration(format!(
                    "invalid feature name in scope: {token:?}"
                )));
            }
        }
        for name in self.features.keys() {
            if !is_valid_feature_name(name) {
                return Err(LicenseError::Configuration(format!(
                    "invalid feature name in features map: {name:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Feature names are lowercase alphanumerics plus `_` and `-`.
pub fn is_valid_feature_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> ClaimSet {
        let mut cs = ClaimSet {
            aud: "https://api.valmatics.se".into(),
            iss: "https://api.valmatics.se/licmgr".into(),
            exp: 1_927_735_782,
            iat: 1_612_375_782,
            nbf: 1_612_375_782,
            jti: "fcd2174b-664a-11eb-afe1-1629c910062f".into(),
            client_id: "valmatics2.x".into(),
            client_secret: "SecretFromAWSCognito".into(),
            ..ClaimSet::default()
        };
        cs = cs
            .with_subject("hobbe.nisse@azcam.net")
            .with_feature("simulator")
            .with_feature("regulate")
            .with_feature("ui")
            .with_feature("settings");
        cs
    }

    #[test]
    fn canonical_member_order() {
        let json = serde_json::to_string(&populated()).unwrap();
        let expected = [
            "\"aud\"",
            "\"iss\"",
            "\"sub\"",
            "\"exp\"",
            "\"iat\"",
            "\"nbf\"",
            "\"jti\"",
            "\"client_id\"",
            "\"client_secret\"",
            "\"scope\"",
        ];
        let mut last = 0;
        for key in expected {
            let at = json.find(key).unwrap_or_else(|| panic!("{key} missing"));
            assert!(at > last || last == 0, "{key} out of order in {json}");
            last = at;
        }
    }

    #[test]
    fn empty_members_are_omitted() {
        let json = serde_json::to_string(&ClaimSet::new()).unwrap();
        assert_eq!(json, "{}");

        let partial = ClaimSet::new().with_subject("someone");
        let json = serde_json::to_string(&partial).unwrap();
        assert_eq!(json, r#"{"sub":"someone"}"#);
    }

    #[test]
    fn scope_appends_without_duplicates() {
        let cs = ClaimSet::new()
            .with_feature("simulator")
            .with_feature("regulate")
            .with_feature("simulator");
        assert_eq!(cs.scope, "simulator regulate");
    }

    #[test]
    fn features_serialize_sorted() {
        let mut features = BTreeMap::new();
        features.insert("zeta".to_string(), Feature::new().with_claim("on", true));
        features.insert("alpha".to_string(), Feature::new().with_claim("on", false));
        let cs = ClaimSet::new().with_feature_details(features);
        let json = serde_json::to_string(&cs).unwrap();
        assert!(json.find("alpha").unwrap() < json.find("zeta").unwrap());
    }

    #[test]
    fn feature_claims_serialize_sorted() {
        let feature = Feature::new()
            .with_claim("do", true)
            .with_claim("access", "rw")
            .with_claim("ai", true);
        let json = serde_json::to_string(&feature).unwrap();
        assert_eq!(json, r#"{"claims":{"access":"rw","ai":true,"do":true}}"#);
    }

    #[test]
    fn validation_rejects_inverted_window() {
        let mut cs = populated();
        cs.exp = cs.iat - 1;
        assert!(matches!(
            cs.validate(),
            Err(LicenseError::Configuration(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_feature_names() {
        let cs = ClaimSet::new().with_feature("Shout");
        assert!(cs.validate().is_err());
        let cs = ClaimSet::new().with_feature("ok_name-2");
        assert!(cs.validate().is_ok());
    }

    #[test]
    fn round_trip_preserves_fields() {
        let cs = populated();
        let json = serde_json::to_string(&cs).unwrap();
        let back: ClaimSet = serde_json::from_str(&json).unwrap();
        assert_eq!(cs, back);
    }
}
