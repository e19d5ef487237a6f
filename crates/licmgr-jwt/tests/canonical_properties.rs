//! Property-based tests for the canonical token form.
//!
//! Verifies with random claim sets that:
//! - sign → parse round-trips every populated field and omits empty ones
//! - the canonical payload member order is stable across serializations

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use proptest::prelude::*;

use licmgr_core::{ClaimSet, Feature};
use licmgr_jwt::{decode_token, encode_payload, sign_claims, RsaKeyStore, RsaSigner, Validator};

/// One shared key pair; generating RSA keys per case would dominate runtime.
fn shared_keys() -> &'static Arc<RsaKeyStore> {
    static KEYS: OnceLock<Arc<RsaKeyStore>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(RsaKeyStore::generate(2048).expect("keygen")))
}

fn runtime() -> &'static tokio::runtime::Runtime {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
    })
}

// Prefixed so generated names can never collide with a registered claim
// name inside the serialized payload assertions below.
fn name_strategy() -> impl Strategy<Value = String> {
    "zz[a-z0-9_-]{1,8}"
}

fn feature_strategy() -> impl Strategy<Value = Feature> {
    prop::collection::btree_map(
        name_strategy(),
        prop_oneof![
            any::<bool>().prop_map(serde_json::Value::from),
            "[a-z]{1,6}".prop_map(serde_json::Value::from),
            any::<i32>().prop_map(serde_json::Value::from),
        ],
        0..4,
    )
    .prop_map(|claims| Feature { claims })
}

prop_compose! {
    fn claim_set_strategy()(
        aud in prop::option::of("[a-z./:]{1,20}"),
        sub in prop::option::of("[a-z.@]{1,20}"),
        iat in 1_000_000_000i64..2_000_000_000,
        length in 0i64..100_000_000,
        jti in prop::option::of("[a-f0-9-]{8,36}"),
        scopes in prop::collection::vec(name_strategy(), 0..6),
        features in prop::collection::btree_map(name_strategy(), feature_strategy(), 0..3),
    ) -> ClaimSet {
        let mut cs = ClaimSet {
            aud: aud.unwrap_or_default(),
            sub: sub.unwrap_or_default(),
            iat,
            nbf: iat,
            exp: iat + 1 + length,
            jti: jti.unwrap_or_default(),
            ..ClaimSet::default()
        };
        for scope in scopes {
            cs.add_feature(scope);
        }
        cs.with_feature_details(features.into_iter().collect::<BTreeMap<_, _>>())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_sign_parse_round_trip(claims in claim_set_strategy()) {
        let keys = shared_keys().clone();
        let signer = RsaSigner::with_default_algorithm(keys.clone());

        let token = runtime()
            .block_on(sign_claims(&claims, &signer))
            .expect("signing");
        let (_, parsed) = decode_token(&token).expect("parsing");
        prop_assert_eq!(&parsed, &claims);

        let verified = Validator::new(keys.public_key().clone(), "")
            .validate_at(&token, claims.iat)
            .expect("verification");
        prop_assert_eq!(&verified, &claims);
    }

    #[test]
    fn prop_empty_members_never_serialized(claims in claim_set_strategy()) {
        let payload = encode_payload(&claims).unwrap();
        if claims.aud.is_empty() {
            prop_assert!(!payload.contains("\"aud\""));
        }
        if claims.sub.is_empty() {
            prop_assert!(!payload.contains("\"sub\""));
        }
        if claims.jti.is_empty() {
            prop_assert!(!payload.contains("\"jti\""));
        }
        if claims.scope.is_empty() {
            prop_assert!(!payload.contains("\"scope\""));
        }
        if claims.features.is_empty() {
            prop_assert!(!payload.contains("\"features\""));
        }
        prop_assert!(!payload.contains("\"client_id\""));
        prop_assert!(!payload.contains("\"client_secret\""));
    }

    #[test]
    fn prop_member_order_is_stable(claims in claim_set_strategy()) {
        let first = encode_payload(&claims).unwrap();
        let second = encode_payload(&claims).unwrap();
        prop_assert_eq!(&first, &second);

        // Registered members appear in the canonical order whenever present.
        let order = ["\"aud\"", "\"iss\"", "\"sub\"", "\"exp\"", "\"iat\"", "\"nbf\"",
                     "\"jti\"", "\"client_id\"", "\"client_secret\"", "\"scope\"", "\"features\""];
        let mut previous: Option<usize> = None;
        for key in order {
            if let Some(at) = first.find(key) {
                if let Some(prev) = previous {
                    prop_assert!(at > prev, "member {} out of order in {}", key, first);
                }
                previous = Some(at);
            }
        }
    }
}
