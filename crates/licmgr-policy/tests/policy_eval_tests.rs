//! Scope-escalation policy evaluations.
//!
//! A license creation request may not put more scopes into the license
//! (data) than the caller's own token grants (input). The rule computes
//! `count(license_scopes - caller_scopes) == 0`.

use serde_json::json;

use licmgr_policy::{DecisionStoreBuilder, PolicyContext};

const ALLOW_CREATE_MODULE: &str = r#"
package example

default allow_create = false

# A caller may only grant scopes it holds itself.
allow_create {
    input.method == "POST"
    input.path = ["license", "generate", _]

    iscopes := scopes_to_set(input.claims.scope)
    lscopes := scopes_to_set(data.license.scope)

    filtered := lscopes - iscopes

    count(filtered) == 0
}

scopes_to_set(str) = {x |
    some i
    parts := split(str, " ")
    x := parts[i]
}
"#;

const MULTI_SOURCE_MODULE: &str = r#"
package example

default allow_create_a = false
default allow_create_b = false

allow_create_a {
    input.method == "POST"
    input.path = ["license", "generate", _]

    iscopes := scopes_to_set(input.claims.scope)
    lscopes := scopes_to_set(data.a.license.scope)

    count(lscopes - iscopes) == 0
}

allow_create_b {
    input.method == "POST"
    input.path = ["license", "generate", _]

    iscopes := scopes_to_set(input.claims.scope)
    lscopes := scopes_to_set(data.b.license.scope)

    count(lscopes - iscopes) == 0
}

scopes_to_set(str) = {x |
    some i
    parts := split(str, " ")
    x := parts[i]
}
"#;

fn license_data() -> serde_json::Value {
    json!({
        "scope": "simulator regulate ui settings",
        "features": {
            "settings": {
                "claims": {
                    "access": "rw",
                    "ai": true,
                    "ao": true,
                    "di": true,
                    "do": true
                }
            }
        }
    })
}

fn caller_input(scope: &str) -> String {
    json!({
        "method": "POST",
        "claims": {
            "aud": "https://api.valmatics.se",
            "iss": "https://api.valmatics.se/licmgr",
            "sub": "hobbe.nisse@azcam.net",
            "exp": 1_927_735_782i64,
            "iat": 1_612_375_782i64,
            "nbf": 1_612_375_782i64,
            "jti": "fcd2174b-664a-11eb-afe1-1629c910062f",
            "client_id": "valmatics2.x",
            "client_secret": "SecretFromAWSCognito",
            "scope": scope
        },
        "path": ["license", "generate", "Kåge"]
    })
    .to_string()
}

#[test]
fn caller_holding_all_license_scopes_may_create() {
    let ctx = PolicyContext::new();
    ctx.register_module("example", ALLOW_CREATE_MODULE)
        .compile_module_set("create", &["example"]);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    let mut store = DecisionStoreBuilder::new();
    store.add("license", license_data());

    let outcomes = ctx
        .new_eval()
        .policy(ctx.policy("create").unwrap())
        .store(store.build().unwrap())
        .input_json(&caller_input(
            "simulator regulate ui settings master-of-puppets",
        ))
        .unwrap()
        .query("data.example.allow_create")
        .eval(None)
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].query, "data.example.allow_create");
    assert_eq!(outcomes[0].value, json!(true));
}

#[test]
fn scope_escalation_is_denied() {
    let ctx = PolicyContext::new();
    ctx.register_module("example", ALLOW_CREATE_MODULE)
        .compile_module_set("create", &["example"]);

    let mut store = DecisionStoreBuilder::new();
    store.add("license", license_data());

    // Caller lacks "ui" but the license asks for it.
    let outcomes = ctx
        .new_eval()
        .policy(ctx.policy("create").unwrap())
        .store(store.build().unwrap())
        .input_json(&caller_input(
            "simulator regulate settings master-of-puppets",
        ))
        .unwrap()
        .query("data.example.allow_create")
        .eval(None)
        .unwrap();

    assert_eq!(outcomes[0].value, json!(false));
}

#[test]
fn wrong_method_or_path_is_denied() {
    let ctx = PolicyContext::new();
    ctx.register_module("example", ALLOW_CREATE_MODULE)
        .compile_module_set("create", &["example"]);

    let mut store = DecisionStoreBuilder::new();
    store.add("license", license_data());
    let store = store.build().unwrap();
    let compilation = ctx.policy("create").unwrap();

    let get_input = json!({
        "method": "GET",
        "claims": {"scope": "simulator regulate ui settings"},
        "path": ["license", "generate", "Kåge"]
    });
    let outcomes = ctx
        .new_eval()
        .policy(compilation.clone())
        .store(store.clone())
        .input(get_input)
        .query("data.example.allow_create")
        .eval(None)
        .unwrap();
    assert_eq!(outcomes[0].value, json!(false));

    let wrong_path = json!({
        "method": "POST",
        "claims": {"scope": "simulator regulate ui settings"},
        "path": ["license", "revoke", "Kåge"]
    });
    let outcomes = ctx
        .new_eval()
        .policy(compilation)
        .store(store)
        .input(wrong_path)
        .query("data.example.allow_create")
        .eval(None)
        .unwrap();
    assert_eq!(outcomes[0].value, json!(false));
}

#[test]
fn two_mounts_evaluate_independently() {
    let ctx = PolicyContext::new();
    ctx.register_module("example", MULTI_SOURCE_MODULE)
        .compile_module_set("multi", &["example"]);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());

    // Mount "a" matches the caller's scopes, mount "b" wants "ui2".
    let mut store = DecisionStoreBuilder::new();
    store
        .add("a", json!({"license": {"scope": "simulator regulate ui settings"}}))
        .add("b", json!({"license": {"scope": "simulator regulate ui2 settings"}}));

    let outcomes = ctx
        .new_eval()
        .policy(ctx.policy("multi").unwrap())
        .store(store.build().unwrap())
        .input_json(&caller_input(
            "simulator regulate ui settings master-of-puppets",
        ))
        .unwrap()
        .query("data.example.allow_create_a")
        .query("data.example.allow_create_b")
        .eval(None)
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].value, json!(true));
    assert_eq!(outcomes[1].value, json!(false));
}

#[test]
fn evaluation_without_policy_or_query_is_a_configuration_error() {
    let ctx = PolicyContext::new();
    assert!(ctx.new_eval().eval(None).is_err());

    ctx.register_module("example", ALLOW_CREATE_MODULE)
        .compile_module_set("create", &["example"]);
    let eval = ctx.new_eval().policy(ctx.policy("create").unwrap());
    assert!(eval.eval(None).is_err());
}

#[test]
fn cancelled_evaluation_surfaces_as_error() {
    use licmgr_policy::PolicyError;
    use tokio_util::sync::CancellationToken;

    let ctx = PolicyContext::new();
    ctx.register_module("example", ALLOW_CREATE_MODULE)
        .compile_module_set("create", &["example"]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = ctx
        .new_eval()
        .policy(ctx.policy("create").unwrap())
        .query("data.example.allow_create")
        .eval(Some(&cancel));
    assert!(matches!(result, Err(PolicyError::Cancelled(_))));
}
