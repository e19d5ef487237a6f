//! Function interception through the enforcement point.
//!
//! A registered function runs only when the invoke decision allows it, and
//! its results propagate only when the return decision allows them;
//! otherwise the caller sees the declared zero values and a deny result.

use std::sync::Arc;

use serde_json::json;

use licmgr_policy::{
    enforce2, DecisionPoint, EnforcementPoint, PolicyContext, PolicyError, Registration,
    ReturnSpec,
};

const ALLOW_ALL: &str = r#"
package pep

default allow = false

allow {
    input.type == "invoke"
    input.method = ["path", "to", "my_func"]
}

allow {
    input.type == "return"
    input.invoke.allowed == true
}
"#;

const DENY_ALL: &str = r#"
package pep

default allow = false
"#;

const DENY_RETURNS_MENTIONING_WORLD: &str = r#"
package pep

default allow = false

allow {
    input.type == "invoke"
}

allow {
    input.type == "return"
    not contains(input.body.output, "world")
}
"#;

const REQUIRE_CALLER_SCOPE: &str = r#"
package pep

default allow = false

allow {
    contains(input.sc.scope, "simulator")
}
"#;

fn decision_point(module: &str) -> Arc<DecisionPoint> {
    let ctx = PolicyContext::new();
    ctx.register_module("pep", module)
        .compile_module_set("pep", &["pep"]);
    assert!(ctx.error().is_none(), "{:?}", ctx.error());
    Arc::new(DecisionPoint::new(
        ctx.policy("pep").unwrap(),
        "data.pep.allow",
    ))
}

fn my_func_pep(module: &str) -> EnforcementPoint {
    let mut pep = EnforcementPoint::new(decision_point(module));
    pep.register(
        "path/to/my_func",
        Registration::new(enforce2(|name: String, dir: String| {
            (format!("{name}-{dir}"),)
        }))
        .parameters(["name", "dir"])
        .returns(vec![ReturnSpec::string("output")]),
    )
    .unwrap();
    pep
}

#[test]
fn allowed_wrapper_returns_the_function_result() {
    let pep = my_func_pep(ALLOW_ALL);
    let wrapper = pep.wrapper("path/to/my_func").unwrap();

    let outcome = wrapper.call(&[json!("hello"), json!("world")]).unwrap();
    assert!(outcome.allowed());
    assert_eq!(outcome.values, vec![json!("hello-world")]);
    assert!(outcome.deny_reason().is_none());
}

#[test]
fn denied_invoke_yields_zero_values_without_calling_through() {
    let pep = my_func_pep(DENY_ALL);
    let wrapper = pep.wrapper("path/to/my_func").unwrap();

    let outcome = wrapper.call(&[json!("hello"), json!("world")]).unwrap();
    assert!(!outcome.allowed());
    assert_eq!(outcome.values, vec![json!("")]);
    assert!(outcome.ret.is_none(), "function must not have run");
    assert!(outcome.deny_reason().is_some());
}

#[test]
fn denied_return_replaces_results_with_zero_values() {
    let pep = my_func_pep(DENY_RETURNS_MENTIONING_WORLD);
    let wrapper = pep.wrapper("path/to/my_func").unwrap();

    // Output "hello-world" trips the return rule.
    let outcome = wrapper.call(&[json!("hello"), json!("world")]).unwrap();
    assert!(!outcome.allowed());
    assert!(outcome.invoke.allowed);
    assert_eq!(outcome.values, vec![json!("")]);
    assert!(!outcome.ret.as_ref().unwrap().allowed);

    // A harmless output propagates.
    let outcome = wrapper.call(&[json!("hello"), json!("there")]).unwrap();
    assert!(outcome.allowed());
    assert_eq!(outcome.values, vec![json!("hello-there")]);
}

#[test]
fn security_context_reaches_the_policy() {
    let denied = my_func_pep(REQUIRE_CALLER_SCOPE);
    let outcome = denied
        .wrapper("path/to/my_func")
        .unwrap()
        .call(&[json!("a"), json!("b")])
        .unwrap();
    assert!(!outcome.allowed());

    let allowed = my_func_pep(REQUIRE_CALLER_SCOPE)
        .with_security_context(json!({"scope": "simulator regulate"}));
    let outcome = allowed
        .wrapper("path/to/my_func")
        .unwrap()
        .call(&[json!("a"), json!("b")])
        .unwrap();
    assert!(outcome.allowed());
}

#[test]
fn check_invoke_and_check_return_compose_manually() {
    let pep = my_func_pep(ALLOW_ALL);

    let invoke = pep
        .check_invoke("path/to/my_func", &[json!("hello"), json!("world")])
        .unwrap();
    assert!(invoke.allowed());
    assert_eq!(invoke.method().join("/"), "path/to/my_func");
    assert_eq!(invoke.args().to_vec(), vec![json!("hello"), json!("world")]);

    let ret = pep.check_return(&invoke, &[json!("hello-world")]).unwrap();
    assert!(ret.allowed());
    assert_eq!(ret.values().to_vec(), vec![json!("hello-world")]);
}

#[test]
fn unknown_method_fails_fast() {
    let pep = my_func_pep(ALLOW_ALL);
    assert!(matches!(
        pep.wrapper("path/to/other"),
        Err(PolicyError::Configuration(_))
    ));
    assert!(matches!(
        pep.check_invoke("path/to/other", &[]),
        Err(PolicyError::Configuration(_))
    ));
}

#[test]
fn arity_mismatches_are_rejected_at_registration() {
    let mut pep = EnforcementPoint::new(decision_point(ALLOW_ALL));

    // Two parameters declared for a two-argument function, but only one
    // name supplied.
    let result = pep.register(
        "short/params",
        Registration::new(enforce2(|a: String, b: String| (format!("{a}{b}"),)))
            .parameters(["only-one"])
            .returns(vec![ReturnSpec::string("output")]),
    );
    assert!(matches!(result, Err(PolicyError::Configuration(_))));

    // Return slot count mismatch.
    let result = pep.register(
        "short/returns",
        Registration::new(enforce2(|a: String, b: String| (format!("{a}{b}"),)))
            .parameters(["a", "b"])
            .returns(vec![]),
    );
    assert!(matches!(result, Err(PolicyError::Configuration(_))));
}

#[test]
fn duplicate_method_path_is_rejected() {
    let mut pep = EnforcementPoint::new(decision_point(ALLOW_ALL));
    let register = |pep: &mut EnforcementPoint| {
        pep.register(
            "path/to/my_func",
            Registration::new(enforce2(|a: String, b: String| (format!("{a}-{b}"),)))
                .parameters(["name", "dir"])
                .returns(vec![ReturnSpec::string("output")]),
        )
    };
    register(&mut pep).unwrap();
    assert!(matches!(
        register(&mut pep),
        Err(PolicyError::Configuration(_))
    ));
}

#[test]
fn wrong_argument_count_is_a_configuration_error() {
    let pep = my_func_pep(ALLOW_ALL);
    assert!(matches!(
        pep.check_invoke("path/to/my_func", &[json!("only-one")]),
        Err(PolicyError::Configuration(_))
    ));
}
