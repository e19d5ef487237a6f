//! Policy enforcement point: typed function interception.
//!
//! Functions register under a `/`-separated method path together with their
//! parameter and return names. Invocation builds a canonical decision
//! message from the named arguments, consults the PDP, and only calls
//! through on allow; the return value is re-checked symmetrically and
//! replaced by declared zero values on deny.
//!
//! There is no runtime reflection: a macro implements the call adapter per
//! closure signature, so argument marshaling is typed and the arity is
//! known at registration time.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{PolicyError, PolicyResult};
use crate::pdp::{Decision, DecisionMessage, DecisionPoint};

/// Declared type of one return slot, used to produce its zero value when a
/// return is denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Empty string.
    String,
    /// Zero integer.
    Integer,
    /// Zero float.
    Float,
    /// False.
    Boolean,
    /// Empty array.
    Array,
    /// Empty object.
    Object,
    /// JSON null.
    Null,
}

impl ValueKind {
    /// The zero value for this kind.
    pub fn zero(self) -> Value {
        match self {
            ValueKind::String => Value::String(String::new()),
            ValueKind::Integer => serde_json::json!(0),
            ValueKind::Float => serde_json::json!(0.0),
            ValueKind::Boolean => Value::Bool(false),
            ValueKind::Array => Value::Array(Vec::new()),
            ValueKind::Object => Value::Object(Map::new()),
            ValueKind::Null => Value::Null,
        }
    }
}

/// Name and declared type of one return slot.
#[derive(Debug, Clone)]
pub struct ReturnSpec {
    /// Name the value appears under in the decision message body.
    pub name: String,
    /// Declared type, used for the deny-time zero value.
    pub kind: ValueKind,
}

impl ReturnSpec {
    /// Return slot with an explicit kind.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// String-typed return slot.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::String)
    }

    /// Integer-typed return slot.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Integer)
    }

    /// Boolean-typed return slot.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Boolean)
    }
}

/// Output of an enforced function, marshaled into named return slots.
///
/// Implemented for tuples up to three elements; a single-return function
/// returns `(value,)`.
pub trait ReturnValues {
    /// Number of return slots this output occupies.
    fn arity() -> usize
    where
        Self: Sized;

    /// Marshal the output into positional JSON values.
    fn into_values(self) -> PolicyResult<Vec<Value>>;
}

macro_rules! impl_return_values {
    ($count:expr $(, $ty:ident . $idx:tt)*) => {
        impl<$($ty: Serialize),*> ReturnValues for ($($ty,)*) {
            fn arity() -> usize {
                $count
            }

            #[allow(unused_mut)]
            fn into_values(self) -> PolicyResult<Vec<Value>> {
                let mut values = Vec::with_capacity($count);
                $(
                    values.push(serde_json::to_value(self.$idx).map_err(|e| {
                        PolicyError::Eval(format!("return value marshaling failed: {e}"))
                    })?);
                )*
                Ok(values)
            }
        }
    };
}

impl_return_values!(0);
impl_return_values!(1, R0.0);
impl_return_values!(2, R0.0, R1.1);
impl_return_values!(3, R0.0, R1.1, R2.2);

/// A function whose invocation and return are gated by policy.
///
/// Marshals positional JSON arguments into the typed signature and the
/// typed output back into positional JSON values.
pub trait EnforcedFn: Send + Sync {
    /// Number of input parameters.
    fn in_arity(&self) -> usize;

    /// Number of return slots.
    fn out_arity(&self) -> usize;

    /// Call the function with marshaled arguments.
    fn call(&self, args: &[Value]) -> PolicyResult<Vec<Value>>;
}

struct FnAdapter<F, Args, Out> {
    f: F,
    _marker: PhantomData<fn(Args) -> Out>,
}

macro_rules! impl_enforced_fn {
    ($fn_name:ident, $count:expr $(, $ty:ident . $idx:tt)*) => {
        impl<F, $($ty,)* Out> EnforcedFn for FnAdapter<F, ($($ty,)*), Out>
        where
            F: Fn($($ty),*) -> Out + Send + Sync,
            $($ty: DeserializeOwned,)*
            Out: ReturnValues,
        {
            fn in_arity(&self) -> usize {
                $count
            }

            fn out_arity(&self) -> usize {
                Out::arity()
            }

            #[allow(non_snake_case)]
            fn call(&self, args: &[Value]) -> PolicyResult<Vec<Value>> {
                if args.len() != $count {
                    return Err(PolicyError::Configuration(format!(
                        "expected {} arguments, got {}",
                        $count,
                        args.len()
                    )));
                }
                $(
                    let $ty: $ty = serde_json::from_value(args[$idx].clone()).map_err(|e| {
                        PolicyError::Eval(format!(
                            "argument {} unmarshaling failed: {e}",
                            $idx
                        ))
                    })?;
                )*
                let out = (self.f)($($ty),*);
                out.into_values()
            }
        }

        /// Adapt a typed function into an [`EnforcedFn`].
        pub fn $fn_name<F, $($ty,)* Out>(f: F) -> Arc<dyn EnforcedFn>
        where
            F: Fn($($ty),*) -> Out + Send + Sync + 'static,
            $($ty: DeserializeOwned + 'static,)*
            Out: ReturnValues + 'static,
        {
            let adapter: FnAdapter<F, ($($ty,)*), Out> = FnAdapter {
                f,
                _marker: PhantomData,
            };
            Arc::new(adapter)
        }
    };
}

impl_enforced_fn!(enforce0, 0);
impl_enforced_fn!(enforce1, 1, A0.0);
impl_enforced_fn!(enforce2, 2, A0.0, A1.1);
impl_enforced_fn!(enforce3, 3, A0.0, A1.1, A2.2);
impl_enforced_fn!(enforce4, 4, A0.0, A1.1, A2.2, A3.3);

/// One function registration: the typed handle plus parameter and return
/// names.
#[derive(Clone)]
pub struct Registration {
    function: Arc<dyn EnforcedFn>,
    parameters: Vec<String>,
    returns: Vec<ReturnSpec>,
}

impl Registration {
    /// Registration for `function`; add names with the chainable setters.
    pub fn new(function: Arc<dyn EnforcedFn>) -> Self {
        Self {
            function,
            parameters: Vec::new(),
            returns: Vec::new(),
        }
    }

    /// Name the input parameters, chainable. The count must match the
    /// function's in-arity at registration.
    pub fn parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the return slots, chainable. The count must match the
    /// function's out-arity at registration.
    pub fn returns(mut self, specs: Vec<ReturnSpec>) -> Self {
        self.returns = specs;
        self
    }
}

struct RegisteredFn {
    registration: Registration,
    method: Vec<String>,
}

/// Opaque token produced by an invoke check. Retains the registration
/// path, the positional arguments and the evaluation result.
#[derive(Debug, Clone)]
pub struct InvocationToken {
    method_path: String,
    method: Vec<String>,
    args: Vec<Value>,
    decision: Decision,
}

impl InvocationToken {
    /// The structured method path.
    pub fn method(&self) -> &[String] {
        &self.method
    }

    /// The positional arguments the check ran over.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The invoke decision.
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Shorthand for `decision().allowed`.
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }
}

/// Opaque token produced by a return check. Carries the values that may
/// propagate: the function's results on allow, declared zero values on
/// deny.
#[derive(Debug, Clone)]
pub struct ReturnToken {
    values: Vec<Value>,
    decision: Decision,
}

impl ReturnToken {
    /// The values that may propagate to the caller.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The return decision.
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Shorthand for `decision().allowed`.
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }
}

/// Combined outcome of a wrapped call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    /// The values to hand to the caller (results or zero values).
    pub values: Vec<Value>,
    /// The invoke decision.
    pub invoke: Decision,
    /// The return decision; absent when the invoke was denied and the
    /// function never ran.
    pub ret: Option<Decision>,
}

impl CallOutcome {
    /// True when both the invoke and the return were allowed.
    pub fn allowed(&self) -> bool {
        self.invoke.allowed && self.ret.as_ref().map_or(false, |d| d.allowed)
    }

    /// The deny reason, when any stage denied.
    pub fn deny_reason(&self) -> Option<String> {
        if !self.invoke.allowed {
            return Some(self.invoke.deny_reason());
        }
        match &self.ret {
            Some(decision) if !decision.allowed => Some(decision.deny_reason()),
            _ => None,
        }
    }
}

/// Gates registered functions behind a policy decision point.
pub struct EnforcementPoint {
    pdp: Arc<DecisionPoint>,
    security_context: Value,
    funcs: HashMap<String, RegisteredFn>,
}

impl EnforcementPoint {
    /// Enforcement point consulting `pdp` with an empty security context.
    pub fn new(pdp: Arc<DecisionPoint>) -> Self {
        Self {
            pdp,
            security_context: Value::Null,
            funcs: HashMap::new(),
        }
    }

    /// Attach the caller's verified claims as the `sc` member of every
    /// decision message, chainable.
    pub fn with_security_context(mut self, sc: Value) -> Self {
        self.security_context = sc;
        self
    }

    /// Register a function under a `/`-separated method path.
    ///
    /// Fails fast on a duplicate path or when the named parameter/return
    /// counts do not match the function's arities.
    pub fn register(&mut self, method_path: &str, registration: Registration) -> PolicyResult<()> {
        if method_path.is_empty() {
            return Err(PolicyError::Configuration(
                "method path must not be empty".to_string(),
            ));
        }
        if self.funcs.contains_key(method_path) {
            return Err(PolicyError::Configuration(format!(
                "method {method_path} already registered"
            )));
        }
        let in_arity = registration.function.in_arity();
        if registration.parameters.len() != in_arity {
            return Err(PolicyError::Configuration(format!(
                "method {method_path}: {} parameter names for a function taking {in_arity}",
                registration.parameters.len()
            )));
        }
        let out_arity = registration.function.out_arity();
        if registration.returns.len() != out_arity {
            return Err(PolicyError::Configuration(format!(
                "method {method_path}: {} return names for a function returning {out_arity}",
                registration.returns.len()
            )));
        }

        let method = method_path.split('/').map(str::to_owned).collect();
        debug!(method = method_path, in_arity, out_arity, "registered enforced function");
        self.funcs.insert(
            method_path.to_string(),
            RegisteredFn {
                registration,
                method,
            },
        );
        Ok(())
    }

    fn registered(&self, method_path: &str) -> PolicyResult<&RegisteredFn> {
        self.funcs.get(method_path).ok_or_else(|| {
            PolicyError::Configuration(format!("method {method_path} is not part of this PEP"))
        })
    }

    /// Check an invocation that is about to happen.
    pub fn check_invoke(&self, method_path: &str, args: &[Value]) -> PolicyResult<InvocationToken> {
        let registered = self.registered(method_path)?;
        if args.len() != registered.registration.parameters.len() {
            return Err(PolicyError::Configuration(format!(
                "method {method_path}: {} arguments for {} parameters",
                args.len(),
                registered.registration.parameters.len()
            )));
        }

        let mut body = Map::new();
        for (name, value) in registered.registration.parameters.iter().zip(args) {
            body.insert(name.clone(), value.clone());
        }

        let message = DecisionMessage::invoke(
            registered.method.clone(),
            self.security_context.clone(),
            body,
        );
        let decision = self.pdp.evaluate(&message)?;

        Ok(InvocationToken {
            method_path: method_path.to_string(),
            method: registered.method.clone(),
            args: args.to_vec(),
            decision,
        })
    }

    /// Check the return of a previously checked invocation.
    ///
    /// On deny the token carries the declared zero value for every return
    /// slot instead of the produced values.
    pub fn check_return(
        &self,
        invoke: &InvocationToken,
        returns: &[Value],
    ) -> PolicyResult<ReturnToken> {
        let registered = self.registered(&invoke.method_path)?;
        let specs = &registered.registration.returns;
        if returns.len() != specs.len() {
            return Err(PolicyError::Configuration(format!(
                "method {}: {} return values for {} declared returns",
                invoke.method_path,
                returns.len(),
                specs.len()
            )));
        }

        let mut body = Map::new();
        for (spec, value) in specs.iter().zip(returns) {
            body.insert(spec.name.clone(), value.clone());
        }

        let message = DecisionMessage::ret(
            registered.method.clone(),
            self.security_context.clone(),
            body,
            &invoke.decision,
        );
        let decision = self.pdp.evaluate(&message)?;

        let values = if decision.allowed {
            returns.to_vec()
        } else {
            specs.iter().map(|spec| spec.kind.zero()).collect()
        };

        Ok(ReturnToken { values, decision })
    }

    /// Convenience wrapper: check-invoke, call through, check-return.
    pub fn wrapper(&self, method_path: &str) -> PolicyResult<Wrapper<'_>> {
        self.registered(method_path)?;
        Ok(Wrapper {
            pep: self,
            method_path: method_path.to_string(),
        })
    }
}

/// Callable produced by [`EnforcementPoint::wrapper`].
pub struct Wrapper<'a> {
    pep: &'a EnforcementPoint,
    method_path: String,
}

impl Wrapper<'_> {
    /// Run the wrapped function under policy.
    ///
    /// On invoke deny the function does not run and the outcome carries
    /// zero values; on return deny the produced values are replaced by
    /// zero values. Either way the deny travels in the outcome, not as an
    /// error.
    pub fn call(&self, args: &[Value]) -> PolicyResult<CallOutcome> {
        let invoke = self.pep.check_invoke(&self.method_path, args)?;
        let registered = self.pep.registered(&self.method_path)?;

        if !invoke.allowed() {
            let values = registered
                .registration
                .returns
                .iter()
                .map(|spec| spec.kind.zero())
                .collect();
            return Ok(CallOutcome {
                values,
                invoke: invoke.decision,
                ret: None,
            });
        }

        let produced = registered.registration.function.call(&invoke.args)?;
        let ret = self.pep.check_return(&invoke, &produced)?;
        Ok(CallOutcome {
            values: ret.values,
            invoke: invoke.decision,
            ret: Some(ret.decision),
        })
    }
}
