//! Sandbox executor: runs the instrumented bundle in an isolated engine.
//!
//! The evaluation context exposes only the ECMAScript builtins plus an
//! explicitly enumerated host surface: the chunk registry stand-in, a
//! minimal window object, the logged arithmetic natives and the wrapper
//! prelude. The engine grants no ambient I/O — no network, no timers, no
//! module loader. There is deliberately no cancellation or timeout here;
//! an infinite loop in the bundle blocks the run.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use boa_engine::object::builtins::JsArray;
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{Context, JsArgs, JsObject, JsString, JsValue, NativeFunction, Source};
use tracing::{debug, warn};

use crate::headers::sha1_hex;
use crate::rewrite::{LOGGED_ADD, LOGGED_MOD, LOGGED_SUB, WRAP_PREFIX};
use crate::types::{Diagnostic, ExtractError, LogEntry, OperationLog};

/// Wrapper factory and observability helpers. `_wrap` implements the
/// read-property interception: callable values are matched against the
/// `+`, `-`, `%` operator literals in that priority order; integer-keyed
/// non-callable reads are recorded. An unmatched callable resolves to a
/// non-callable placeholder, a defect inherited from the target shape.
const PRELUDE: &str = r#"
function _wrap(obj, name) {
    return new Proxy({ obj: obj }, {
        get: function (target, prop) {
            var value = target.obj[prop];
            if (typeof prop === "symbol") {
                return value;
            }
            if (typeof value === "function") {
                var code = String(value);
                if (code.indexOf("+") > -1) { return _add; }
                if (code.indexOf("-") > -1) { return _sub; }
                if (code.indexOf("%") > -1) { return _mod; }
                _unknownOperator(name, prop);
                return "--unknown operator--";
            }
            var index = Number(prop);
            if (Number.isInteger(index) && index >= 0) {
                _get(name, index, value);
            }
            return value;
        }
    });
}
function _watch(obj, name) {
    return new Proxy(obj, {
        get: function (target, prop) {
            var value = target[prop];
            if (typeof prop !== "symbol" && !value) {
                _miss(name, String(prop));
            }
            return value;
        }
    });
}
self = _watch(self, "self");
window = _watch(window, "window");
"#;

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Key of the chunk registry on the `self` stand-in.
    pub chunk_key: String,
    /// Module id of the signing module inside the registration slot.
    pub module_id: u32,
    pub hasher_module: u32,
    pub getter_module: u32,
    pub auth_module: u32,
    pub auth_module_alt: u32,
    /// Export field holding the signature factory on the second placeholder.
    pub export_field: String,
    /// Field of the factory's result carrying the signature string.
    pub sign_field: String,
    /// Request path handed to the signature factory; the rule set does not
    /// depend on its value.
    pub probe_url: String,
    pub user_agent: String,
    pub auth_user_id: i32,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            chunk_key: "webpackChunkof_vue".to_string(),
            module_id: 802_313,
            hasher_module: 89_668,
            getter_module: 858_156,
            auth_module: 944_114,
            auth_module_alt: 441_153,
            export_field: "A".to_string(),
            sign_field: "sign".to_string(),
            probe_url: "/api2/v2/users/me".to_string(),
            user_agent: "browser".to_string(),
            auth_user_id: 123_123,
        }
    }
}

#[derive(Clone, Copy)]
enum ModuleStub {
    Hasher,
    PropertyGetter,
    AuthContext,
    AuthContextAlt,
}

impl SandboxOptions {
    fn resolve_module(&self, id: f64) -> Option<ModuleStub> {
        [
            (self.hasher_module, ModuleStub::Hasher),
            (self.getter_module, ModuleStub::PropertyGetter),
            (self.auth_module, ModuleStub::AuthContext),
            (self.auth_module_alt, ModuleStub::AuthContextAlt),
        ]
        .into_iter()
        .find(|(module_id, _)| f64::from(*module_id) == id)
        .map(|(_, stub)| stub)
    }
}

/// Everything captured by one invocation, threaded back explicitly so runs
/// are reentrant: no process-global state survives this call.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub sign: String,
    pub hashed_message: Option<String>,
    pub log: OperationLog,
}

pub fn run_sandbox(
    source: &str,
    bindings: &BTreeSet<String>,
    options: &SandboxOptions,
) -> Result<SandboxOutcome, ExtractError> {
    let log = Rc::new(RefCell::new(OperationLog::default()));
    let hashed = Rc::new(RefCell::new(None::<String>));
    let mut context = Context::default();

    register_arithmetic(&mut context, log.clone());
    register_observability(&mut context, log.clone());
    register_globals(&mut context, bindings, options);

    context
        .eval(Source::from_bytes(PRELUDE))
        .map_err(|err| ExtractError::Parse(format!("prelude rejected: {err}")))?;

    debug!(bytes = source.len(), "evaluating instrumented bundle");
    context
        .eval(Source::from_bytes(source))
        .map_err(|err| ExtractError::Parse(format!("bundle evaluation failed: {err}")))?;

    let sign = second_stage(&mut context, &log, hashed.clone(), options)?;

    let outcome_log = log.borrow().clone();
    let hashed_message = hashed.borrow().clone();
    Ok(SandboxOutcome { sign, hashed_message, log: outcome_log })
}

/// Locate the module function in the fixed registration slot and drive it
/// through the synthetic dependency resolver; the signature string is read
/// off the factory exported on the second placeholder object.
fn second_stage(
    context: &mut Context,
    log: &Rc<RefCell<OperationLog>>,
    hashed: Rc<RefCell<Option<String>>>,
    options: &SandboxOptions,
) -> Result<String, ExtractError> {
    let global = context.global_object().clone();
    let registry_host = as_object(observed_get(&global, "self", "global", log, context)?, "self")?;
    let registry =
        as_object(observed_get(&registry_host, &options.chunk_key, "self", log, context)?, "chunk registry")?;
    let entry = as_object(observed_get(&registry, "0", "chunk registry", log, context)?, "registration entry")?;
    let modules = as_object(observed_get(&entry, "1", "registration entry", log, context)?, "module table")?;
    let slot = observed_get(&modules, &options.module_id.to_string(), "module table", log, context)?;
    let module_fn = slot.as_callable().map(|f| f.clone()).ok_or_else(|| {
        ExtractError::Parse(format!("module slot {} is not callable", options.module_id))
    })?;

    let param_in = ObjectInitializer::new(context).build();
    let param_out = ObjectInitializer::new(context).build();
    let importer = build_importer(context, log.clone(), hashed, options);

    module_fn
        .call(
            &JsValue::undefined(),
            &[param_in.into(), param_out.clone().into(), importer],
            context,
        )
        .map_err(|err| ExtractError::Parse(format!("module invocation failed: {err}")))?;

    let exported = observed_get(&param_out, &options.export_field, "exports", log, context)?;
    let factory = exported
        .as_callable()
        .map(|f| f.clone())
        .ok_or_else(|| ExtractError::Parse("exported signer is not callable".to_string()))?;

    let request = ObjectInitializer::new(context)
        .property(
            JsString::from("url"),
            JsString::from(options.probe_url.as_str()),
            Attribute::all(),
        )
        .build();
    let result = factory
        .call(&JsValue::undefined(), &[request.into()], context)
        .map_err(|err| ExtractError::Parse(format!("signer invocation failed: {err}")))?;
    let result_obj = as_object(result, "signer result")?;
    let sign_value = observed_get(&result_obj, &options.sign_field, "signer result", log, context)?;
    let sign = sign_value
        .to_string(context)
        .map_err(|err| ExtractError::Parse(format!("signature is not a string: {err}")))?
        .to_std_string_escaped();
    Ok(sign)
}

fn register_globals(context: &mut Context, bindings: &BTreeSet<String>, options: &SandboxOptions) {
    let chunk_array = JsArray::new(context);
    let self_obj = ObjectInitializer::new(context)
        .property(JsString::from(options.chunk_key.as_str()), chunk_array, Attribute::all())
        .build();
    let _ = context.register_global_property(JsString::from("self"), self_obj, Attribute::all());

    // Flat key: the defaulted property getter stub resolves whole dotted
    // paths as single keys against this object.
    let window = ObjectInitializer::new(context)
        .property(
            JsString::from("navigator.userAgent"),
            JsString::from(options.user_agent.as_str()),
            Attribute::all(),
        )
        .build();
    let _ = context.register_global_property(JsString::from("window"), window, Attribute::all());

    // The comma-chain wrapper assignments must also work when the bundle
    // module is strict, so every prefixed name pre-exists as a writable
    // global.
    for name in bindings {
        let prefixed = format!("{WRAP_PREFIX}{name}");
        let _ = context.register_global_property(
            JsString::from(prefixed.as_str()),
            JsValue::undefined(),
            Attribute::all(),
        );
    }
}

fn register_arithmetic(context: &mut Context, log: Rc<RefCell<OperationLog>>) {
    let _ = context.register_global_builtin_callable(
        JsString::from(LOGGED_ADD),
        2,
        make_arith(log.clone(), ArithOp::Add),
    );
    let _ = context.register_global_builtin_callable(
        JsString::from(LOGGED_SUB),
        2,
        make_arith(log.clone(), ArithOp::Sub),
    );
    let _ = context.register_global_builtin_callable(
        JsString::from(LOGGED_MOD),
        2,
        make_arith(log, ArithOp::Mod),
    );
}

fn register_observability(context: &mut Context, log: Rc<RefCell<OperationLog>>) {
    let get_log = log.clone();
    let get_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let wrapper = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
            let index = args.get_or_undefined(1).to_number(ctx)? as i64;
            let value = args.get_or_undefined(2);
            let raw = match value.as_string() {
                Some(s) => s.to_std_string_lossy(),
                None => value.display().to_string(),
            };
            let char_code = raw.encode_utf16().next().map(u32::from).unwrap_or(0);
            get_log
                .borrow_mut()
                .entries
                .push(LogEntry::Get { wrapper, index, raw, char_code });
            Ok(JsValue::undefined())
        })
    };
    let _ = context.register_global_builtin_callable(JsString::from("_get"), 3, get_fn);

    let miss_log = log.clone();
    let miss_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let binding = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
            let key = args.get_or_undefined(1).to_string(ctx)?.to_std_string_escaped();
            record_miss(&miss_log, &binding, &key);
            Ok(JsValue::undefined())
        })
    };
    let _ = context.register_global_builtin_callable(JsString::from("_miss"), 2, miss_fn);

    let operator_log = log;
    let operator_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let wrapper = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
            let key = args.get_or_undefined(1).to_string(ctx)?.to_std_string_escaped();
            warn!("wrapped callable {wrapper}[{key}] matches no operator literal");
            operator_log
                .borrow_mut()
                .diagnostics
                .push(Diagnostic::UnknownOperator { wrapper, key });
            Ok(JsValue::undefined())
        })
    };
    let _ =
        context.register_global_builtin_callable(JsString::from("_unknownOperator"), 2, operator_fn);
}

#[derive(Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mod,
}

/// The logged equivalents return the genuine JavaScript result while the
/// log records a numeric reading of each operand: numbers as themselves,
/// strings as the character code of their first character (the `Get`
/// convention), anything else as zero.
fn make_arith(log: Rc<RefCell<OperationLog>>, op: ArithOp) -> NativeFunction {
    unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let lhs = args.get_or_undefined(0);
            let rhs = args.get_or_undefined(1);
            let a = numeric_reading(lhs);
            let b = numeric_reading(rhs);
            let entry = match op {
                ArithOp::Add => LogEntry::Add { a, b, result: a + b },
                ArithOp::Sub => LogEntry::Sub { a, b, result: a - b },
                ArithOp::Mod => LogEntry::Mod { a, b, result: a % b },
            };
            log.borrow_mut().entries.push(entry);
            match op {
                ArithOp::Add => lhs.add(rhs, ctx),
                ArithOp::Sub => lhs.sub(rhs, ctx),
                ArithOp::Mod => lhs.rem(rhs, ctx),
            }
        })
    }
}

fn numeric_reading(value: &JsValue) -> f64 {
    match value {
        JsValue::Integer(n) => f64::from(*n),
        JsValue::Rational(n) => *n,
        JsValue::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        JsValue::String(_) => value
            .as_string()
            .and_then(|s| s.to_std_string_lossy().encode_utf16().next())
            .map(f64::from)
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Synthetic dependency resolver: a closed mapping from module id to stub,
/// resolved by table lookup. Unknown ids are diagnosed, never raised.
fn build_importer(
    context: &mut Context,
    log: Rc<RefCell<OperationLog>>,
    hashed: Rc<RefCell<Option<String>>>,
    options: &SandboxOptions,
) -> JsValue {
    let opts = options.clone();
    let resolver_log = log;
    let resolver = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let requested = args.get_or_undefined(0);
            let id = requested.to_number(ctx).unwrap_or(f64::NAN);
            match opts.resolve_module(id) {
                Some(ModuleStub::Hasher) => Ok(hasher_stub(ctx, hashed.clone())),
                Some(ModuleStub::PropertyGetter) => Ok(getter_stub(ctx)),
                Some(ModuleStub::AuthContext) => {
                    Ok(auth_stub(ctx, "default", opts.auth_user_id, "auth module"))
                }
                Some(ModuleStub::AuthContextAlt) => {
                    Ok(auth_stub(ctx, "A", opts.auth_user_id, "auth module (alt)"))
                }
                None => {
                    record_unknown_module(&resolver_log, &requested.display().to_string());
                    Ok(JsValue::undefined())
                }
            }
        })
    };
    let importer = FunctionObjectBuilder::new(context.realm(), resolver)
        .name(JsString::from("require"))
        .length(1)
        .build();

    // Interop helper carried by the registration-slot convention:
    // `n(module)` yields a thunk returning the module.
    let n_helper = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let module = args.get_or_undefined(0).clone();
            let thunk = unsafe {
                NativeFunction::from_closure(move |_this, _args, _ctx| Ok(module.clone()))
            };
            Ok(JsValue::from(
                FunctionObjectBuilder::new(ctx.realm(), thunk)
                    .name(JsString::from("thunk"))
                    .length(0)
                    .build(),
            ))
        })
    };
    let n_fn = FunctionObjectBuilder::new(context.realm(), n_helper)
        .name(JsString::from("n"))
        .length(1)
        .build();
    let _ = importer.set(JsString::from("n"), n_fn, false, context);
    importer.into()
}

/// Forwards to genuine SHA-1 but records the exact digested message; the
/// record travels on the outcome instead of process-global state.
fn hasher_stub(context: &mut Context, hashed: Rc<RefCell<Option<String>>>) -> JsValue {
    let hash_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let message = args.get_or_undefined(0).to_string(ctx)?.to_std_string_escaped();
            let digest = sha1_hex(message.as_bytes());
            *hashed.borrow_mut() = Some(message);
            Ok(JsValue::from(JsString::from(digest.as_str())))
        })
    };
    FunctionObjectBuilder::new(context.realm(), hash_fn)
        .name(JsString::from("sha1"))
        .length(1)
        .build()
        .into()
}

/// `obj[path] ? obj[path] : default`, with whole dotted paths as keys.
fn getter_stub(context: &mut Context) -> JsValue {
    let get_fn = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let target = args.get_or_undefined(0);
            let path = args.get_or_undefined(1).to_string(ctx)?;
            let fallback = args.get_or_undefined(2).clone();
            if let Some(object) = target.as_object() {
                let value = object.get(path, ctx)?;
                if value.to_boolean() {
                    return Ok(value);
                }
            }
            Ok(fallback)
        })
    };
    FunctionObjectBuilder::new(context.realm(), get_fn)
        .name(JsString::from("getProperty"))
        .length(3)
        .build()
        .into()
}

/// Authentication-context stub: one fabricated identity value inside the
/// requested envelope field. Two module ids resolve to the same shape with
/// different envelopes.
fn auth_stub(context: &mut Context, envelope: &str, user_id: i32, label: &str) -> JsValue {
    let identity = ObjectInitializer::new(context)
        .property(JsString::from("getters.auth/authUserId"), user_id, Attribute::all())
        .build();
    let watched_identity = watch_value(context, identity.into(), label);
    let outer = ObjectInitializer::new(context)
        .property(JsString::from(envelope), watched_identity, Attribute::all())
        .build();
    watch_value(context, outer.into(), label)
}

/// Route a stub through the prelude's `_watch` proxy so empty reads surface
/// on the diagnostic stream.
fn watch_value(context: &mut Context, value: JsValue, label: &str) -> JsValue {
    let global = context.global_object().clone();
    let Ok(watch) = global.get(JsString::from("_watch"), context) else {
        return value;
    };
    let Some(watch_fn) = watch.as_callable() else {
        return value;
    };
    watch_fn
        .call(
            &JsValue::undefined(),
            &[value.clone(), JsString::from(label).into()],
            context,
        )
        .unwrap_or(value)
}

/// Read a property, reporting empty/false-like resolutions on the
/// diagnostic stream instead of failing silently.
fn observed_get(
    object: &JsObject,
    key: &str,
    binding: &str,
    log: &Rc<RefCell<OperationLog>>,
    context: &mut Context,
) -> Result<JsValue, ExtractError> {
    let value = object
        .get(JsString::from(key), context)
        .map_err(|err| ExtractError::Parse(format!("read of {binding}[{key:?}] failed: {err}")))?;
    if !value.to_boolean() {
        record_miss(log, binding, key);
    }
    Ok(value)
}

fn as_object(value: JsValue, what: &str) -> Result<JsObject, ExtractError> {
    value
        .as_object()
        .map(|o| o.clone())
        .ok_or_else(|| ExtractError::Parse(format!("{what} is not an object")))
}

fn record_miss(log: &Rc<RefCell<OperationLog>>, binding: &str, key: &str) {
    warn!("binding {binding}[{key:?}] resolved to an empty value");
    log.borrow_mut()
        .diagnostics
        .push(Diagnostic::BindingMiss { binding: binding.to_string(), key: key.to_string() });
}

fn record_unknown_module(log: &Rc<RefCell<OperationLog>>, id: &str) {
    warn!("bundle requested an unknown module {id}");
    log.borrow_mut().diagnostics.push(Diagnostic::UnknownModule { id: id.to_string() });
}
