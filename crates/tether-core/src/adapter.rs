//! Adapter type generator
//!
//! Lets script values stand in for host contracts:
//! - a table implementing a host interface
//! - a table subclassing a non-sealed host class (`make_object`)
//! - a function used as a delegate
//!
//! For each target type a descriptor is synthesized once: a generated host
//! type whose members forward into the script value, plus the return shape
//! of every forwarded method so results can be coerced back. Instances
//! share the descriptor and only hold the pinned table or function.
//!
//! Forwarded calls push the table (as `self`) and the non-out arguments,
//! run a protected call and read the results back in order: the return
//! value first (unless void), then one value per ref/out parameter. Missing
//! or nil results become the zero value of the slot type.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tether_script::{ScriptError, ScriptState, ScriptType, Value};
use tether_sdk::{
    Delegate, HostError, HostObject, HostResult, HostTypeId, HostValue, Invocation, MethodBody,
    MethodInfo, ParamMode, PropertyInfo, ScriptRef, ScriptRefKind, TypeBuilder, TypeKind, TypeRef,
};

use crate::coercion::{coerce, zero_value};
use crate::error::{BridgeError, Fault, FaultResult};
use crate::logging;
use crate::pool::pool;
use crate::translator::Translator;

/// Table field holding the host object built by `make_object`
pub const BACKING_FIELD: &str = "__object";

/// Result shape of one forwarded method
pub struct ReturnSignature {
    /// Method name looked up in the script table
    pub method: String,
    /// Declared return type
    pub ret: TypeRef,
    /// Passing mode of every parameter
    pub modes: Vec<ParamMode>,
    /// Ref and out parameters, by position, with their types
    pub by_ref: Vec<(usize, TypeRef)>,
    fallback: Option<MethodBody>,
}

impl ReturnSignature {
    fn of(method: &MethodInfo, fallback: Option<MethodBody>) -> Self {
        Self {
            method: method.name.clone(),
            ret: method.ret.clone(),
            modes: method.params.iter().map(|p| p.mode).collect(),
            by_ref: method
                .params
                .iter()
                .enumerate()
                .filter(|(_, p)| p.mode != ParamMode::In)
                .map(|(i, p)| (i, p.ty.clone()))
                .collect(),
            fallback,
        }
    }

    /// Whether a base implementation runs when the table lacks the method
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Generated adapter type for one interface, class or delegate
pub struct AdapterDescriptor {
    /// Requested type
    pub target: TypeRef,
    /// Type of adapter instances; the target itself for delegates
    pub generated: TypeRef,
    /// One entry per forwarded method
    pub signatures: Vec<Arc<ReturnSignature>>,
}

/// Payload of table-backed adapter instances
pub struct AdapterInstance {
    table: RwLock<Option<ScriptRef>>,
    base: Option<HostObject>,
}

impl AdapterInstance {
    /// Backing table, `None` once detached
    pub fn table(&self) -> Option<ScriptRef> {
        self.table.read().clone()
    }

    /// Base class object that non-overridden members run against
    pub fn base(&self) -> Option<&HostObject> {
        self.base.as_ref()
    }

    fn detach(&self) -> Option<ScriptRef> {
        self.table.write().take()
    }
}

/// The adapter payload of `value`, if it is a table-backed adapter
pub fn adapter_instance(value: &HostValue) -> Option<&AdapterInstance> {
    value.as_object()?.downcast::<AdapterInstance>()
}

/// Cache of synthesized adapter types
#[derive(Default)]
pub struct AdapterGenerator {
    descriptors: DashMap<HostTypeId, Arc<AdapterDescriptor>>,
}

impl AdapterGenerator {
    /// Create an empty generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for `target`, synthesized on first request
    pub fn descriptor(&self, target: &TypeRef) -> Arc<AdapterDescriptor> {
        if let Some(hit) = self.descriptors.get(&target.id()) {
            return hit.clone();
        }
        self.descriptors
            .entry(target.id())
            .or_insert_with(|| {
                let desc = synthesize(target);
                logging::log_adapter_built(target.full_name(), desc.signatures.len());
                Arc::new(desc)
            })
            .clone()
    }

    /// Number of synthesized types
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when nothing was synthesized yet
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Adapt the table or function at `idx` to `ty`
    pub fn instantiate(
        &self,
        tr: &Translator,
        state: &mut ScriptState,
        idx: i32,
        ty: &TypeRef,
    ) -> FaultResult<HostValue> {
        let idx = state.abs_index(idx);
        match (ty.kind(), state.type_at(idx)) {
            (TypeKind::Delegate, ScriptType::Function) => {
                let function = tr.pin(state, idx, ScriptRefKind::Function);
                Ok(HostValue::Object(self.delegate_for(ty, function)?))
            }
            (TypeKind::Interface | TypeKind::Class, ScriptType::Table) => {
                if let Some(existing) = backing_object(tr, state, idx) {
                    if existing.is_instance_of(ty) {
                        return Ok(existing);
                    }
                }
                if ty.kind() == TypeKind::Class {
                    return Err(coercion_error(state, idx, ty));
                }
                let table = tr.pin(state, idx, ScriptRefKind::Table);
                Ok(HostValue::Object(self.adapt_table(state, ty, table)?))
            }
            _ => Err(coercion_error(state, idx, ty)),
        }
    }

    /// Delegate of type `ty` forwarding to a pinned script function
    pub fn delegate_for(&self, ty: &TypeRef, function: ScriptRef) -> HostResult<HostObject> {
        let desc = self.descriptor(ty);
        let sig = desc
            .signatures
            .first()
            .cloned()
            .ok_or_else(|| HostError::mismatch("delegate type", ty.full_name()))?;
        let origin = function.clone();
        let body: MethodBody = Arc::new(move |inv: &mut Invocation<'_>| {
            forward_to_function(inv, &function, &sig)
        });
        Ok(HostObject::new(Delegate::forwarding(body, origin), &desc.generated))
    }

    /// Subclass or implement `ty` with the table at `idx`.
    ///
    /// The table's `__object` field is set to the new instance, so later
    /// conversions of the same table return it.
    pub fn make_object(
        &self,
        tr: &Translator,
        state: &mut ScriptState,
        idx: i32,
        ty: &TypeRef,
    ) -> FaultResult<HostValue> {
        let idx = state.abs_index(idx);
        if state.type_at(idx) != ScriptType::Table {
            return Err(coercion_error(state, idx, ty));
        }
        let adaptable = match ty.kind() {
            TypeKind::Interface => true,
            TypeKind::Class => !ty.is_sealed(),
            _ => false,
        };
        if !adaptable {
            return Err(HostError::ArgumentError(format!(
                "{} cannot be implemented by a script table",
                ty.full_name()
            ))
            .into());
        }
        let table = tr.pin(state, idx, ScriptRefKind::Table);
        let value = HostValue::Object(self.adapt_table(state, ty, table)?);
        tr.push_value(state, &value)?;
        state.set_field(idx, BACKING_FIELD)?;
        Ok(value)
    }

    /// Detach the table at `idx` from the object `make_object` built for it
    pub fn free_object(
        &self,
        tr: &Translator,
        state: &mut ScriptState,
        idx: i32,
    ) -> FaultResult<bool> {
        let idx = state.abs_index(idx);
        let Some(value) = backing_object(tr, state, idx) else {
            return Ok(false);
        };
        if let Some(instance) = adapter_instance(&value) {
            instance.detach();
        }
        state.push_nil();
        state.set_field(idx, BACKING_FIELD)?;
        Ok(true)
    }

    fn adapt_table(
        &self,
        state: &mut ScriptState,
        ty: &TypeRef,
        table: ScriptRef,
    ) -> HostResult<HostObject> {
        let desc = self.descriptor(ty);
        let base = match ty.kind() {
            TypeKind::Class => {
                let ctor = ty
                    .constructors(true)
                    .into_iter()
                    .find(|c| c.params.is_empty() && !c.is_abstract());
                match ctor {
                    Some(c) => c.invoke(state, None, Vec::new())?.ret.as_object().cloned(),
                    None => None,
                }
            }
            _ => None,
        };
        let instance = AdapterInstance {
            table: RwLock::new(Some(table)),
            base,
        };
        Ok(HostObject::new(instance, &desc.generated))
    }
}

/// Host object stored in the `__object` field of the table at `idx`
pub fn backing_object(tr: &Translator, state: &mut ScriptState, idx: i32) -> Option<HostValue> {
    let Value::Table(t) = state.value_at(idx) else {
        return None;
    };
    let field = t.raw_get_str(BACKING_FIELD);
    if field.is_nil() {
        return None;
    }
    state.push_value(field);
    let found = tr.object_at(state, -1).ok().flatten();
    state.pop(1);
    found
}

fn coercion_error(state: &ScriptState, idx: i32, ty: &TypeRef) -> Fault {
    BridgeError::Coercion {
        target: "adapter".to_string(),
        expected: ty.full_name().to_string(),
        found: state.type_at(idx).name().to_string(),
    }
    .into()
}

// ============================================================================
// Synthesis
// ============================================================================

fn synthesize(target: &TypeRef) -> AdapterDescriptor {
    match target.kind() {
        TypeKind::Delegate => {
            let signatures = target
                .delegate_signature()
                .map(|sig| vec![Arc::new(ReturnSignature::of(sig, None))])
                .unwrap_or_default();
            AdapterDescriptor {
                target: target.clone(),
                generated: target.clone(),
                signatures,
            }
        }
        TypeKind::Interface => {
            let mut builder = TypeBuilder::class(&format!("{}$Adapter", target.full_name()))
                .implements(target)
                .sealed();
            let mut signatures = Vec::new();
            let mut seen: Vec<Arc<MethodInfo>> = Vec::new();
            for iface in interface_closure(target) {
                for m in &iface.members().methods {
                    if m.is_static || seen.iter().any(|s| s.name == m.name && s.same_signature(m)) {
                        continue;
                    }
                    seen.push(m.clone());
                    let (forward, sig) = forwarding_method(m, None);
                    builder = builder.method(forward);
                    signatures.push(sig);
                }
                for p in &iface.members().properties {
                    if !p.is_static {
                        builder = builder.property(forwarding_property(p));
                    }
                }
            }
            AdapterDescriptor {
                target: target.clone(),
                generated: builder.build(),
                signatures,
            }
        }
        _ => {
            let mut builder = TypeBuilder::class(&format!("{}$Adapter", target.full_name()))
                .base(target)
                .sealed();
            let mut signatures = Vec::new();
            let mut seen: Vec<Arc<MethodInfo>> = Vec::new();
            for ty in target.ancestry() {
                for m in &ty.members().methods {
                    if m.is_static
                        || m.attrs.hidden
                        || seen.iter().any(|s| s.name == m.name && s.same_signature(m))
                    {
                        continue;
                    }
                    seen.push(m.clone());
                    let (forward, sig) = forwarding_method(m, m.body.clone());
                    builder = builder.method(forward);
                    signatures.push(sig);
                }
            }
            AdapterDescriptor {
                target: target.clone(),
                generated: builder.build(),
                signatures,
            }
        }
    }
}

fn interface_closure(target: &TypeRef) -> Vec<TypeRef> {
    let mut all = vec![target.clone()];
    let mut i = 0;
    while i < all.len() {
        let inherited = all[i].interfaces().to_vec();
        for t in inherited {
            if !all.iter().any(|s| s.id() == t.id()) {
                all.push(t);
            }
        }
        i += 1;
    }
    all
}

fn forwarding_method(
    method: &MethodInfo,
    fallback: Option<MethodBody>,
) -> (MethodInfo, Arc<ReturnSignature>) {
    let sig = Arc::new(ReturnSignature::of(method, fallback));
    let captured = sig.clone();
    let mut forward = method.clone();
    forward.body = Some(Arc::new(move |inv: &mut Invocation<'_>| {
        forward_to_table(inv, &captured)
    }));
    (forward, sig)
}

fn forwarding_property(p: &PropertyInfo) -> PropertyInfo {
    let name = p.name.clone();
    let ty = p.ty.clone();
    let mut forward = PropertyInfo::new(&p.name, &p.ty)
        .getter(move |inv| read_table_field(inv, &name, &ty));
    if p.setter.is_some() {
        let name = p.name.clone();
        forward = forward.setter(move |inv| write_table_field(inv, &name));
    }
    forward
}

// ============================================================================
// Forwarding
// ============================================================================

fn translator_for(state: &ScriptState) -> HostResult<Arc<Translator>> {
    pool()
        .find(state.id())
        .ok_or_else(|| HostError::ArgumentError(format!("no bridge attached to {}", state.id())))
}

fn script_failure(tr: &Translator, state: &mut ScriptState, err: ScriptError) -> HostError {
    state.push_value(err.value());
    let exc = tr.exception_at(state, -1);
    state.pop(1);
    exc.into_host_error()
}

fn receiver(inv: &Invocation<'_>, member: &str) -> HostResult<(Option<ScriptRef>, Option<HostObject>)> {
    let instance = inv.this::<AdapterInstance>().map_err(|_| {
        HostError::ArgumentError(format!("{} called without an adapter receiver", member))
    })?;
    Ok((instance.table(), instance.base.clone()))
}

fn forward_to_table(inv: &mut Invocation<'_>, sig: &ReturnSignature) -> HostResult<HostValue> {
    let (table, base) = receiver(inv, &sig.method)?;
    let this = inv.this.clone();
    let tr = translator_for(&*inv.state)?;
    let state: &mut ScriptState = &mut *inv.state;
    let args = &mut inv.args;

    let top = state.top();
    let outcome = match table {
        Some(table) => call_table_method(&tr, state, &table, sig, args),
        None => Ok(None),
    };
    state.set_top(top);
    if let Some(ret) = outcome? {
        return Ok(ret);
    }

    match &sig.fallback {
        Some(body) => {
            let target = base.map(HostValue::Object).or(this);
            let mut base_inv = Invocation::new(state, target, std::mem::take(args));
            let ret = body(&mut base_inv);
            *args = base_inv.args;
            ret
        }
        None => Err(HostError::exception(
            "System.MissingMethodException",
            format!("script table does not implement {}", sig.method),
        )),
    }
}

/// `None` when the table has no function under the method name
fn call_table_method(
    tr: &Translator,
    state: &mut ScriptState,
    table: &ScriptRef,
    sig: &ReturnSignature,
    args: &mut [HostValue],
) -> HostResult<Option<HostValue>> {
    table.push(state)?;
    let table_idx = state.top();
    let kind = state
        .get_field(table_idx, &sig.method)
        .map_err(|e| script_failure(tr, state, e))?;
    if kind != ScriptType::Function {
        return Ok(None);
    }
    state.push_copy(table_idx);
    invoke_script(tr, state, 1, sig, args).map(Some)
}

fn forward_to_function(
    inv: &mut Invocation<'_>,
    function: &ScriptRef,
    sig: &ReturnSignature,
) -> HostResult<HostValue> {
    let tr = translator_for(&*inv.state)?;
    let state: &mut ScriptState = &mut *inv.state;
    let top = state.top();
    let outcome = function
        .push(state)
        .and_then(|_| invoke_script(&tr, state, 0, sig, &mut inv.args));
    state.set_top(top);
    outcome
}

/// Call the function sitting below `leading` already pushed values
fn invoke_script(
    tr: &Translator,
    state: &mut ScriptState,
    leading: usize,
    sig: &ReturnSignature,
    args: &mut [HostValue],
) -> HostResult<HostValue> {
    let below = state.top() - leading as i32 - 1;
    let mut nargs = leading;
    for (i, mode) in sig.modes.iter().enumerate() {
        if *mode == ParamMode::Out {
            continue;
        }
        let arg = args.get(i).cloned().unwrap_or_default();
        tr.push_value(state, &arg).map_err(Fault::into_host_error)?;
        nargs += 1;
    }
    if state.pcall(nargs, None, 0).is_err() {
        let exc = tr.exception_at(state, -1);
        return Err(exc.into_host_error());
    }

    let last = state.top();
    let mut next = below + 1;
    let ret = if sig.ret.kind() == TypeKind::Void {
        HostValue::Null
    } else {
        let value = result_value(tr, state, next, last, &sig.ret)?;
        next += 1;
        value
    };
    for (i, ty) in &sig.by_ref {
        let value = result_value(tr, state, next, last, ty)?;
        next += 1;
        if let Some(slot) = args.get_mut(*i) {
            *slot = value;
        }
    }
    Ok(ret)
}

fn result_value(
    tr: &Translator,
    state: &mut ScriptState,
    idx: i32,
    last: i32,
    ty: &TypeRef,
) -> HostResult<HostValue> {
    if idx > last || state.is_none_or_nil(idx) {
        return zero_value(state, ty);
    }
    match coerce(tr, state, idx, ty) {
        Some(result) => result.map_err(Fault::into_host_error),
        None => Err(HostError::mismatch(
            ty.full_name(),
            state.type_at(idx).name(),
        )),
    }
}

fn read_table_field(inv: &mut Invocation<'_>, name: &str, ty: &TypeRef) -> HostResult<HostValue> {
    let (table, _) = receiver(inv, name)?;
    let Some(table) = table else {
        return zero_value(&mut *inv.state, ty);
    };
    let tr = translator_for(&*inv.state)?;
    let state: &mut ScriptState = &mut *inv.state;
    let top = state.top();
    let outcome = table.push(state).and_then(|_| {
        state
            .get_field(top + 1, name)
            .map_err(|e| script_failure(&tr, state, e))?;
        result_value(&tr, state, top + 2, top + 2, ty)
    });
    state.set_top(top);
    outcome
}

fn write_table_field(inv: &mut Invocation<'_>, name: &str) -> HostResult<HostValue> {
    let (table, _) = receiver(inv, name)?;
    let Some(table) = table else {
        return Ok(HostValue::Null);
    };
    let value = inv.arg(0)?.clone();
    let tr = translator_for(&*inv.state)?;
    let state: &mut ScriptState = &mut *inv.state;
    let top = state.top();
    let outcome = table.push(state).and_then(|_| {
        tr.push_value(state, &value).map_err(Fault::into_host_error)?;
        state
            .set_field(top + 1, name)
            .map_err(|e| script_failure(&tr, state, e))
    });
    state.set_top(top);
    outcome.map(|_| HostValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_script::FunctionRef;
    use tether_sdk::{types, ParamInfo, TypeCatalog};

    use crate::config::BridgeOptions;

    struct Attached {
        state: ScriptState,
        tr: Arc<Translator>,
    }

    impl Attached {
        fn new() -> Self {
            let mut state = ScriptState::new();
            let tr = Arc::new(Translator::new(
                state.id(),
                BridgeOptions::default(),
                Arc::new(TypeCatalog::new()),
            ));
            tr.install(&mut state).unwrap();
            pool().add(tr.clone());
            Self { state, tr }
        }
    }

    impl Drop for Attached {
        fn drop(&mut self) {
            pool().remove(self.state.id());
        }
    }

    fn doubler() -> TypeRef {
        TypeBuilder::interface("Ad.IDoubler")
            .method(
                MethodInfo::new("f", &types::i32()).param(ParamInfo::new("x", &types::i32())),
            )
            .build()
    }

    fn table_with(state: &mut ScriptState, name: &str, factor: i64) {
        let t = state.new_table();
        t.raw_set(
            Value::from(name),
            Value::Function(FunctionRef::new(move |s| {
                let x = s.to_integer(2).unwrap_or(0);
                s.push_integer(x * factor);
                Ok(1)
            })),
        );
    }

    #[test]
    fn test_interface_forwarding() {
        let mut a = Attached::new();
        let iface = doubler();
        table_with(&mut a.state, "f", 2);
        let obj = a.tr.adapters().instantiate(&a.tr, &mut a.state, -1, &iface).unwrap();
        assert!(obj.is_instance_of(&iface));
        let out = obj
            .as_object()
            .unwrap()
            .call(&mut a.state, "f", vec![HostValue::I32(21)])
            .unwrap();
        assert_eq!(out.as_i64(), Some(42));
        assert_eq!(a.state.top(), 1);
    }

    #[test]
    fn test_descriptor_built_once_instances_independent() {
        let mut a = Attached::new();
        let iface = doubler();
        let d1 = a.tr.adapters().descriptor(&iface);
        let d2 = a.tr.adapters().descriptor(&iface);
        assert!(Arc::ptr_eq(&d1, &d2));
        assert_eq!(d1.generated.id(), d2.generated.id());

        table_with(&mut a.state, "f", 2);
        let x2 = a.tr.adapters().instantiate(&a.tr, &mut a.state, -1, &iface).unwrap();
        table_with(&mut a.state, "f", 3);
        let x3 = a.tr.adapters().instantiate(&a.tr, &mut a.state, -1, &iface).unwrap();
        assert_eq!(x2.as_object().unwrap().ty().id(), x3.as_object().unwrap().ty().id());
        let call = |state: &mut ScriptState, v: &HostValue| {
            v.as_object()
                .unwrap()
                .call(state, "f", vec![HostValue::I32(10)])
                .unwrap()
                .as_i64()
        };
        assert_eq!(call(&mut a.state, &x2), Some(20));
        assert_eq!(call(&mut a.state, &x3), Some(30));
        assert_eq!(a.tr.adapters().len(), 1);
    }

    #[test]
    fn test_missing_method_without_base_raises() {
        let mut a = Attached::new();
        let iface = doubler();
        a.state.new_table();
        let obj = a.tr.adapters().instantiate(&a.tr, &mut a.state, -1, &iface).unwrap();
        let err = obj
            .as_object()
            .unwrap()
            .call(&mut a.state, "f", vec![HostValue::I32(1)])
            .unwrap_err();
        assert!(err.to_string().contains("does not implement f"));
    }

    #[test]
    fn test_class_adapter_falls_back_to_base() {
        let mut a = Attached::new();
        let builder = TypeBuilder::class("Ad.Greeter");
        let me = builder.ty();
        let greeter = builder
            .constructor(
                MethodInfo::constructor(&me)
                    .body(move |_| Ok(HostValue::Object(HostObject::new((), &me)))),
            )
            .method(MethodInfo::new("Greet", &types::string()).body(|_| Ok("hello".into())))
            .method(MethodInfo::new("Name", &types::string()).body(|_| Ok("base".into())))
            .build();
        let t = a.state.new_table();
        t.raw_set(
            Value::from("Name"),
            Value::Function(FunctionRef::new(|s| {
                s.push_string("script");
                Ok(1)
            })),
        );
        let obj = a.tr.adapters().make_object(&a.tr, &mut a.state, -1, &greeter).unwrap();
        let o = obj.as_object().unwrap();
        assert!(obj.is_instance_of(&greeter));
        assert_eq!(o.call(&mut a.state, "Name", vec![]).unwrap().as_str(), Some("script"));
        assert_eq!(o.call(&mut a.state, "Greet", vec![]).unwrap().as_str(), Some("hello"));

        assert!(backing_object(&a.tr, &mut a.state, -1).is_some());
        assert!(a.tr.adapters().free_object(&a.tr, &mut a.state, -1).unwrap());
        assert!(backing_object(&a.tr, &mut a.state, -1).is_none());
        assert_eq!(o.call(&mut a.state, "Name", vec![]).unwrap().as_str(), Some("base"));
    }

    #[test]
    fn test_delegate_with_out_results() {
        let mut a = Attached::new();
        let parse = TypeBuilder::delegate(
            "Ad.TryParse",
            MethodInfo::new("Invoke", &types::boolean())
                .param(ParamInfo::new("s", &types::string()))
                .param(ParamInfo::new("v", &types::i32()).out()),
        )
        .build();
        a.state.push_function(FunctionRef::new(|s| {
            let n = s.to_str(1).and_then(|t| t.parse::<i64>().ok());
            s.push_boolean(n.is_some());
            match n {
                Some(n) => s.push_integer(n),
                None => s.push_nil(),
            }
            Ok(2)
        }));
        let f = a.tr.pin(&mut a.state, -1, ScriptRefKind::Function);
        let d = a.tr.adapters().delegate_for(&parse, f).unwrap();
        let delegate = d.downcast::<Delegate>().unwrap();

        let mut inv = Invocation::new(&mut a.state, None, vec!["17".into(), HostValue::Null]);
        assert_eq!(delegate.invoke_with(&mut inv).unwrap().as_bool(), Some(true));
        assert_eq!(inv.args[1].as_i64(), Some(17));

        let mut inv = Invocation::new(&mut a.state, None, vec!["x".into(), HostValue::Null]);
        assert_eq!(delegate.invoke_with(&mut inv).unwrap().as_bool(), Some(false));
        assert_eq!(inv.args[1].as_i64(), Some(0));
    }

    #[test]
    fn test_script_error_reaches_host_with_message() {
        let mut a = Attached::new();
        let iface = doubler();
        let t = a.state.new_table();
        t.raw_set(
            Value::from("f"),
            Value::Function(FunctionRef::new(|s| Err(s.error_message("nope")))),
        );
        let obj = a.tr.adapters().instantiate(&a.tr, &mut a.state, -1, &iface).unwrap();
        let err = obj
            .as_object()
            .unwrap()
            .call(&mut a.state, "f", vec![HostValue::I32(1)])
            .unwrap_err();
        assert!(matches!(err, HostError::Script { .. }));
        assert!(err.to_string().ends_with("nope"));
        assert_eq!(a.state.top(), 1);
    }
}
