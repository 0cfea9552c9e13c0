//! Member metadata and invocation
//!
//! Members carry their own bodies as closures. A body receives an
//! `Invocation`: the interpreter it is running under, the receiver (for
//! instance members) and the argument vector. By-reference and output
//! parameters are written back by assigning into `args`.

use std::fmt;
use std::sync::Arc;

use tether_script::ScriptState;

use crate::error::{HostError, HostResult};
use crate::event::HostEvent;
use crate::types::{self, HostType, TypeRef};
use crate::value::{HostObject, HostValue};

/// Member body signature
pub type MethodBody = Arc<dyn Fn(&mut Invocation<'_>) -> HostResult<HostValue> + Send + Sync>;

/// Field read accessor; receives the instance, `None` for static fields
pub type FieldGetter = Arc<dyn Fn(Option<&HostValue>) -> HostResult<HostValue> + Send + Sync>;

/// Field write accessor
pub type FieldSetter = Arc<dyn Fn(Option<&HostValue>, HostValue) -> HostResult<()> + Send + Sync>;

/// Event subscription accessor
pub type EventAccessor =
    Arc<dyn Fn(Option<&HostValue>, HostObject) -> HostResult<()> + Send + Sync>;

/// Member visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Visible to scripts
    #[default]
    Public,
    /// Visible only when the engine exposes non-public members
    NonPublic,
}

/// Script-facing tags on a member
#[derive(Debug, Clone, Default)]
pub struct MemberAttrs {
    /// Never visible to scripts
    pub hidden: bool,
    /// Name scripts use instead of the declared one
    pub script_name: Option<String>,
    /// Visibility
    pub visibility: Visibility,
}

impl MemberAttrs {
    /// Whether scripts may see the member
    pub fn visible(&self, include_non_public: bool) -> bool {
        !self.hidden && (include_non_public || self.visibility == Visibility::Public)
    }
}

/// How an argument is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamMode {
    /// By value
    #[default]
    In,
    /// By reference: read and written back
    Ref,
    /// Output only: not read, written back
    Out,
}

/// Method parameter
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Parameter name
    pub name: String,
    /// Declared type (the array type for params arrays)
    pub ty: TypeRef,
    /// Passing mode
    pub mode: ParamMode,
    /// Default value for optional parameters
    pub default: Option<HostValue>,
    /// Trailing variadic array
    pub is_params: bool,
}

impl ParamInfo {
    /// A by-value parameter
    pub fn new(name: impl Into<String>, ty: &TypeRef) -> Self {
        Self {
            name: name.into(),
            ty: ty.clone(),
            mode: ParamMode::In,
            default: None,
            is_params: false,
        }
    }

    /// Make the parameter optional
    pub fn default(mut self, value: impl Into<HostValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Pass by reference
    pub fn by_ref(mut self) -> Self {
        self.mode = ParamMode::Ref;
        self
    }

    /// Output only
    pub fn out(mut self) -> Self {
        self.mode = ParamMode::Out;
        self
    }

    /// Variadic: `ty` becomes an array of the given element type
    pub fn params(mut self) -> Self {
        self.ty = types::array_of(&self.ty);
        self.is_params = true;
        self
    }

    /// Element type of a params array
    pub fn element_type(&self) -> Option<&TypeRef> {
        if self.is_params {
            self.ty.element()
        } else {
            None
        }
    }
}

/// Method, constructor or delegate signature
#[derive(Clone)]
pub struct MethodInfo {
    /// Declared name
    pub name: String,
    /// Parameters
    pub params: Vec<ParamInfo>,
    /// Return type (`types::void()` for none)
    pub ret: TypeRef,
    /// Static or constructor
    pub is_static: bool,
    /// Script-facing tags
    pub attrs: MemberAttrs,
    /// Implementation; `None` for abstract members
    pub body: Option<MethodBody>,
}

impl MethodInfo {
    /// An abstract instance method
    pub fn new(name: impl Into<String>, ret: &TypeRef) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret: ret.clone(),
            is_static: false,
            attrs: MemberAttrs::default(),
            body: None,
        }
    }

    /// A constructor producing `ty`
    pub fn constructor(ty: &TypeRef) -> Self {
        Self::new(".ctor", ty).as_static()
    }

    /// Append a parameter
    pub fn param(mut self, p: ParamInfo) -> Self {
        self.params.push(p);
        self
    }

    /// Mark as static
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Hide from scripts
    pub fn hidden(mut self) -> Self {
        self.attrs.hidden = true;
        self
    }

    /// Expose under a different name
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.attrs.script_name = Some(name.into());
        self
    }

    /// Mark as non-public
    pub fn non_public(mut self) -> Self {
        self.attrs.visibility = Visibility::NonPublic;
        self
    }

    /// Attach the implementation
    pub fn body(
        mut self,
        body: impl Fn(&mut Invocation<'_>) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    /// Name scripts see
    pub fn exposed_name(&self) -> &str {
        self.attrs.script_name.as_deref().unwrap_or(&self.name)
    }

    /// Returns nothing
    pub fn is_void(&self) -> bool {
        self.ret.kind() == types::TypeKind::Void
    }

    /// Has no implementation
    pub fn is_abstract(&self) -> bool {
        self.body.is_none()
    }

    /// Same parameter types in the same order
    pub fn same_signature(&self, other: &MethodInfo) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.ty.id() == b.ty.id() && a.mode == b.mode)
    }

    /// Run the body
    pub fn invoke(
        &self,
        state: &mut ScriptState,
        this: Option<HostValue>,
        args: Vec<HostValue>,
    ) -> HostResult<Invoked> {
        let body = self.body.as_ref().ok_or_else(|| {
            HostError::exception(
                "System.NotImplementedException",
                format!("{} is abstract", self.name),
            )
        })?;
        let mut inv = Invocation::new(state, this, args);
        let ret = body(&mut inv)?;
        Ok(Invoked {
            ret,
            args: inv.args,
        })
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match p.mode {
                ParamMode::In => {}
                ParamMode::Ref => write!(f, "ref ")?,
                ParamMode::Out => write!(f, "out ")?,
            }
            if p.is_params {
                write!(f, "params ")?;
            }
            write!(f, "{}", p.ty.full_name())?;
        }
        write!(f, "): {}", self.ret.full_name())
    }
}

/// Outcome of running a method body
#[derive(Debug)]
pub struct Invoked {
    /// Return value (`Null` for void)
    pub ret: HostValue,
    /// Arguments after the call, including written-back ref/out values
    pub args: Vec<HostValue>,
}

/// Call frame handed to member bodies
pub struct Invocation<'a> {
    /// Interpreter the call runs under
    pub state: &'a mut ScriptState,
    /// Receiver for instance members
    pub this: Option<HostValue>,
    /// Arguments; ref/out slots are written back from here
    pub args: Vec<HostValue>,
}

impl<'a> Invocation<'a> {
    /// Create a call frame
    pub fn new(state: &'a mut ScriptState, this: Option<HostValue>, args: Vec<HostValue>) -> Self {
        Self { state, this, args }
    }

    /// Argument `i`
    pub fn arg(&self, i: usize) -> HostResult<&HostValue> {
        self.args
            .get(i)
            .ok_or_else(|| HostError::ArgumentError(format!("missing argument {}", i)))
    }

    /// Integral argument `i`
    pub fn arg_i64(&self, i: usize) -> HostResult<i64> {
        let v = self.arg(i)?;
        v.as_i64()
            .ok_or_else(|| HostError::mismatch("integer", v.type_name()))
    }

    /// Numeric argument `i`
    pub fn arg_f64(&self, i: usize) -> HostResult<f64> {
        let v = self.arg(i)?;
        v.as_f64()
            .ok_or_else(|| HostError::mismatch("number", v.type_name()))
    }

    /// String argument `i`; null reads as `None`
    pub fn arg_str(&self, i: usize) -> HostResult<Option<&str>> {
        match self.arg(i)? {
            HostValue::Null => Ok(None),
            HostValue::Str(s) => Ok(Some(s)),
            other => Err(HostError::mismatch("System.String", other.type_name())),
        }
    }

    /// Object argument `i`; null reads as `None`
    pub fn arg_object(&self, i: usize) -> HostResult<Option<&HostObject>> {
        match self.arg(i)? {
            HostValue::Null => Ok(None),
            HostValue::Object(o) => Ok(Some(o)),
            other => Err(HostError::mismatch("object", other.type_name())),
        }
    }

    /// Write back a ref/out argument
    pub fn set_arg(&mut self, i: usize, value: impl Into<HostValue>) -> HostResult<()> {
        let slot = self
            .args
            .get_mut(i)
            .ok_or_else(|| HostError::ArgumentError(format!("missing argument {}", i)))?;
        *slot = value.into();
        Ok(())
    }

    /// Receiver payload as `T`
    pub fn this<T: 'static>(&self) -> HostResult<&T> {
        match &self.this {
            Some(HostValue::Object(o)) => o
                .downcast::<T>()
                .ok_or_else(|| HostError::mismatch(std::any::type_name::<T>(), o.ty().full_name())),
            Some(other) => Err(HostError::mismatch("object", other.type_name())),
            None => Err(HostError::ArgumentError("missing receiver".into())),
        }
    }
}

/// Field
#[derive(Clone)]
pub struct FieldInfo {
    /// Declared name
    pub name: String,
    /// Field type
    pub ty: TypeRef,
    /// Static field
    pub is_static: bool,
    /// Script-facing tags
    pub attrs: MemberAttrs,
    /// Read accessor
    pub getter: FieldGetter,
    /// Write accessor; `None` for read-only fields
    pub setter: Option<FieldSetter>,
}

impl FieldInfo {
    /// A read-only instance field
    pub fn new(
        name: impl Into<String>,
        ty: &TypeRef,
        getter: impl Fn(Option<&HostValue>) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            ty: ty.clone(),
            is_static: false,
            attrs: MemberAttrs::default(),
            getter: Arc::new(getter),
            setter: None,
        }
    }

    /// Make the field writable
    pub fn setter(
        mut self,
        setter: impl Fn(Option<&HostValue>, HostValue) -> HostResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Mark as static
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Hide from scripts
    pub fn hidden(mut self) -> Self {
        self.attrs.hidden = true;
        self
    }

    /// Mark as non-public
    pub fn non_public(mut self) -> Self {
        self.attrs.visibility = Visibility::NonPublic;
        self
    }

    /// Expose under a different name
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.attrs.script_name = Some(name.into());
        self
    }

    /// Name scripts see
    pub fn exposed_name(&self) -> &str {
        self.attrs.script_name.as_deref().unwrap_or(&self.name)
    }
}

/// Property
#[derive(Clone)]
pub struct PropertyInfo {
    /// Declared name
    pub name: String,
    /// Property type
    pub ty: TypeRef,
    /// Static property
    pub is_static: bool,
    /// Script-facing tags
    pub attrs: MemberAttrs,
    /// `get` accessor
    pub getter: Option<MethodBody>,
    /// `set` accessor; receives the new value as `args[0]`
    pub setter: Option<MethodBody>,
}

impl PropertyInfo {
    /// A property without accessors
    pub fn new(name: impl Into<String>, ty: &TypeRef) -> Self {
        Self {
            name: name.into(),
            ty: ty.clone(),
            is_static: false,
            attrs: MemberAttrs::default(),
            getter: None,
            setter: None,
        }
    }

    /// Attach the `get` accessor
    pub fn getter(
        mut self,
        body: impl Fn(&mut Invocation<'_>) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        self.getter = Some(Arc::new(body));
        self
    }

    /// Attach the `set` accessor
    pub fn setter(
        mut self,
        body: impl Fn(&mut Invocation<'_>) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        self.setter = Some(Arc::new(body));
        self
    }

    /// Mark as static
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Hide from scripts
    pub fn hidden(mut self) -> Self {
        self.attrs.hidden = true;
        self
    }

    /// Expose under a different name
    pub fn script_name(mut self, name: impl Into<String>) -> Self {
        self.attrs.script_name = Some(name.into());
        self
    }

    /// Name scripts see
    pub fn exposed_name(&self) -> &str {
        self.attrs.script_name.as_deref().unwrap_or(&self.name)
    }
}

/// Event
#[derive(Clone)]
pub struct EventInfo {
    /// Declared name
    pub name: String,
    /// Delegate type of handlers
    pub handler_type: TypeRef,
    /// Static event
    pub is_static: bool,
    /// Script-facing tags
    pub attrs: MemberAttrs,
    /// Subscribe a handler
    pub add: EventAccessor,
    /// Unsubscribe a handler
    pub remove: EventAccessor,
}

impl EventInfo {
    /// An event with explicit accessors
    pub fn new(
        name: impl Into<String>,
        handler_type: &TypeRef,
        add: impl Fn(Option<&HostValue>, HostObject) -> HostResult<()> + Send + Sync + 'static,
        remove: impl Fn(Option<&HostValue>, HostObject) -> HostResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handler_type: handler_type.clone(),
            is_static: false,
            attrs: MemberAttrs::default(),
            add: Arc::new(add),
            remove: Arc::new(remove),
        }
    }

    /// An instance event stored in a `HostEvent` of the receiver's payload
    pub fn backed_by<T: Send + Sync + 'static>(
        name: impl Into<String>,
        handler_type: &TypeRef,
        event: fn(&T) -> &HostEvent,
    ) -> Self {
        fn payload<T: 'static>(this: Option<&HostValue>) -> HostResult<&T> {
            match this {
                Some(HostValue::Object(o)) => o.downcast::<T>().ok_or_else(|| {
                    HostError::mismatch(std::any::type_name::<T>(), o.ty().full_name())
                }),
                _ => Err(HostError::ArgumentError("missing receiver".into())),
            }
        }
        Self::new(
            name,
            handler_type,
            move |this, handler| {
                event(payload::<T>(this)?).add(handler);
                Ok(())
            },
            move |this, handler| {
                event(payload::<T>(this)?).remove(&handler);
                Ok(())
            },
        )
    }

    /// Mark as static
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Name scripts see
    pub fn exposed_name(&self) -> &str {
        self.attrs.script_name.as_deref().unwrap_or(&self.name)
    }
}

/// Instance or static scope of a member query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Members needing a receiver
    Instance,
    /// Members of the type itself
    Static,
}

/// Result of looking a name up on a type
#[derive(Clone)]
pub enum MemberQuery {
    /// A field
    Field(Arc<FieldInfo>),
    /// A property
    Property(Arc<PropertyInfo>),
    /// All visible methods with the name, most derived first
    Methods(Vec<Arc<MethodInfo>>),
    /// An event
    Event(Arc<EventInfo>),
    /// A nested type
    NestedType(TypeRef),
    /// Nothing with that name
    NotFound,
}

impl MemberQuery {
    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemberQuery::NotFound)
    }
}

impl HostType {
    /// Look `name` up among the members visible to scripts.
    ///
    /// Walks the base chain (and, for interfaces, inherited interfaces).
    /// Fields win over properties, properties over methods, methods over
    /// events; nested types are found in static scope only.
    pub fn query_member(
        self: &Arc<Self>,
        name: &str,
        binding: Binding,
        include_non_public: bool,
    ) -> MemberQuery {
        let wants_static = binding == Binding::Static;
        let scope = self.lookup_scope();
        for ty in &scope {
            let m = ty.members();
            if let Some(f) = m.fields.iter().find(|f| {
                f.is_static == wants_static
                    && f.exposed_name() == name
                    && f.attrs.visible(include_non_public)
            }) {
                return MemberQuery::Field(f.clone());
            }
            if let Some(p) = m.properties.iter().find(|p| {
                p.is_static == wants_static
                    && p.exposed_name() == name
                    && p.attrs.visible(include_non_public)
            }) {
                return MemberQuery::Property(p.clone());
            }
        }

        let mut methods: Vec<Arc<MethodInfo>> = Vec::new();
        for ty in &scope {
            for m in &ty.members().methods {
                if m.is_static == wants_static
                    && m.exposed_name() == name
                    && m.attrs.visible(include_non_public)
                    && !methods.iter().any(|seen| seen.same_signature(m))
                {
                    methods.push(m.clone());
                }
            }
        }
        if !methods.is_empty() {
            return MemberQuery::Methods(methods);
        }

        for ty in &scope {
            if let Some(e) = ty.members().events.iter().find(|e| {
                e.is_static == wants_static
                    && e.exposed_name() == name
                    && e.attrs.visible(include_non_public)
            }) {
                return MemberQuery::Event(e.clone());
            }
            if wants_static {
                if let Some(t) = ty.members().nested.iter().find(|t| t.name() == name) {
                    return MemberQuery::NestedType(t.clone());
                }
            }
        }
        MemberQuery::NotFound
    }

    /// Constructors visible to scripts, in declaration order
    pub fn constructors(&self, include_non_public: bool) -> Vec<Arc<MethodInfo>> {
        self.members()
            .constructors
            .iter()
            .filter(|c| c.attrs.visible(include_non_public))
            .cloned()
            .collect()
    }

    fn lookup_scope(self: &Arc<Self>) -> Vec<TypeRef> {
        let mut scope = self.ancestry();
        if self.kind() == types::TypeKind::Interface {
            let mut i = 0;
            while i < scope.len() {
                let inherited: Vec<TypeRef> = scope[i].interfaces().to_vec();
                for t in inherited {
                    if !scope.iter().any(|s| s.id() == t.id()) {
                        scope.push(t);
                    }
                }
                i += 1;
            }
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TypeBuilder;

    #[test]
    fn test_query_prefers_derived_and_skips_hidden() {
        let base = TypeBuilder::class("Q.Base")
            .method(MethodInfo::new("Run", &types::i32()).body(|_| Ok(HostValue::I32(1))))
            .method(
                MethodInfo::new("Run", &types::i32())
                    .param(ParamInfo::new("x", &types::i32()))
                    .body(|_| Ok(HostValue::I32(2))),
            )
            .method(MethodInfo::new("Secret", &types::void()).hidden())
            .build();
        let derived = TypeBuilder::class("Q.Derived")
            .base(&base)
            .method(MethodInfo::new("Run", &types::i32()).body(|_| Ok(HostValue::I32(3))))
            .build();

        match derived.query_member("Run", Binding::Instance, false) {
            MemberQuery::Methods(ms) => {
                assert_eq!(ms.len(), 2);
                assert!(ms[0].params.is_empty());
                assert_eq!(ms[1].params.len(), 1);
            }
            _ => panic!("expected methods"),
        }
        assert!(derived.query_member("Secret", Binding::Instance, false).is_not_found());
        assert!(derived.query_member("Run", Binding::Static, false).is_not_found());
    }

    #[test]
    fn test_script_name_and_visibility() {
        let ty = TypeBuilder::class("Q.Named")
            .method(MethodInfo::new("InternalName", &types::void()).script_name("nice"))
            .method(MethodInfo::new("Guarded", &types::void()).non_public())
            .build();
        assert!(!ty.query_member("nice", Binding::Instance, false).is_not_found());
        assert!(ty.query_member("InternalName", Binding::Instance, false).is_not_found());
        assert!(ty.query_member("Guarded", Binding::Instance, false).is_not_found());
        assert!(!ty.query_member("Guarded", Binding::Instance, true).is_not_found());
    }

    #[test]
    fn test_invoke_writes_back_out_args() {
        let m = MethodInfo::new("TryParse", &types::boolean())
            .param(ParamInfo::new("text", &types::string()))
            .param(ParamInfo::new("value", &types::i32()).out())
            .as_static()
            .body(|inv| {
                let parsed = inv.arg_str(0)?.and_then(|s| s.parse::<i32>().ok());
                inv.set_arg(1, parsed.unwrap_or(0))?;
                Ok(HostValue::Bool(parsed.is_some()))
            });
        let mut state = ScriptState::new();
        let out = m
            .invoke(&mut state, None, vec!["42".into(), HostValue::Null])
            .unwrap();
        assert_eq!(out.ret.as_bool(), Some(true));
        assert_eq!(out.args[1].as_i64(), Some(42));
    }

    #[test]
    fn test_abstract_invoke_fails() {
        let m = MethodInfo::new("F", &types::void());
        let mut state = ScriptState::new();
        assert!(m.invoke(&mut state, None, vec![]).is_err());
    }
}
