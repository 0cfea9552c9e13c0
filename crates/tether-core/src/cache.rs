//! Member cache
//!
//! Reflection results keyed by `(type, scope, name)`. The first lookup of a
//! name walks the type (instance members, then static members, then
//! extension methods); later lookups are a single map lookup. Names that
//! resolve to nothing are cached too, as an invalid-member thunk, and are
//! reflected again once the catalog has gained extension methods.

use std::sync::Arc;

use dashmap::DashMap;
use tether_sdk::{
    Binding, EventInfo, FieldInfo, HostTypeId, HostValue, MemberQuery, MethodInfo, PropertyInfo,
    TypeCatalog, TypeRef,
};

use crate::logging;

/// How a method thunk finds its receiver and arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThunkBinding {
    /// Receiver is the first argument
    Instance,
    /// Called through the type proxy
    Static,
    /// Static member reached through an instance; rejected if an instance is passed
    ImplicitStatic,
    /// Static extension method whose first parameter is the receiver
    Extension,
    /// Constructor group
    Constructor,
    /// Name that resolved to nothing; raises when called
    Invalid,
}

/// A callable method group as seen from scripts
pub struct MethodThunk {
    /// Name the script used
    pub name: String,
    /// Type the group was found on
    pub declaring: TypeRef,
    /// Overloads in declaration order
    pub candidates: Vec<Arc<MethodInfo>>,
    /// Receiver convention
    pub binding: ThunkBinding,
    /// Receiver fixed at creation (signature-selected methods)
    pub bound: Option<HostValue>,
}

impl MethodThunk {
    /// A thunk over `candidates`
    pub fn new(
        name: &str,
        declaring: &TypeRef,
        candidates: Vec<Arc<MethodInfo>>,
        binding: ThunkBinding,
    ) -> Self {
        Self {
            name: name.to_string(),
            declaring: declaring.clone(),
            candidates,
            binding,
            bound: None,
        }
    }

    /// The sentinel for a name with no member
    pub fn invalid(name: &str, declaring: &TypeRef) -> Self {
        Self::new(name, declaring, Vec::new(), ThunkBinding::Invalid)
    }

    /// Fix the receiver
    pub fn bind(mut self, receiver: Option<HostValue>) -> Self {
        self.bound = receiver;
        self
    }
}

/// Cached lookup result
#[derive(Clone)]
pub enum CachedMember {
    /// Field (instance or static)
    Field(Arc<FieldInfo>),
    /// Property (instance or static)
    Property(Arc<PropertyInfo>),
    /// Event
    Event(Arc<EventInfo>),
    /// Method group
    Method(Arc<MethodThunk>),
    /// Nested type
    NestedType(TypeRef),
    /// Nothing under that name
    Invalid(Arc<MethodThunk>),
}

impl CachedMember {
    fn describe(&self) -> &'static str {
        match self {
            CachedMember::Field(_) => "field",
            CachedMember::Property(_) => "property",
            CachedMember::Event(_) => "event",
            CachedMember::Method(_) => "method",
            CachedMember::NestedType(_) => "nested type",
            CachedMember::Invalid(_) => "none",
        }
    }
}

type CacheKey = (HostTypeId, Binding, String);

#[derive(Clone)]
struct CacheEntry {
    member: CachedMember,
    /// Catalog extension count when `member` was reflected
    extensions: usize,
}

impl CacheEntry {
    fn is_current(&self, catalog: &TypeCatalog) -> bool {
        !matches!(self.member, CachedMember::Invalid(_))
            || self.extensions == catalog.extension_count()
    }
}

/// Per-instance member cache
#[derive(Default)]
pub struct MemberCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemberCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry, or reflect and cache
    pub fn lookup(
        &self,
        ty: &TypeRef,
        name: &str,
        binding: Binding,
        include_non_public: bool,
        catalog: &TypeCatalog,
    ) -> CachedMember {
        let key = (ty.id(), binding, name.to_string());
        if let Some(hit) = self.entries.get(&key) {
            if hit.is_current(catalog) {
                return hit.member.clone();
            }
        }
        let extensions = catalog.extension_count();
        let found = reflect(ty, name, binding, include_non_public, catalog);
        logging::log_member_miss(ty.full_name(), name, found.describe());
        let mut entry = self.entries.entry(key).or_insert_with(|| CacheEntry {
            member: found.clone(),
            extensions,
        });
        if !entry.is_current(catalog) {
            *entry = CacheEntry {
                member: found,
                extensions,
            };
        }
        entry.member.clone()
    }

    /// Number of cached names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn reflect(
    ty: &TypeRef,
    name: &str,
    binding: Binding,
    include_non_public: bool,
    catalog: &TypeCatalog,
) -> CachedMember {
    let direct = match ty.query_member(name, binding, include_non_public) {
        MemberQuery::NotFound => None,
        q => Some(from_query(ty, name, q, binding_for(binding))),
    };
    if let Some(found) = direct {
        return found;
    }
    if binding == Binding::Static {
        return CachedMember::Invalid(Arc::new(MethodThunk::invalid(name, ty)));
    }

    match ty.query_member(name, Binding::Static, include_non_public) {
        MemberQuery::NotFound => {}
        // nested types are only reachable through the type proxy
        MemberQuery::NestedType(_) => {}
        q => return from_query(ty, name, q, ThunkBinding::ImplicitStatic),
    }

    let extensions = catalog.extensions_for(ty, name);
    if !extensions.is_empty() {
        return CachedMember::Method(Arc::new(MethodThunk::new(
            name,
            ty,
            extensions,
            ThunkBinding::Extension,
        )));
    }
    CachedMember::Invalid(Arc::new(MethodThunk::invalid(name, ty)))
}

fn binding_for(binding: Binding) -> ThunkBinding {
    match binding {
        Binding::Instance => ThunkBinding::Instance,
        Binding::Static => ThunkBinding::Static,
    }
}

fn from_query(ty: &TypeRef, name: &str, q: MemberQuery, methods: ThunkBinding) -> CachedMember {
    match q {
        MemberQuery::Field(f) => CachedMember::Field(f),
        MemberQuery::Property(p) => CachedMember::Property(p),
        MemberQuery::Event(e) => CachedMember::Event(e),
        MemberQuery::NestedType(t) => CachedMember::NestedType(t),
        MemberQuery::Methods(ms) => {
            CachedMember::Method(Arc::new(MethodThunk::new(name, ty, ms, methods)))
        }
        MemberQuery::NotFound => CachedMember::Invalid(Arc::new(MethodThunk::invalid(name, ty))),
    }
}
