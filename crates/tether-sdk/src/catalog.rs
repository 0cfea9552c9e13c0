//! Type catalog
//!
//! Maps full type names to types and keeps the extension methods scripts
//! can call as if they were instance members.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{HostError, HostResult};
use crate::members::MethodInfo;
use crate::types::{HostType, TypeRef};

/// Registry of host types and extension methods
#[derive(Default)]
pub struct TypeCatalog {
    types: DashMap<String, TypeRef>,
    extensions: RwLock<Vec<Arc<MethodInfo>>>,
}

impl TypeCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type (and its nested types) under their full names
    pub fn register(&self, ty: &TypeRef) {
        self.types.insert(ty.full_name().to_string(), ty.clone());
        for nested in &ty.members().nested {
            self.types.insert(
                format!("{}+{}", ty.full_name(), nested.name()),
                nested.clone(),
            );
        }
    }

    /// Look a type up by full name
    pub fn get(&self, full_name: &str) -> Option<TypeRef> {
        self.types.get(full_name).map(|t| t.clone())
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when no type is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register a static method whose first parameter is the receiver
    pub fn add_extension(&self, method: MethodInfo) -> HostResult<()> {
        if !method.is_static || method.params.is_empty() {
            return Err(HostError::ArgumentError(format!(
                "extension method {} must be static with a receiver parameter",
                method.name
            )));
        }
        self.extensions.write().push(Arc::new(method));
        Ok(())
    }

    /// Number of extension methods registered so far; only grows
    pub fn extension_count(&self) -> usize {
        self.extensions.read().len()
    }

    /// Extension methods named `name` whose receiver accepts `ty`
    pub fn extensions_for(&self, ty: &HostType, name: &str) -> Vec<Arc<MethodInfo>> {
        self.extensions
            .read()
            .iter()
            .filter(|m| m.exposed_name() == name)
            .filter(|m| {
                m.params
                    .first()
                    .map(|p| p.ty.is_assignable_from(ty))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}
