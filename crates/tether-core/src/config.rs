//! Bridge configuration

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

/// Options for one bridge instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeOptions {
    /// Expose non-public members to scripts
    pub expose_non_public: bool,

    /// Append the interpreter traceback to raised errors
    pub use_traceback: bool,

    /// Recycle retired handle slots
    pub reuse_handles: bool,

    /// Install the helper functions table in script globals
    pub register_globals: bool,

    /// Name of the helper functions table
    pub globals_table: String,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            expose_non_public: false,
            use_traceback: false,
            reuse_handles: true,
            register_globals: true,
            globals_table: "tether".to_string(),
        }
    }
}

impl BridgeOptions {
    /// Parse options from TOML; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> BridgeResult<Self> {
        toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Set whether non-public members are visible
    pub fn with_non_public(mut self, expose: bool) -> Self {
        self.expose_non_public = expose;
        self
    }

    /// Set whether raised errors carry a traceback
    pub fn with_traceback(mut self, enabled: bool) -> Self {
        self.use_traceback = enabled;
        self
    }

    /// Set whether retired handle slots are recycled
    pub fn with_handle_reuse(mut self, reuse: bool) -> Self {
        self.reuse_handles = reuse;
        self
    }

    /// Set whether the helper table is installed, and its name
    pub fn with_globals(mut self, register: bool, table: &str) -> Self {
        self.register_globals = register;
        self.globals_table = table.to_string();
        self
    }
}
