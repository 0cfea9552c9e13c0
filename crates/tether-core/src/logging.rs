//! Logging utilities for the bridge
//!
//! Structured `tracing` events under a handful of targets:
//! `registry` (handle lifetime), `members` (reflection and cache misses),
//! `resolver` (overload rejection), `adapter` (type synthesis) and
//! `dispatch` (errors raised into scripts).

pub use tracing::{debug, error, info, trace, warn, Level};

/// Initialize logging from `TETHER_LOG`, falling back to `RUST_LOG`.
///
/// Calling it more than once is harmless.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env("TETHER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            #[cfg(debug_assertions)]
            {
                EnvFilter::new("tether_core=debug")
            }
            #[cfg(not(debug_assertions))]
            {
                EnvFilter::new("tether_core=warn")
            }
        });

    fmt().with_env_filter(filter).compact().try_init().ok();
}

/// Log a handle allocation
#[inline]
pub fn log_intern(index: u32, generation: u32, type_name: &str) {
    trace!(target: "registry", index, generation, type_name, "interned object");
}

/// Log a handle retirement
#[inline]
pub fn log_retire(index: u32, generation: u32) {
    trace!(target: "registry", index, generation, "retired handle");
}

/// Log a member cache miss
#[inline]
pub fn log_member_miss(type_name: &str, member: &str, found: &str) {
    debug!(target: "members", type_name, member, found, "reflected member");
}

/// Log a rejected overload candidate
#[inline]
pub fn log_candidate_rejected(method: &str, param: usize) {
    trace!(target: "resolver", method, param, "candidate rejected");
}

/// Log adapter type synthesis
#[inline]
pub fn log_adapter_built(target: &str, methods: usize) {
    debug!(target: "adapter", adapted = target, methods, "synthesized adapter type");
}

/// Log a bridge attaching to an interpreter
#[inline]
pub fn log_attached(state: u64, helpers: bool) {
    debug!(target: "dispatch", state, helpers, "bridge attached");
}

/// Log an error raised into a script
#[inline]
pub fn log_raise(message: &str, location: &str) {
    debug!(target: "dispatch", message, location, "raising script error");
}
