//! Contextual logging macros, namespaced under `crate::diag` (mirrors
//! `meshpower_core::diag`; each crate keeps its own copy rather than
//! threading one crate's private macros through another's public API).

/// Trait for structs that provide a log-line prefix.
pub trait LogMetadata {
    fn meta(&self) -> String;
}

/// Context for one poll cycle of the power-manager loop.
pub struct CycleContext {
    pub poll_gen: u64,
}

impl LogMetadata for CycleContext {
    fn meta(&self) -> String {
        format!("poll_gen={}", self.poll_gen)
    }
}

/// Context for a single node within a poll cycle.
pub struct NodeContext {
    pub node: meshpower_core::NodeId,
    pub poll_gen: u64,
}

impl LogMetadata for NodeContext {
    fn meta(&self) -> String {
        format!("node={} poll_gen={}", self.node, self.poll_gen)
    }
}

macro_rules! my_info {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::diag::LogMetadata::meta(&$ctx);
        log::info!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::info!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! my_warn {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::diag::LogMetadata::meta(&$ctx);
        log::warn!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::warn!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! my_debug {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::diag::LogMetadata::meta(&$ctx);
        log::debug!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::debug!($fmt $(, $($arg)+)?);
    }};
}

pub(crate) use my_debug;
pub(crate) use my_info;
pub(crate) use my_warn;
