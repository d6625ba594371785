//! # Session configuration
//!
//! What a tracing session asks the muxer for, and what the muxer reports back
//! when it could only partially honor it.
use std::{fs::read_to_string, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Ftrace configuration requested by a single tracing session.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct FtraceConfig {
    /// Events to enable. Either "group/name", "group/*" for a whole group or
    /// a bare event name whose group is looked up.
    pub ftrace_events: Vec<String>,
    /// Userspace annotation (atrace) categories.
    pub atrace_categories: Vec<String>,
    /// Applications for which userspace annotations are enabled.
    pub atrace_apps: Vec<String>,
    /// Syscalls to report through raw_syscalls events. Empty means all.
    pub syscall_events: Vec<String>,
    /// Per-CPU buffer size in kB. 0 means the default size.
    pub buffer_size_kb: usize,
    /// Preferred trace clock.
    pub clock: Option<String>,
    /// Use the compact encoding for scheduling events.
    pub compact_sched: bool,
    /// Resolve kernel addresses found in events into symbols.
    pub symbolize_ksyms: bool,
    /// Use the function_graph tracer.
    pub enable_function_graph: bool,
    /// Functions to trace with function_graph.
    pub function_filters: Vec<String>,
    /// Functions to use as function_graph roots.
    pub function_graph_roots: Vec<String>,
}

impl FtraceConfig {
    /// Load a configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FtraceConfig> {
        let path = path.as_ref();
        let contents =
            read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
        Self::from_yaml(contents.as_str())
            .with_context(|| format!("Invalid configuration {}", path.display()))
    }

    /// Load a configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<FtraceConfig> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Does the session need userspace annotations?
    pub fn requires_atrace(&self) -> bool {
        !self.atrace_categories.is_empty() || !self.atrace_apps.is_empty()
    }
}

/// Report of what could not be honored while setting a session up. None of
/// these are fatal.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SetupErrors {
    /// Events that are not known to the translation table.
    pub unknown_ftrace_events: Vec<String>,
    /// Events that are known but could not be enabled in tracefs.
    pub failed_ftrace_events: Vec<String>,
    /// Syscalls that are not known to the syscall table.
    pub unknown_syscalls: Vec<String>,
    /// Output of a failed atrace invocation.
    pub atrace_errors: String,
}

impl SetupErrors {
    pub fn is_empty(&self) -> bool {
        self.unknown_ftrace_events.is_empty()
            && self.failed_ftrace_events.is_empty()
            && self.unknown_syscalls.is_empty()
            && self.atrace_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_file() {
        let c = FtraceConfig::load("test_data/configs/sched.yaml").unwrap();
        assert_eq!(c.ftrace_events, vec!["sched/*", "power/cpu_frequency"]);
        assert_eq!(c.buffer_size_kb, 4096);
        assert!(c.compact_sched);
        assert!(c.clock.is_none());
        assert!(!c.requires_atrace());

        let c = FtraceConfig::load("test_data/configs/syscalls.yaml").unwrap();
        assert_eq!(c.syscall_events, vec!["sys_open", "sys_read"]);
        assert_eq!(c.clock.as_deref(), Some("global"));

        let c = FtraceConfig::load("test_data/configs/atrace.yaml").unwrap();
        assert!(c.requires_atrace());
        assert_eq!(c.atrace_apps, vec!["com.example.app"]);
    }

    #[test]
    fn unknown_fields() {
        assert!(FtraceConfig::load("test_data/configs/invalid.yaml").is_err());
        assert!(FtraceConfig::load("test_data/configs/does_not_exist.yaml").is_err());
    }

    #[test]
    fn defaults() {
        let c = FtraceConfig::from_yaml("{}").unwrap();
        assert_eq!(c, FtraceConfig::default());
        assert_eq!(c.buffer_size_kb, 0);
    }

    #[test]
    fn setup_errors() {
        let mut e = SetupErrors::default();
        assert!(e.is_empty());
        e.unknown_syscalls.push("sys_foo".to_string());
        assert!(!e.is_empty());
    }
}
