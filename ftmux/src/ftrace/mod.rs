//! # Ftrace
//!
//! Everything needed to share the kernel ftrace state between multiple
//! concurrent tracing sessions: the config muxer itself and the interfaces
//! to the collaborators it relies on (tracefs, translation and syscall
//! tables, atrace, kernel symbols).
use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error, Result};

pub mod atrace;
pub mod buffer;
pub mod compact_sched;
pub mod config;
pub mod filter;
pub mod ksyms;
pub mod muxer;
pub mod syscalls;
pub mod table;
pub mod tracefs;

pub use config::{FtraceConfig, SetupErrors};
pub use muxer::{DataSourceConfig, FtraceClock, FtraceConfigMuxer, MuxError, SessionId};

/// Fully qualified ftrace event name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupAndName {
    pub group: String,
    pub name: String,
}

impl GroupAndName {
    pub fn new(group: &str, name: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
        }
    }
}

impl FromStr for GroupAndName {
    type Err = Error;

    /// Parse a "group/name" string.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('/') {
            Some((group, name)) if !group.is_empty() && !name.is_empty() => {
                Ok(Self::new(group, name))
            }
            _ => Err(anyhow!("Invalid event name '{s}', expected 'group/name'")),
        }
    }
}

impl fmt::Display for GroupAndName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_and_name() {
        let e: GroupAndName = "sched/sched_switch".parse().unwrap();
        assert_eq!(e, GroupAndName::new("sched", "sched_switch"));
        assert_eq!(e.to_string(), "sched/sched_switch");

        assert!("sched_switch".parse::<GroupAndName>().is_err());
        assert!("/sched_switch".parse::<GroupAndName>().is_err());
        assert!("sched/".parse::<GroupAndName>().is_err());
    }
}
