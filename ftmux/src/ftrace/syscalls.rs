//! # Syscall table
//!
//! Maps syscall names to the ids the kernel reports in raw_syscalls events.
use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use log::debug;

/// Upper bound on syscall ids we track.
pub const MAX_SYSCALLS: usize = 550;
/// Sentinel id meaning "every syscall". Never a real syscall id.
pub const ALL_SYSCALLS_ID: usize = MAX_SYSCALLS + 1;

/// Name <> id lookup for the syscalls of the running architecture.
#[derive(Clone, Debug, Default)]
pub struct SyscallTable {
    ids: HashMap<String, usize>,
}

impl SyscallTable {
    /// Build a table from (name, id) pairs. Names may be given with or
    /// without their "sys_" prefix. Ids above `MAX_SYSCALLS` are ignored.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: AsRef<str>,
    {
        let ids = entries
            .into_iter()
            .filter(|(_, id)| *id <= MAX_SYSCALLS)
            .map(|(name, id)| (Self::normalize(name.as_ref()).to_string(), id))
            .collect();
        Self { ids }
    }

    /// Build a table from a list of names, ordered by syscall number (the
    /// way kernel syscall tables are laid out).
    pub fn from_ordered_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            names
                .into_iter()
                .enumerate()
                .map(|(id, name)| (name.as_ref().to_string(), id)),
        )
    }

    /// Parse a syscall table dump made of "<id> <name>" lines, as printed by
    /// `ausyscall --dump`. Other lines are ignored.
    pub fn parse(content: &str) -> Self {
        Self::new(content.lines().filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next()?.parse::<usize>(), fields.next()) {
                (Ok(id), Some(name)) => Some((name.to_string(), id)),
                _ => {
                    debug!("Skipping syscall table line '{line}'");
                    None
                }
            }
        }))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.ids.get(Self::normalize(name)).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn normalize(name: &str) -> &str {
        name.strip_prefix("sys_").unwrap_or(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        let table = SyscallTable::from_ordered_names(["read", "write", "open"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.id_of("read"), Some(0));
        assert_eq!(table.id_of("sys_open"), Some(2));
        assert_eq!(table.id_of("close"), None);
    }

    #[test]
    fn out_of_range_ids() {
        let table = SyscallTable::new([("read", 0), ("bogus", MAX_SYSCALLS + 10)]);
        assert_eq!(table.id_of("read"), Some(0));
        assert_eq!(table.id_of("bogus"), None);
        assert!(!table.is_empty());
    }

    #[test]
    fn dump() {
        let table = SyscallTable::load("test_data/syscalls.txt").unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.id_of("openat"), Some(257));
        assert_eq!(table.id_of("sys_close"), Some(3));
        assert!(SyscallTable::load("test_data/nope.txt").is_err());
    }
}
