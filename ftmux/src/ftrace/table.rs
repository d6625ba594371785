//! # Translation table
//!
//! Resolves ftrace events between their symbolic (group, name) form and the
//! numeric ids used in filters.
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use log::warn;

use super::GroupAndName;

/// An ftrace event known to the translation table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    pub id: usize,
    pub group: String,
    pub name: String,
}

impl Event {
    pub fn group_and_name(&self) -> GroupAndName {
        GroupAndName::new(&self.group, &self.name)
    }
}

/// Lookup interface the muxer uses to turn event names into ids and back.
pub trait TranslationTable {
    /// Returns the id of an event, if known.
    fn event_id(&self, event: &GroupAndName) -> Option<usize>;
    /// Returns an event given its id, if known.
    fn event_by_id(&self, id: usize) -> Option<&Event>;
    /// Finds an event by its name only, whatever its group. Used when a
    /// session gives an event without its group.
    fn event_by_name(&self, name: &str) -> Option<&Event>;
    /// Returns all the known events of a group.
    fn events_in_group(&self, group: &str) -> Vec<&Event>;
    /// Whether the layout of the scheduling events allows using the compact
    /// encoding.
    fn compact_sched_format_valid(&self) -> bool {
        true
    }
}

/// In-memory translation table. Ids are dense and start at 1, 0 being left
/// unused.
#[derive(Clone, Debug, Default)]
pub struct EventTable {
    events: Vec<Event>,
    by_name: HashMap<GroupAndName, usize>,
    by_group: BTreeMap<String, Vec<usize>>,
    compact_sched_format: bool,
}

impl EventTable {
    pub fn new<I>(events: I) -> Self
    where
        I: IntoIterator<Item = GroupAndName>,
    {
        let mut table = EventTable {
            compact_sched_format: true,
            ..Default::default()
        };
        events.into_iter().for_each(|e| {
            table.insert(e);
        });
        table
    }

    /// Parse the content of the tracefs available_events file, made of
    /// "group:name" lines.
    pub fn from_available_events(content: &str) -> Self {
        Self::new(content.lines().filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            match line.split_once(':') {
                Some((group, name)) if !group.is_empty() && !name.is_empty() => {
                    Some(GroupAndName::new(group, name))
                }
                _ => {
                    warn!("Event list element has an unexpected format: {line}");
                    None
                }
            }
        }))
    }

    /// Load the table from an available_events file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Ok(Self::from_available_events(&content))
    }

    /// Set whether the compact scheduling format can be used.
    pub fn with_compact_sched_format(mut self, valid: bool) -> Self {
        self.compact_sched_format = valid;
        self
    }

    /// Add an event to the table and return its id. Adding an already known
    /// event returns its existing id.
    pub fn insert(&mut self, event: GroupAndName) -> usize {
        if let Some(id) = self.by_name.get(&event) {
            return *id;
        }

        let id = self.events.len() + 1;
        self.by_group
            .entry(event.group.clone())
            .or_default()
            .push(id);
        self.events.push(Event {
            id,
            group: event.group.clone(),
            name: event.name.clone(),
        });
        self.by_name.insert(event, id);
        id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl TranslationTable for EventTable {
    fn event_id(&self, event: &GroupAndName) -> Option<usize> {
        self.by_name.get(event).copied()
    }

    fn event_by_id(&self, id: usize) -> Option<&Event> {
        id.checked_sub(1).and_then(|i| self.events.get(i))
    }

    fn event_by_name(&self, name: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.name == name)
    }

    fn events_in_group(&self, group: &str) -> Vec<&Event> {
        self.by_group
            .get(group)
            .map(|ids| ids.iter().filter_map(|id| self.event_by_id(*id)).collect())
            .unwrap_or_default()
    }

    fn compact_sched_format_valid(&self) -> bool {
        self.compact_sched_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EventTable {
        EventTable::load("test_data/available_events").unwrap()
    }

    #[test]
    fn load() {
        let table = table();
        assert!(!table.is_empty());
        assert!(table
            .event_id(&GroupAndName::new("sched", "sched_switch"))
            .is_some());
        assert!(table
            .event_id(&GroupAndName::new("sched", "does_not_exist"))
            .is_none());
    }

    #[test]
    fn ids_are_dense() {
        let table = EventTable::from_available_events("a:x\na:y\nb:z\n");
        assert_eq!(table.len(), 3);
        assert_eq!(table.event_id(&GroupAndName::new("a", "x")), Some(1));
        assert_eq!(table.event_id(&GroupAndName::new("b", "z")), Some(3));
        assert!(table.event_by_id(0).is_none());
        assert!(table.event_by_id(4).is_none());
        assert_eq!(table.event_by_id(2).unwrap().name, "y");
    }

    #[test]
    fn malformed_lines() {
        let table = EventTable::from_available_events("a:x\n\nnocolon\n:empty\ngroup:\n");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicates() {
        let mut table = EventTable::from_available_events("a:x\na:x\n");
        assert_eq!(table.len(), 1);
        assert_eq!(table.insert(GroupAndName::new("a", "x")), 1);
        assert_eq!(table.insert(GroupAndName::new("a", "w")), 2);
    }

    #[test]
    fn lookups() {
        let table = table();
        let e = table.event_by_name("sched_switch").unwrap();
        assert_eq!(e.group, "sched");
        assert_eq!(table.event_by_id(e.id), Some(e));
        assert_eq!(
            e.group_and_name(),
            GroupAndName::new("sched", "sched_switch")
        );

        let sched = table.events_in_group("sched");
        assert!(sched.iter().all(|e| e.group == "sched"));
        assert!(sched.iter().any(|e| e.name == "sched_waking"));
        assert!(table.events_in_group("nope").is_empty());
    }
}
