//! # Compact scheduling events
//!
//! sched_switch and sched_waking are by far the most frequent ftrace events.
//! When a session allows it, readers encode them in a dense columnar format
//! instead of one record per event. The muxer only decides whether this
//! applies to a given session.
use super::{filter::EventFilter, table::TranslationTable, GroupAndName};

/// Events eligible for the compact encoding.
const COMPACT_SCHED_EVENTS: &[(&str, &str)] = &[("sched", "sched_switch"), ("sched", "sched_waking")];

/// Per-session compact scheduling configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CompactSchedConfig {
    /// Whether scheduling events are to be encoded in the compact format.
    pub enabled: bool,
}

impl CompactSchedConfig {
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Derive the configuration of a session: the session has to ask for
    /// it, the kernel event layout has to be understood and at least one of
    /// the eligible scheduling events has to be enabled.
    pub fn create(requested: bool, filter: &EventFilter, table: &dyn TranslationTable) -> Self {
        if !requested || !table.compact_sched_format_valid() {
            return Self::disabled();
        }

        let enabled = COMPACT_SCHED_EVENTS.iter().any(|(group, name)| {
            table
                .event_id(&GroupAndName::new(group, name))
                .is_some_and(|id| filter.is_event_enabled(id))
        });
        Self { enabled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftrace::table::EventTable;

    fn table() -> EventTable {
        EventTable::from_available_events("sched:sched_switch\nsched:sched_wakeup\nirq:irq_handler_entry\n")
    }

    #[test]
    fn not_requested() {
        let table = table();
        let filter: EventFilter = table.events_in_group("sched").iter().map(|e| e.id).collect();
        assert!(!CompactSchedConfig::create(false, &filter, &table).enabled);
    }

    #[test]
    fn requested_with_sched_switch() {
        let table = table();
        let id = table.event_id(&GroupAndName::new("sched", "sched_switch")).unwrap();
        let filter: EventFilter = [id].into_iter().collect();
        assert!(CompactSchedConfig::create(true, &filter, &table).enabled);
    }

    #[test]
    fn requested_without_sched_events() {
        let table = table();
        let id = table.event_id(&GroupAndName::new("irq", "irq_handler_entry")).unwrap();
        let filter: EventFilter = [id].into_iter().collect();
        assert!(!CompactSchedConfig::create(true, &filter, &table).enabled);
    }

    #[test]
    fn invalid_format() {
        let table = table().with_compact_sched_format(false);
        let id = table.event_id(&GroupAndName::new("sched", "sched_switch")).unwrap();
        let filter: EventFilter = [id].into_iter().collect();
        assert_eq!(
            CompactSchedConfig::create(true, &filter, &table),
            CompactSchedConfig::disabled()
        );
    }
}
