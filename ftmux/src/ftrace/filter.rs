//! # Filters
//!
//! Dense bitsets over the ftrace event id space and the syscall id space.
//! They are used both for the per-session view (which events a session
//! asked for) and for the union of all sessions the muxer asserts onto
//! tracefs.
use std::collections::BTreeSet;

use super::syscalls::ALL_SYSCALLS_ID;

/// Set of enabled ftrace event ids. Ids are small and dense (they come from
/// the translation table) so a plain bit vector is used.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    enabled: Vec<bool>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_event(&mut self, id: usize) {
        if id >= self.enabled.len() {
            self.enabled.resize(id + 1, false);
        }
        self.enabled[id] = true;
    }

    pub fn disable_event(&mut self, id: usize) {
        if let Some(bit) = self.enabled.get_mut(id) {
            *bit = false;
        }
    }

    pub fn is_event_enabled(&self, id: usize) -> bool {
        self.enabled.get(id).copied().unwrap_or(false)
    }

    /// Returns the ids of all enabled events, in ascending order.
    pub fn enabled_events(&self) -> BTreeSet<usize> {
        self.enabled
            .iter()
            .enumerate()
            .filter_map(|(id, on)| on.then_some(id))
            .collect()
    }

    /// Enables, in place, every event enabled in `other`.
    pub fn enable_events_from(&mut self, other: &EventFilter) {
        if other.enabled.len() > self.enabled.len() {
            self.enabled.resize(other.enabled.len(), false);
        }
        self.enabled
            .iter_mut()
            .zip(other.enabled.iter())
            .for_each(|(bit, on)| *bit |= *on);
    }

    /// Returns a new filter containing the events enabled in either filter.
    pub fn union(&self, other: &EventFilter) -> EventFilter {
        let mut filter = self.clone();
        filter.enable_events_from(other);
        filter
    }

    pub fn is_empty(&self) -> bool {
        !self.enabled.iter().any(|on| *on)
    }
}

// Two filters are equal when they enable the same events, whatever the length
// of their underlying vectors.
impl PartialEq for EventFilter {
    fn eq(&self, other: &Self) -> bool {
        let (short, long) = match self.enabled.len() <= other.enabled.len() {
            true => (&self.enabled, &other.enabled),
            false => (&other.enabled, &self.enabled),
        };
        short.iter().zip(long.iter()).all(|(a, b)| a == b)
            && long[short.len()..].iter().all(|on| !on)
    }
}

impl Eq for EventFilter {}

impl FromIterator<usize> for EventFilter {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut filter = EventFilter::new();
        iter.into_iter().for_each(|id| filter.enable_event(id));
        filter
    }
}

/// Set of syscall ids a session wants to see through the raw_syscalls
/// events. The filter has three states:
/// - empty: the session does not use raw_syscalls at all;
/// - containing `ALL_SYSCALLS_ID`: every syscall matches;
/// - otherwise: only the listed syscalls match.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyscallFilter(EventFilter);

impl SyscallFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter matching every syscall.
    pub fn all() -> Self {
        let mut filter = Self::new();
        filter.enable_syscall(ALL_SYSCALLS_ID);
        filter
    }

    pub fn enable_syscall(&mut self, id: usize) {
        self.0.enable_event(id);
    }

    pub fn disable_syscall(&mut self, id: usize) {
        self.0.disable_event(id);
    }

    pub fn is_syscall_enabled(&self, id: usize) -> bool {
        self.0.is_event_enabled(id)
    }

    pub fn matches_all(&self) -> bool {
        self.0.is_event_enabled(ALL_SYSCALLS_ID)
    }

    pub fn enable_syscalls_from(&mut self, other: &SyscallFilter) {
        self.0.enable_events_from(&other.0);
    }

    pub fn union(&self, other: &SyscallFilter) -> SyscallFilter {
        SyscallFilter(self.0.union(&other.0))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids to write to the raw_syscalls tracefs filter. An empty set clears
    /// the kernel filter, which is what "all syscalls" needs.
    pub fn tracefs_ids(&self) -> BTreeSet<usize> {
        if self.matches_all() {
            return BTreeSet::new();
        }
        self.0.enabled_events()
    }
}

impl FromIterator<usize> for SyscallFilter {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        SyscallFilter(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_disable() {
        let mut filter = EventFilter::new();
        assert!(!filter.is_event_enabled(1));
        assert!(filter.is_empty());

        filter.enable_event(1);
        filter.enable_event(42);
        assert!(filter.is_event_enabled(1));
        assert!(filter.is_event_enabled(42));
        assert!(!filter.is_event_enabled(2));
        // Out of range lookups are never enabled.
        assert!(!filter.is_event_enabled(1000));

        filter.disable_event(1);
        filter.disable_event(1000);
        assert!(!filter.is_event_enabled(1));
        assert_eq!(filter.enabled_events(), BTreeSet::from([42]));
    }

    #[test]
    fn union() {
        let a: EventFilter = [1, 3].into_iter().collect();
        let b: EventFilter = [3, 70].into_iter().collect();

        let u = a.union(&b);
        assert_eq!(u.enabled_events(), BTreeSet::from([1, 3, 70]));
        // Operands are left untouched.
        assert_eq!(a.enabled_events(), BTreeSet::from([1, 3]));

        let mut c = b.clone();
        c.enable_events_from(&a);
        assert_eq!(c, u);
    }

    #[test]
    fn equality_ignores_trailing_capacity() {
        let mut a = EventFilter::new();
        a.enable_event(100);
        a.disable_event(100);
        assert_eq!(a, EventFilter::new());
        assert!(a.is_empty());

        let mut b: EventFilter = [3].into_iter().collect();
        assert_ne!(a, b);
        b.enable_event(200);
        b.disable_event(200);
        assert_eq!(b, [3].into_iter().collect::<EventFilter>());
    }

    #[test]
    fn syscall_filter_states() {
        let none = SyscallFilter::new();
        assert!(none.is_empty());
        assert!(!none.matches_all());

        let some: SyscallFilter = [0, 2].into_iter().collect();
        assert!(!some.matches_all());
        assert_eq!(some.tracefs_ids(), BTreeSet::from([0, 2]));

        let all = SyscallFilter::all();
        assert!(all.matches_all());
        assert!(all.tracefs_ids().is_empty());

        // The union of a restricted and an unrestricted filter is
        // unrestricted.
        let u = some.union(&all);
        assert!(u.matches_all());
        assert!(u.tracefs_ids().is_empty());
    }
}
