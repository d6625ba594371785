//! # FtraceConfigMuxer
//!
//! Ftrace is a bunch of globally modifiable, persistent state. Given a number
//! of session configurations the muxer finds the union of all their settings
//! that keeps every session happy, while watching out for anybody messing
//! with ftrace at the same time.
//!
//! A session is first set up (`setup_config`): its events are resolved and
//! enabled, the shared settings are merged and a `SessionId` is returned.
//! Tracing itself only starts once a session is activated
//! (`activate_config`). Removing a session (`remove_config`) recomputes the
//! union of what the remaining sessions need and disables everything else.
//!
//! Some settings can't be shared and are decided by the first session only:
//! the per-CPU buffer size and the trace clock. They are released when the
//! last session goes away.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use log::{debug, error, info, warn};

use super::{
    atrace::{builtin_category_events, Atrace, AtraceCommand, VendorEvents},
    buffer::{compute_cpu_buffer_size_in_pages, host_page_size},
    compact_sched::CompactSchedConfig,
    config::{FtraceConfig, SetupErrors},
    filter::{EventFilter, SyscallFilter},
    ksyms::{Kallsyms, Ksyms},
    syscalls::SyscallTable,
    table::TranslationTable,
    tracefs::Tracefs,
    GroupAndName,
};

/// Clocks we pick from when a session has no preference (or its preference
/// is not available), in order of preference.
const PREFERRED_CLOCKS: &[&str] = &["boot", "global", "local"];
/// Default tracer, meaning no tracer is in use.
const NOP_TRACER: &str = "nop";
const FUNCTION_GRAPH_TRACER: &str = "function_graph";
/// Events of this group are always on and have no enable file.
const FTRACE_GROUP: &str = "ftrace";
const RAW_SYSCALLS_EVENTS: &[(&str, &str)] =
    &[("raw_syscalls", "sys_enter"), ("raw_syscalls", "sys_exit")];

/// Handle on a session configuration. Ids are never reused and
/// `SessionId::INVALID` is never returned by the muxer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionId(u64);

impl SessionId {
    pub const INVALID: SessionId = SessionId(0);

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clock timestamps in the ring buffers are taken from.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FtraceClock {
    /// CLOCK_BOOTTIME, the default for trace readers.
    #[default]
    Boot,
    Global,
    Local,
    MonoRaw,
    /// Any other clock, or one we could not read.
    Unknown,
}

impl FtraceClock {
    pub fn from_name(name: &str) -> Self {
        match name {
            "boot" => FtraceClock::Boot,
            "global" => FtraceClock::Global,
            "local" => FtraceClock::Local,
            "mono_raw" => FtraceClock::MonoRaw,
            _ => FtraceClock::Unknown,
        }
    }
}

/// Hard failures of `setup_config`. Partial coverage of a request is not an
/// error and is reported through `SetupErrors` instead.
#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    #[error("kernel symbols are not available, can't symbolize kernel addresses")]
    KsymsUnavailable,
    #[error("ftrace is in use by a third party (current tracer is '{0}')")]
    TracefsInUse(String),
    #[error("ftrace was disabled by a third party while sessions are active")]
    TracingDisabled,
    #[error("function_graph can't be enabled while other sessions are using ftrace")]
    FunctionGraphInUse,
    #[error("could not {op}: {err:#}")]
    Tracefs { op: &'static str, err: anyhow::Error },
}

impl MuxError {
    fn tracefs(op: &'static str, err: anyhow::Error) -> Self {
        MuxError::Tracefs { op, err }
    }
}

/// State held per session, used to parse the shared ftrace data on behalf of
/// that session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DataSourceConfig {
    /// Events enabled for this session.
    pub event_filter: EventFilter,
    /// Syscalls enabled for this session. An empty filter means the session
    /// does not use raw_syscalls events.
    pub syscall_filter: SyscallFilter,
    /// Configuration of the compact encoding of scheduling events.
    pub compact_sched: CompactSchedConfig,
    /// Userspace annotations apps and categories the session asked for.
    pub atrace_apps: Vec<String>,
    pub atrace_categories: Vec<String>,
    /// Whether kernel addresses should be symbolized.
    pub symbolize_ksyms: bool,
}

/// What is currently asserted onto tracefs.
#[derive(Default)]
struct SharedState {
    /// Union of the event filters of all sessions.
    ftrace_events: EventFilter,
    /// Union of the syscall filters of all sessions.
    syscall_filter: SyscallFilter,
    /// Syscall ids last written to tracefs. `None` when unknown, which
    /// forces the next write.
    syscall_ids: Option<BTreeSet<usize>>,
    /// Whether current_tracer is function_graph.
    funcgraph_on: bool,
    /// 0 when not decided.
    cpu_buffer_size_pages: usize,
    ftrace_clock: FtraceClock,
    atrace_on: bool,
    atrace_apps: Vec<String>,
    atrace_categories: Vec<String>,
}

/// Shares the ftrace state between sessions. See the module documentation.
///
/// The muxer borrows its tracefs and translation table: both have to outlive
/// it. All calls are expected to be made from a single owner.
pub struct FtraceConfigMuxer<'a> {
    tracefs: &'a dyn Tracefs,
    table: &'a dyn TranslationTable,
    syscalls: SyscallTable,
    vendor_events: VendorEvents,
    atrace: Box<dyn Atrace + 'a>,
    ksyms: Box<dyn Ksyms + 'a>,
    page_size: usize,
    last_id: u64,
    current_state: SharedState,
    /// All requested sessions, active or not. Inactive sessions have their
    /// events and buffers set up, but do not need tracing to be on.
    ds_configs: BTreeMap<SessionId, DataSourceConfig>,
    /// Subset of `ds_configs` being active. Tracing is on iff this isn't
    /// empty.
    active_configs: BTreeSet<SessionId>,
}

impl<'a> FtraceConfigMuxer<'a> {
    pub fn new(
        tracefs: &'a dyn Tracefs,
        table: &'a dyn TranslationTable,
        syscalls: SyscallTable,
        vendor_events: VendorEvents,
    ) -> Self {
        Self {
            tracefs,
            table,
            syscalls,
            vendor_events,
            atrace: Box::new(AtraceCommand::default()),
            ksyms: Box::new(Kallsyms::default()),
            page_size: host_page_size(),
            last_id: 0,
            current_state: SharedState::default(),
            ds_configs: BTreeMap::new(),
            active_configs: BTreeSet::new(),
        }
    }

    /// Use a custom userspace annotations helper.
    pub fn with_atrace(mut self, atrace: Box<dyn Atrace + 'a>) -> Self {
        self.atrace = atrace;
        self
    }

    /// Use a custom kernel symbols probe.
    pub fn with_ksyms(mut self, ksyms: Box<dyn Ksyms + 'a>) -> Self {
        self.ksyms = ksyms;
        self
    }

    /// Use a given page size for buffer size computations.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Same as `setup_config_with_errors`, discarding the report of what
    /// could not be honored.
    pub fn setup_config(&mut self, request: &FtraceConfig) -> Result<SessionId, MuxError> {
        self.setup_config_with_errors(request, &mut SetupErrors::default())
    }

    /// Adjust ftrace to honor a session's request, without disturbing the
    /// sessions already in place. This is best effort: events might be
    /// missing (unknown or failing ones are reported in `errors`) or in
    /// excess (events needed by other sessions), the buffer size and clock
    /// of the first session are kept and atrace is not touched while other
    /// sessions are tracing.
    ///
    /// On success the session is registered but not active.
    pub fn setup_config_with_errors(
        &mut self,
        request: &FtraceConfig,
        errors: &mut SetupErrors,
    ) -> Result<SessionId, MuxError> {
        if request.symbolize_ksyms && !self.ksyms.available() {
            return Err(MuxError::KsymsUnavailable);
        }

        // The tracer can't be changed while trace pipes are opened, which is
        // the case as soon as another session is around.
        if request.enable_function_graph
            && !self.current_state.funcgraph_on
            && !self.ds_configs.is_empty()
        {
            return Err(MuxError::FunctionGraphInUse);
        }

        if self.ds_configs.is_empty() {
            debug_assert!(self.active_configs.is_empty());
            self.setup_first_session(request)?;
        } else if !self.active_configs.is_empty() {
            let on = self
                .tracefs
                .is_tracing_on()
                .map_err(|e| MuxError::tracefs("read tracing_on", e))?;
            // Did someone turn ftrace off behind our back?
            if !on {
                return Err(MuxError::TracingDisabled);
            }
        }

        let events = self.ftrace_events(request, errors);

        let mut filter = EventFilter::new();
        for event in events.iter() {
            let Some(id) = self.table.event_id(event) else {
                debug!("Can't enable {event}, event not known");
                errors.unknown_ftrace_events.push(event.to_string());
                continue;
            };

            // Events of the ftrace group are implicitly enabled (and don't
            // have an enable file), but still need to be tracked to retain
            // them during parsing.
            if self.current_state.ftrace_events.is_event_enabled(id) || event.group == FTRACE_GROUP
            {
                self.current_state.ftrace_events.enable_event(id);
                filter.enable_event(id);
                continue;
            }

            match self.tracefs.enable_event(&event.group, &event.name) {
                Ok(()) => {
                    self.current_state.ftrace_events.enable_event(id);
                    filter.enable_event(id);
                }
                Err(e) => {
                    debug!("Failed to enable {event}: {e:#}");
                    errors.failed_ftrace_events.push(event.to_string());
                }
            }
        }

        let syscall_filter = self.build_syscall_filter(&filter, request, errors);
        if let Err(e) = self.set_syscall_event_filter(Some(&syscall_filter)) {
            error!("Failed to set the raw_syscalls filter: {e}");
            self.rollback_setup();
            return Err(e);
        }

        if request.enable_function_graph {
            if let Err(e) = self.setup_function_graph(request) {
                error!("Failed to set up function_graph: {e}");
                self.rollback_setup();
                return Err(e);
            }
        }

        let compact_sched =
            CompactSchedConfig::create(request.compact_sched, &filter, self.table);

        if request.requires_atrace() {
            // Starting atrace resets the ring buffers: don't do it under the
            // feet of active sessions.
            if self.active_configs.is_empty() {
                self.update_atrace(request, errors);
            } else {
                debug!(
                    "Not touching atrace while {} session(s) are active",
                    self.active_configs.len()
                );
            }
        }

        self.last_id += 1;
        let id = SessionId(self.last_id);
        self.ds_configs.insert(
            id,
            DataSourceConfig {
                event_filter: filter,
                syscall_filter,
                compact_sched,
                atrace_apps: request.atrace_apps.clone(),
                atrace_categories: request.atrace_categories.clone(),
                symbolize_ksyms: request.symbolize_ksyms,
            },
        );
        self.current_state.syscall_filter = self.registered_syscall_filter();

        info!(
            "Session {id} set up ({} session(s) registered)",
            self.ds_configs.len()
        );
        Ok(id)
    }

    /// Start tracing for a session, if not already started. Returns false if
    /// the session is unknown or tracing could not be turned on.
    pub fn activate_config(&mut self, id: SessionId) -> bool {
        if !id.is_valid() || !self.ds_configs.contains_key(&id) {
            warn!("Can't activate unknown session {id}");
            return false;
        }
        if self.active_configs.contains(&id) {
            return true;
        }

        if self.active_configs.is_empty() {
            if let Err(e) = self.tracefs.set_tracing_on(true) {
                error!("Failed to enable ftrace: {e:#}");
                return false;
            }
        } else {
            match self.tracefs.is_tracing_on() {
                Ok(true) => (),
                Ok(false) => {
                    error!("Can't activate session {id}: ftrace was disabled by a third party");
                    return false;
                }
                Err(e) => {
                    error!("Failed to read tracing_on: {e:#}");
                    return false;
                }
            }
        }

        self.active_configs.insert(id);
        debug!("Session {id} activated");
        true
    }

    /// Undo the changes made for a session. Returns false if the id is
    /// invalid or the session was already removed.
    ///
    /// Tracefs failures are logged but do not prevent the removal: the muxer
    /// state is kept in line with the remaining sessions.
    pub fn remove_config(&mut self, id: SessionId) -> bool {
        if !id.is_valid() || self.ds_configs.remove(&id).is_none() {
            return false;
        }

        let mut expected_apps = Vec::new();
        let mut expected_categories = Vec::new();
        self.ds_configs.values().for_each(|config| {
            union_in_place(&config.atrace_apps, &mut expected_apps);
            union_in_place(&config.atrace_categories, &mut expected_categories);
        });
        // We did not necessarily succeed in turning atrace on for all the
        // remaining sessions: only aim for what is currently on.
        intersect_in_place(&self.current_state.atrace_apps, &mut expected_apps);
        intersect_in_place(&self.current_state.atrace_categories, &mut expected_categories);
        // Expected lists are subsets of the current ones.
        let atrace_changed = self.current_state.atrace_apps.len() != expected_apps.len()
            || self.current_state.atrace_categories.len() != expected_categories.len();

        if let Err(e) = self.set_syscall_event_filter(None) {
            warn!("Failed to update the raw_syscalls filter: {e}");
        }
        self.current_state.syscall_filter = self.registered_syscall_filter();

        self.converge_events();

        if self.active_configs.remove(&id) && self.active_configs.is_empty() {
            if let Err(e) = self.tracefs.set_tracing_on(false) {
                warn!("Failed to disable ftrace: {e:#}");
            }
        }

        // Idle sessions still rely on the rest of the setup.
        if self.ds_configs.is_empty() {
            self.release_shared_state();
        }

        if self.current_state.atrace_on {
            if expected_apps.is_empty() && expected_categories.is_empty() {
                self.disable_atrace();
            } else if atrace_changed && self.active_configs.is_empty() {
                // Some categories (e.g. those only enabling kernel events)
                // can't be disabled that way, nothing else we can do until
                // the last session is gone.
                match self.atrace.start(&expected_apps, &expected_categories) {
                    Ok(()) => {
                        self.current_state.atrace_apps = expected_apps;
                        self.current_state.atrace_categories = expected_categories;
                    }
                    Err(e) => warn!("Failed to update atrace: {e:#}"),
                }
            }
        }

        info!(
            "Session {id} removed ({} session(s) left)",
            self.ds_configs.len()
        );
        true
    }

    /// Set the current tracer back to "nop". This can't be part of
    /// `remove_config` as it requires all trace pipe readers to be closed,
    /// which is up to the caller.
    pub fn reset_current_tracer(&mut self) -> bool {
        match self.tracefs.set_current_tracer(NOP_TRACER) {
            Ok(()) => {
                self.current_state.funcgraph_on = false;
                true
            }
            Err(e) => {
                error!("Failed to reset the current tracer: {e:#}");
                false
            }
        }
    }

    /// Configuration of a session, used to parse the shared trace data on its
    /// behalf.
    pub fn data_source_config(&self, id: SessionId) -> Option<&DataSourceConfig> {
        self.ds_configs.get(&id)
    }

    /// Per-CPU buffer size, as configured by the first session (without
    /// reading it back from tracefs). 0 when no session is registered.
    pub fn per_cpu_buffer_size_pages(&self) -> usize {
        self.current_state.cpu_buffer_size_pages
    }

    pub fn ftrace_clock(&self) -> FtraceClock {
        self.current_state.ftrace_clock
    }

    /// Union of the events enabled for all registered sessions.
    pub fn central_event_filter(&self) -> &EventFilter {
        &self.current_state.ftrace_events
    }

    /// Union of the syscall filters of all registered sessions.
    pub fn central_syscall_filter(&self) -> &SyscallFilter {
        &self.current_state.syscall_filter
    }

    /// Syscall ids last written to the raw_syscalls filter. Empty means no
    /// restriction.
    pub fn syscall_filter_ids(&self) -> BTreeSet<usize> {
        self.current_state.syscall_ids.clone().unwrap_or_default()
    }

    pub fn is_active(&self, id: SessionId) -> bool {
        self.active_configs.contains(&id)
    }

    pub fn session_count(&self) -> usize {
        self.ds_configs.len()
    }

    /// The first session finds ftrace in whatever state it was left in:
    /// converge from there and make the decisions held for the lifetime of
    /// all sessions.
    fn setup_first_session(&mut self, request: &FtraceConfig) -> Result<(), MuxError> {
        // If someone outside of the muxer is using a tracer give up now. We
        // can't realistically figure out other notions of "in use".
        let tracer = self
            .tracefs
            .current_tracer()
            .map_err(|e| MuxError::tracefs("read current_tracer", e))?;
        let ours = self.current_state.funcgraph_on && tracer == FUNCTION_GRAPH_TRACER;
        if tracer != NOP_TRACER && !ours {
            error!("ftrace in use by a third party, current tracer is '{tracer}'");
            return Err(MuxError::TracefsInUse(tracer));
        }

        // Remove all events and data possibly left by a previous user.
        self.tracefs
            .disable_all_events()
            .map_err(|e| MuxError::tracefs("disable all events", e))?;
        self.tracefs
            .clear_trace()
            .map_err(|e| MuxError::tracefs("clear the trace buffers", e))?;
        self.tracefs
            .set_tracing_on(false)
            .map_err(|e| MuxError::tracefs("disable ftrace", e))?;
        self.current_state.ftrace_events = EventFilter::new();
        self.current_state.syscall_ids = None;

        self.setup_clock(request);
        self.setup_buffer_size(request)
    }

    fn setup_clock(&mut self, request: &FtraceConfig) {
        let mut current = match self.tracefs.clock() {
            Ok(clock) => Some(clock),
            Err(e) => {
                warn!("Could not read the current trace clock: {e:#}");
                None
            }
        };
        let clocks = self.tracefs.available_clocks().unwrap_or_default();

        if let Some(preferred) = request.clock.as_deref() {
            if !clocks.contains(preferred) {
                warn!("Trace clock '{preferred}' is not available");
            }
        }

        let target = request
            .clock
            .as_deref()
            .into_iter()
            .chain(PREFERRED_CLOCKS.iter().copied())
            .find(|clock| clocks.contains(*clock));

        if let Some(clock) = target {
            if current.as_deref() != Some(clock) {
                match self.tracefs.set_clock(clock) {
                    Ok(()) => current = Some(clock.to_string()),
                    Err(e) => warn!("Failed to set the trace clock to {clock}: {e:#}"),
                }
            }
        }

        self.current_state.ftrace_clock = current
            .map(|clock| FtraceClock::from_name(&clock))
            .unwrap_or(FtraceClock::Unknown);
        debug!("Using trace clock {:?}", self.current_state.ftrace_clock);
    }

    fn setup_buffer_size(&mut self, request: &FtraceConfig) -> Result<(), MuxError> {
        let pages = compute_cpu_buffer_size_in_pages(request.buffer_size_kb, self.page_size);
        self.tracefs
            .set_cpu_buffer_size_pages(pages)
            .map_err(|e| MuxError::tracefs("set the buffer size", e))?;
        self.current_state.cpu_buffer_size_pages = pages;
        Ok(())
    }

    fn setup_function_graph(&mut self, request: &FtraceConfig) -> Result<(), MuxError> {
        // Filters are collated by the kernel: all sessions using
        // function_graph get the functions of each other.
        if !request.function_filters.is_empty() {
            self.tracefs
                .append_function_filters(&request.function_filters)
                .map_err(|e| MuxError::tracefs("set function filters", e))?;
        }
        if !request.function_graph_roots.is_empty() {
            self.tracefs
                .append_function_graph_roots(&request.function_graph_roots)
                .map_err(|e| MuxError::tracefs("set function_graph roots", e))?;
        }

        if !self.current_state.funcgraph_on {
            self.tracefs
                .set_current_tracer(FUNCTION_GRAPH_TRACER)
                .map_err(|e| MuxError::tracefs("enable function_graph", e))?;
            self.current_state.funcgraph_on = true;
        }
        Ok(())
    }

    /// Resolve the events a request needs:
    /// - "group/*" is expanded to all the events of the group found in
    ///   tracefs;
    /// - "name" is looked up in the translation table to find its group;
    /// - atrace categories add the events they imply.
    fn ftrace_events(
        &self,
        request: &FtraceConfig,
        errors: &mut SetupErrors,
    ) -> BTreeSet<GroupAndName> {
        let mut events = BTreeSet::new();

        for value in request.ftrace_events.iter() {
            match value.split_once('/') {
                Some((group, "*")) if !group.is_empty() => {
                    match self.tracefs.event_names_in_group(group) {
                        Ok(names) => {
                            events.extend(names.iter().map(|name| GroupAndName::new(group, name)))
                        }
                        Err(e) => {
                            debug!("Can't list events of group {group}: {e:#}");
                            errors.unknown_ftrace_events.push(value.clone());
                        }
                    }
                }
                Some(_) => match value.parse::<GroupAndName>() {
                    Ok(event) => {
                        events.insert(event);
                    }
                    Err(e) => {
                        debug!("{e}");
                        errors.unknown_ftrace_events.push(value.clone());
                    }
                },
                None => match self.table.event_by_name(value) {
                    Some(event) => {
                        events.insert(event.group_and_name());
                    }
                    None => {
                        debug!("Event doesn't exist: {value}");
                        errors.unknown_ftrace_events.push(value.clone());
                    }
                },
            }
        }

        if request.requires_atrace() {
            events.insert(GroupAndName::new(FTRACE_GROUP, "print"));

            for category in request.atrace_categories.iter() {
                events.extend(builtin_category_events(category, self.table));
                if let Some(vendor) = self.vendor_events.get(category) {
                    events.extend(vendor.iter().cloned());
                }
            }
        }

        events
    }

    /// A session's syscall filter is:
    /// - empty if it does not use raw_syscalls events;
    /// - matching all syscalls if it does not list any;
    /// - the listed syscalls otherwise.
    fn build_syscall_filter(
        &self,
        filter: &EventFilter,
        request: &FtraceConfig,
        errors: &mut SetupErrors,
    ) -> SyscallFilter {
        let uses_raw_syscalls = RAW_SYSCALLS_EVENTS.iter().any(|(group, name)| {
            self.table
                .event_id(&GroupAndName::new(group, name))
                .is_some_and(|id| filter.is_event_enabled(id))
        });
        if !uses_raw_syscalls {
            return SyscallFilter::new();
        }

        if request.syscall_events.is_empty() {
            return SyscallFilter::all();
        }

        let mut output = SyscallFilter::new();
        for syscall in request.syscall_events.iter() {
            match self.syscalls.id_of(syscall) {
                Some(id) => output.enable_syscall(id),
                None => {
                    warn!("Can't enable {syscall}, syscall not known");
                    errors.unknown_syscalls.push(syscall.clone());
                }
            }
        }
        output
    }

    fn registered_syscall_filter(&self) -> SyscallFilter {
        let mut filter = SyscallFilter::new();
        self.ds_configs
            .values()
            .for_each(|config| filter.enable_syscalls_from(&config.syscall_filter));
        filter
    }

    /// Write the union of the syscall filters of all sessions, plus `extra`
    /// for a session being set up, to tracefs. Concurrent sessions might see
    /// more syscalls than they asked for, but never less.
    fn set_syscall_event_filter(&mut self, extra: Option<&SyscallFilter>) -> Result<(), MuxError> {
        let mut filter = self.registered_syscall_filter();
        if let Some(extra) = extra {
            filter.enable_syscalls_from(extra);
        }

        let ids = filter.tracefs_ids();
        if self.current_state.syscall_ids.as_ref() != Some(&ids) {
            self.tracefs
                .set_syscall_filter(&ids)
                .map_err(|e| MuxError::tracefs("set the raw_syscalls filter", e))?;
            self.current_state.syscall_ids = Some(ids);
        }
        Ok(())
    }

    /// Disable the events no registered session needs anymore. Events that
    /// fail to be disabled are kept in the union to be retried later.
    fn converge_events(&mut self) {
        let mut expected = EventFilter::new();
        self.ds_configs
            .values()
            .for_each(|config| expected.enable_events_from(&config.event_filter));

        for id in self.current_state.ftrace_events.enabled_events() {
            if expected.is_event_enabled(id) {
                continue;
            }

            // Any event that was enabled must be known.
            let Some(event) = self.table.event_by_id(id) else {
                self.current_state.ftrace_events.disable_event(id);
                continue;
            };
            if event.group == FTRACE_GROUP {
                self.current_state.ftrace_events.disable_event(id);
                continue;
            }

            match self.tracefs.disable_event(&event.group, &event.name) {
                Ok(()) => self.current_state.ftrace_events.disable_event(id),
                Err(e) => warn!("Failed to disable {}/{}: {e:#}", event.group, event.name),
            }
        }
    }

    /// Undo what a failed setup did to the shared state.
    fn rollback_setup(&mut self) {
        self.converge_events();
        if let Err(e) = self.set_syscall_event_filter(None) {
            warn!("Failed to restore the raw_syscalls filter: {e}");
        }
        // A failed first session doesn't get to keep its buffer and clock.
        if self.ds_configs.is_empty() {
            self.release_shared_state();
        }
    }

    /// Tear down what the first session set up, once no session is left.
    fn release_shared_state(&mut self) {
        if let Err(e) = self.tracefs.disable_all_events() {
            warn!("Failed to disable all events: {e:#}");
        }
        if let Err(e) = self.tracefs.clear_trace() {
            warn!("Failed to clear the trace buffers: {e:#}");
        }
        // Give the memory back.
        if let Err(e) = self.tracefs.set_cpu_buffer_size_pages(1) {
            warn!("Failed to shrink the trace buffers: {e:#}");
        }

        self.current_state.ftrace_events = EventFilter::new();
        self.current_state.syscall_filter = SyscallFilter::new();
        self.current_state.cpu_buffer_size_pages = 0;
        self.current_state.ftrace_clock = FtraceClock::default();
    }

    fn update_atrace(&mut self, request: &FtraceConfig, errors: &mut SetupErrors) {
        // Only update the current state if atrace is happy with the new
        // arguments.
        let mut categories = request.atrace_categories.clone();
        union_in_place(&self.current_state.atrace_categories, &mut categories);
        let mut apps = request.atrace_apps.clone();
        union_in_place(&self.current_state.atrace_apps, &mut apps);

        if self.current_state.atrace_on
            && apps.len() == self.current_state.atrace_apps.len()
            && categories.len() == self.current_state.atrace_categories.len()
        {
            return;
        }

        match self.atrace.start(&apps, &categories) {
            Ok(()) => {
                self.current_state.atrace_apps = apps;
                self.current_state.atrace_categories = categories;
                self.current_state.atrace_on = true;
            }
            Err(e) => {
                warn!("Failed to start atrace: {e:#}");
                errors.atrace_errors = format!("{e:#}");
            }
        }
    }

    fn disable_atrace(&mut self) {
        if let Err(e) = self.atrace.stop() {
            warn!("Failed to stop atrace: {e:#}");
            return;
        }
        self.current_state.atrace_apps.clear();
        self.current_state.atrace_categories.clear();
        self.current_state.atrace_on = false;
    }
}

/// Append to `out` the elements of `other` not already in it.
fn union_in_place(other: &[String], out: &mut Vec<String>) {
    other.iter().for_each(|item| {
        if !out.contains(item) {
            out.push(item.clone());
        }
    });
}

/// Keep in `out` only the elements also in `other`.
fn intersect_in_place(other: &[String], out: &mut Vec<String>) {
    out.retain(|item| other.contains(item));
}
