//! # Run
//!
//! Runners of the subcommands, wiring the muxer to the real tracefs.
use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use log::{error, info, warn};

use ftmux::ftrace::{
    atrace::{load_vendor_categories, VendorEvents},
    ksyms::Ksyms,
    syscalls::SyscallTable,
    table::EventTable,
    tracefs::{Tracefs, TracefsDir},
    FtraceConfig, FtraceConfigMuxer, SessionId, SetupErrors,
};

use super::{Reset, Run};
use crate::helpers::{signals::Running, tracefs_mount::TracefsMount};

/// How often the termination condition is checked.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Kernel symbols probe used when the check is skipped.
struct AssumeKsyms;

impl Ksyms for AssumeKsyms {
    fn available(&self) -> bool {
        true
    }
}

fn tracefs(path: Option<&Path>) -> Result<TracefsDir> {
    match path {
        Some(path) => Ok(TracefsDir::new(path)),
        None => TracefsDir::discover(),
    }
}

fn report(path: &Path, errors: &SetupErrors) {
    if errors.is_empty() {
        return;
    }

    let path = path.display();
    if !errors.unknown_ftrace_events.is_empty() {
        warn!(
            "{path}: unknown event(s): {}",
            errors.unknown_ftrace_events.join(", ")
        );
    }
    if !errors.failed_ftrace_events.is_empty() {
        warn!(
            "{path}: could not enable event(s): {}",
            errors.failed_ftrace_events.join(", ")
        );
    }
    if !errors.unknown_syscalls.is_empty() {
        warn!(
            "{path}: unknown syscall(s): {}",
            errors.unknown_syscalls.join(", ")
        );
    }
    if !errors.atrace_errors.is_empty() {
        warn!("{path}: atrace failed: {}", errors.atrace_errors);
    }
}

fn teardown(muxer: &mut FtraceConfigMuxer, sessions: &[SessionId]) {
    sessions.iter().rev().for_each(|id| {
        if !muxer.remove_config(*id) {
            warn!("Session {id} was already removed");
        }
    });
    // Trace readers are gone by now.
    if !muxer.reset_current_tracer() {
        warn!("Could not reset the current tracer");
    }
}

pub(crate) fn run(args: &Run, tracefs_path: Option<&Path>) -> Result<()> {
    // Declared first to be unmounted last.
    let _mount = match args.allow_system_changes {
        true => Some(TracefsMount::mount()?),
        false => None,
    };

    let configs = args
        .configs
        .iter()
        .map(FtraceConfig::load)
        .collect::<Result<Vec<_>>>()?;

    let tracefs = tracefs(tracefs_path)?;
    let table = EventTable::load(tracefs.root().join("available_events"))?;
    let syscalls = match &args.syscall_table {
        Some(path) => SyscallTable::load(path)?,
        None => SyscallTable::default(),
    };
    let vendor = match &args.vendor_categories {
        Some(path) => load_vendor_categories(path)?,
        None => VendorEvents::new(),
    };

    let run = Running::new()?;
    let mut muxer = FtraceConfigMuxer::new(&tracefs, &table, syscalls, vendor);
    if args.skip_ksyms_check {
        muxer = muxer.with_ksyms(Box::new(AssumeKsyms));
    }

    let mut sessions = Vec::new();
    for (path, config) in args.configs.iter().zip(configs.iter()) {
        if !config.syscall_events.is_empty() && args.syscall_table.is_none() {
            warn!(
                "{}: syscall names can't be resolved without --syscall-table",
                path.display()
            );
        }

        let mut errors = SetupErrors::default();
        match muxer.setup_config_with_errors(config, &mut errors) {
            Ok(id) => {
                report(path, &errors);
                info!("{}: session {id}", path.display());
                sessions.push(id);
            }
            Err(e) => {
                error!("{}: could not set the session up", path.display());
                teardown(&mut muxer, &sessions);
                return Err(e).with_context(|| format!("Could not set up {}", path.display()));
            }
        }
    }

    let active = sessions
        .iter()
        .filter(|id| {
            let ok = muxer.activate_config(**id);
            if !ok {
                warn!("Could not activate session {id}");
            }
            ok
        })
        .count();
    if active == 0 {
        error!("No session could be activated");
        run.terminate();
    }

    info!(
        "{active} session(s) running (per-CPU buffer: {} pages, clock: {:?}), press ^C to stop",
        muxer.per_cpu_buffer_size_pages(),
        muxer.ftrace_clock(),
    );
    run.wait(POLL_INTERVAL);

    teardown(&mut muxer, &sessions);
    Ok(())
}

pub(crate) fn reset(args: &Reset, tracefs_path: Option<&Path>) -> Result<()> {
    let _mount = match args.allow_system_changes {
        true => Some(TracefsMount::mount()?),
        false => None,
    };
    let tracefs = tracefs(tracefs_path)?;

    tracefs.set_tracing_on(false)?;
    tracefs.set_current_tracer("nop")?;
    tracefs.disable_all_events()?;
    tracefs.set_syscall_filter(&Default::default())?;
    tracefs.clear_trace()?;
    tracefs.set_cpu_buffer_size_pages(1)?;
    // Leave tracing in the kernel default state.
    tracefs.set_tracing_on(true)?;

    info!("Ftrace reset ({})", tracefs.root().display());
    Ok(())
}
