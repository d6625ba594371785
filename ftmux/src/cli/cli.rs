use std::path::PathBuf;

use anyhow::Result;
use clap::{builder::PossibleValuesParser, Args, Parser, Subcommand};

use super::run;

/// Share the kernel ftrace state between concurrent tracing sessions.
#[derive(Parser, Debug)]
#[command(name = "ftmux", version)]
pub(crate) struct FtmuxCli {
    #[arg(
        long,
        value_parser=PossibleValuesParser::new(["error", "warn", "info", "debug", "trace"]),
        default_value = "info",
        help = "Log level",
    )]
    pub(crate) log_level: String,
    #[arg(
        long,
        help = "Path to the tracefs mount point (default: auto-detect)"
    )]
    pub(crate) tracefs: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: FtmuxCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FtmuxCommand {
    Run(Run),
    Reset(Reset),
}

impl FtmuxCli {
    pub(crate) fn run(self) -> Result<()> {
        match &self.command {
            FtmuxCommand::Run(args) => run::run(args, self.tracefs.as_deref()),
            FtmuxCommand::Reset(args) => run::reset(args, self.tracefs.as_deref()),
        }
    }
}

/// Set up tracing sessions and hold them until interrupted.
///
/// Each session is described by a YAML file. All sessions are set up in
/// order, then activated. On SIGINT or SIGTERM they are removed and ftrace is
/// left in its default state.
#[derive(Args, Debug, Default)]
pub(crate) struct Run {
    #[arg(
        required = true,
        help = "Session configuration files (YAML). Example:

ftrace_events: [\"sched/*\", \"raw_syscalls/sys_enter\"]
syscall_events: [\"sys_openat\"]
buffer_size_kb: 4096"
    )]
    pub(crate) configs: Vec<PathBuf>,
    #[arg(
        long,
        help = "Vendor atrace categories file: a category name per line, followed by indented group/name event lines"
    )]
    pub(crate) vendor_categories: Option<PathBuf>,
    #[arg(
        long,
        help = "Syscall table, as dumped by 'ausyscall --dump'. Required to filter on syscall names"
    )]
    pub(crate) syscall_table: Option<PathBuf>,
    #[arg(
        long,
        help = "Allow ftmux to modify the system, e.g. to mount tracefs. Requires root"
    )]
    pub(crate) allow_system_changes: bool,
    #[arg(
        long,
        help = "Do not check kernel symbols are available, even if a session asks for symbolization"
    )]
    pub(crate) skip_ksyms_check: bool,
}

/// Bring ftrace back to its default state, e.g. after a crash.
#[derive(Args, Debug, Default)]
pub(crate) struct Reset {
    #[arg(
        long,
        help = "Allow ftmux to modify the system, e.g. to mount tracefs. Requires root"
    )]
    pub(crate) allow_system_changes: bool,
}
