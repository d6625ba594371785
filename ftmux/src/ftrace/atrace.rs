//! # Atrace
//!
//! Userspace annotations (ATRACE_* macros, os.Trace()) are toggled by an
//! external helper. Its categories also imply a set of kernel events, either
//! well known ones (see `builtin_category_events`) or vendor specific ones
//! (see `VendorEvents`).
//!
//! Starting atrace resets the ftrace buffers, which is why the muxer only
//! does it while no session is actively tracing.
use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;

use super::{table::TranslationTable, GroupAndName};

/// Vendor category name to the kernel events it implies.
pub type VendorEvents = HashMap<String, Vec<GroupAndName>>;

/// Interface to the userspace annotations helper.
pub trait Atrace {
    /// Start (or restart with a new set of) userspace annotations.
    fn start(&self, apps: &[String], categories: &[String]) -> Result<()>;
    /// Stop userspace annotations.
    fn stop(&self) -> Result<()>;
}

/// Runs the atrace binary.
pub struct AtraceCommand {
    binary: String,
}

impl AtraceCommand {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn run(&self, args: &[String]) -> Result<()> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        if !output.status.success() {
            bail!(
                "{} returned ({}): {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Default for AtraceCommand {
    fn default() -> Self {
        Self::new("atrace")
    }
}

impl Atrace for AtraceCommand {
    fn start(&self, apps: &[String], categories: &[String]) -> Result<()> {
        let mut args = vec!["--async_start".to_string(), "--only_userspace".to_string()];
        if !apps.is_empty() {
            args.push("-a".to_string());
            args.push(apps.join(","));
        }
        args.extend(categories.iter().cloned());
        self.run(&args)
    }

    fn stop(&self) -> Result<()> {
        self.run(&["--async_stop".to_string(), "--only_userspace".to_string()])
    }
}

/// Parse a vendor atrace categories description. Categories start at the
/// beginning of a line and are followed by the events they imply, one per
/// line and indented:
///
/// ```text
/// gfx
///  mali/gpu_power_state
///  mali/mali_pm_status
/// ```
pub fn parse_vendor_categories(content: &str) -> VendorEvents {
    let mut events = VendorEvents::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            let category = line.trim().to_string();
            events.entry(category.clone()).or_default();
            current = Some(category);
            continue;
        }

        let Some(category) = &current else {
            warn!("Vendor event without a category: {}", line.trim());
            continue;
        };
        match line.trim().parse::<GroupAndName>() {
            Ok(event) => events.entry(category.clone()).or_default().push(event),
            Err(e) => warn!("Skipping vendor event for category {category}: {e}"),
        }
    }

    events
}

/// Load vendor atrace categories from a file.
pub fn load_vendor_categories<P: AsRef<Path>>(path: P) -> Result<VendorEvents> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    Ok(parse_vendor_categories(&content))
}

enum CategoryEvent {
    /// A single event.
    Event(&'static str, &'static str),
    /// All the known events of a group.
    Group(&'static str),
}

use CategoryEvent::{Event as Ev, Group as Gr};

/// Kernel events implied by the well-known atrace categories. Keep in line
/// with what the atrace helper itself enables.
static CATEGORIES: Lazy<HashMap<&'static str, Vec<CategoryEvent>>> = Lazy::new(|| {
    HashMap::from([
        (
            "gfx",
            vec![
                Gr("mdss"),
                Ev("mdss", "rotator_bw_ao_as_context"),
                Ev("mdss", "mdp_trace_counter"),
                Ev("mdss", "tracing_mark_write"),
                Ev("mdss", "mdp_cmd_wait_pingpong"),
                Ev("mdss", "mdp_cmd_kickoff"),
                Ev("mdss", "mdp_commit"),
                Ev("mdss", "mdp_video_underrun_done"),
                Gr("sde"),
                Ev("sde", "tracing_mark_write"),
                Ev("sde", "sde_perf_update_bus"),
                Ev("sde", "sde_perf_set_qos_luts"),
                Ev("sde", "sde_perf_set_ot"),
                Ev("sde", "sde_perf_set_danger_luts"),
                Ev("sde", "sde_perf_crtc_update"),
                Ev("sde", "sde_perf_calc_crtc"),
                Ev("sde", "sde_evtlog"),
                Ev("sde", "sde_encoder_underrun"),
                Ev("sde", "sde_cmd_release_bw"),
                Gr("dpu"),
                Ev("dpu", "tracing_mark_write"),
                Gr("g2d"),
                Ev("g2d", "tracing_mark_write"),
                Ev("g2d", "g2d_perf_update_qos"),
            ],
        ),
        (
            "ion",
            vec![
                Ev("kmem", "ion_alloc_buffer_start"),
                Ev("kmem", "ion_alloc_buffer_end"),
                Ev("kmem", "ion_alloc_buffer_fail"),
                Ev("kmem", "ion_alloc_buffer_fallback"),
                Ev("kmem", "ion_heap_grow"),
                Ev("kmem", "ion_heap_shrink"),
            ],
        ),
        (
            "sched",
            vec![
                Ev("sched", "sched_switch"),
                Ev("sched", "sched_wakeup"),
                Ev("sched", "sched_waking"),
                Ev("sched", "sched_blocked_reason"),
                Ev("sched", "sched_cpu_hotplug"),
                Ev("sched", "sched_pi_setprio"),
                Ev("sched", "sched_process_exit"),
                Gr("cgroup"),
                Ev("oom", "oom_score_adj_update"),
                Ev("task", "task_rename"),
                Ev("task", "task_newtask"),
            ],
        ),
        ("irq", vec![Gr("irq"), Gr("ipi")]),
        (
            "irqoff",
            vec![
                Ev("preemptirq", "irq_enable"),
                Ev("preemptirq", "irq_disable"),
            ],
        ),
        (
            "preemptoff",
            vec![
                Ev("preemptirq", "preempt_enable"),
                Ev("preemptirq", "preempt_disable"),
            ],
        ),
        (
            "i2c",
            vec![
                Gr("i2c"),
                Ev("i2c", "i2c_read"),
                Ev("i2c", "i2c_write"),
                Ev("i2c", "i2c_result"),
                Ev("i2c", "i2c_reply"),
                Ev("i2c", "smbus_read"),
                Ev("i2c", "smbus_write"),
                Ev("i2c", "smbus_result"),
                Ev("i2c", "smbus_reply"),
            ],
        ),
        (
            "freq",
            vec![
                Ev("power", "cpu_frequency"),
                Ev("power", "gpu_frequency"),
                Gr("clk"),
                Ev("clk", "clk_set_rate"),
                Ev("clk", "clk_enable"),
                Ev("clk", "clk_disable"),
                Ev("power", "cpu_frequency_limits"),
                Ev("power", "suspend_resume"),
                Ev("cpuhp", "cpuhp_enter"),
                Ev("cpuhp", "cpuhp_exit"),
                Ev("cpuhp", "cpuhp_pause"),
            ],
        ),
        ("membus", vec![Gr("memory_bus")]),
        ("idle", vec![Ev("power", "cpu_idle")]),
        (
            "disk",
            vec![
                Ev("f2fs", "f2fs_sync_file_enter"),
                Ev("f2fs", "f2fs_sync_file_exit"),
                Ev("f2fs", "f2fs_write_begin"),
                Ev("f2fs", "f2fs_write_end"),
                Ev("ext4", "ext4_da_write_begin"),
                Ev("ext4", "ext4_da_write_end"),
                Ev("ext4", "ext4_sync_file_enter"),
                Ev("ext4", "ext4_sync_file_exit"),
                Ev("block", "block_rq_issue"),
                Ev("block", "block_rq_complete"),
            ],
        ),
        ("mmc", vec![Gr("mmc")]),
        ("load", vec![Gr("cpufreq_interactive")]),
        ("sync", vec![Gr("sync"), Gr("fence"), Gr("dma_fence")]),
        ("workq", vec![Gr("workqueue")]),
        (
            "memreclaim",
            vec![
                Ev("vmscan", "mm_vmscan_direct_reclaim_begin"),
                Ev("vmscan", "mm_vmscan_direct_reclaim_end"),
                Ev("vmscan", "mm_vmscan_kswapd_wake"),
                Ev("vmscan", "mm_vmscan_kswapd_sleep"),
                Gr("lowmemorykiller"),
            ],
        ),
        ("regulators", vec![Gr("regulator")]),
        (
            "binder_driver",
            vec![
                Ev("binder", "binder_transaction"),
                Ev("binder", "binder_transaction_received"),
                Ev("binder", "binder_transaction_alloc_buf"),
                Ev("binder", "binder_set_priority"),
            ],
        ),
        (
            "binder_lock",
            vec![
                Ev("binder", "binder_lock"),
                Ev("binder", "binder_locked"),
                Ev("binder", "binder_unlock"),
            ],
        ),
        ("pagecache", vec![Gr("filemap")]),
        (
            "memory",
            vec![
                Ev("kmem", "rss_stat"),
                Ev("kmem", "ion_heap_grow"),
                Ev("kmem", "ion_heap_shrink"),
                Ev("ion", "ion_stat"),
                Ev("mm_event", "mm_event_record"),
                Ev("dmabuf_heap", "dma_heap_stat"),
                Ev("gpu_mem", "gpu_mem_total"),
            ],
        ),
        (
            "thermal",
            vec![
                Ev("thermal", "thermal_temperature"),
                Ev("thermal", "cdev_update"),
            ],
        ),
    ])
});

/// Kernel events implied by a well-known atrace category. Whole groups are
/// expanded using the translation table. Unknown categories imply nothing.
pub fn builtin_category_events(
    category: &str,
    table: &dyn TranslationTable,
) -> BTreeSet<GroupAndName> {
    let mut events = BTreeSet::new();

    if let Some(implied) = CATEGORIES.get(category) {
        implied.iter().for_each(|e| match e {
            Ev(group, name) => {
                events.insert(GroupAndName::new(group, name));
            }
            Gr(group) => events.extend(
                table
                    .events_in_group(group)
                    .iter()
                    .map(|e| e.group_and_name()),
            ),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftrace::table::EventTable;

    #[test]
    fn vendor_categories() {
        let events = load_vendor_categories("test_data/vendor_categories.txt").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events["gfx"],
            vec![
                GroupAndName::new("vendor_gpu", "gpu_work_period"),
                GroupAndName::new("vendor_gpu", "gpu_mem_total"),
            ]
        );
        // Unqualified event names are skipped.
        assert_eq!(events["memory"], vec![GroupAndName::new("kmem", "rss_stat")]);
    }

    #[test]
    fn vendor_categories_edge_cases() {
        let events = parse_vendor_categories(" orphan/event\nempty\n\nfoo\n\tbar/baz\n");
        assert_eq!(events.len(), 2);
        assert!(events["empty"].is_empty());
        assert_eq!(events["foo"], vec![GroupAndName::new("bar", "baz")]);
    }

    #[test]
    fn builtin_categories() {
        let table = EventTable::load("test_data/available_events").unwrap();

        let sched = builtin_category_events("sched", &table);
        assert!(sched.contains(&GroupAndName::new("sched", "sched_switch")));
        assert!(sched.contains(&GroupAndName::new("task", "task_rename")));
        // Groups are expanded from the table.
        assert!(sched.contains(&GroupAndName::new("cgroup", "cgroup_mkdir")));
        assert!(sched.contains(&GroupAndName::new("cgroup", "cgroup_attach_task")));

        let irq = builtin_category_events("irq", &table);
        assert!(irq.contains(&GroupAndName::new("irq", "softirq_entry")));
        assert!(irq.contains(&GroupAndName::new("ipi", "ipi_exit")));

        assert!(builtin_category_events("view", &table).is_empty());
    }

    #[test]
    fn command_failure() {
        let atrace = AtraceCommand::new("/nonexistent/atrace");
        assert!(atrace.start(&[], &["sched".to_string()]).is_err());
        assert!(atrace.stop().is_err());

        let atrace = AtraceCommand::new("false");
        assert!(atrace.stop().is_err());

        let atrace = AtraceCommand::new("true");
        assert!(atrace.stop().is_ok());
    }
}
