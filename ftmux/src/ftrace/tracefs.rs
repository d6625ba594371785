//! # Tracefs
//!
//! Access to the kernel ftrace control files. The muxer only talks to
//! tracefs through the `Tracefs` trait; `TracefsDir` implements it on top of
//! a mounted tracefs directory.
use std::{
    collections::BTreeSet,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use super::buffer::host_page_size;

/// Known tracefs mount points, in order of preference.
pub const TRACEFS_PATHS: &[&str] = &["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Operations on the shared ftrace state.
pub trait Tracefs {
    /// Enable a single event.
    fn enable_event(&self, group: &str, name: &str) -> Result<()>;
    /// Disable a single event.
    fn disable_event(&self, group: &str, name: &str) -> Result<()>;
    /// Disable every event, whoever enabled it.
    fn disable_all_events(&self) -> Result<()>;
    /// Names of the events the kernel exposes in a group.
    fn event_names_in_group(&self, group: &str) -> Result<BTreeSet<String>>;
    /// Set the per-CPU ring buffer size.
    fn set_cpu_buffer_size_pages(&self, pages: usize) -> Result<()>;
    /// Currently selected trace clock.
    fn clock(&self) -> Result<String>;
    /// Trace clocks supported by the kernel.
    fn available_clocks(&self) -> Result<BTreeSet<String>>;
    fn set_clock(&self, clock: &str) -> Result<()>;
    fn is_tracing_on(&self) -> Result<bool>;
    fn set_tracing_on(&self, on: bool) -> Result<()>;
    fn current_tracer(&self) -> Result<String>;
    fn set_current_tracer(&self, tracer: &str) -> Result<()>;
    /// Restrict raw_syscalls events to the given syscall ids. An empty set
    /// removes the restriction.
    fn set_syscall_filter(&self, ids: &BTreeSet<usize>) -> Result<()>;
    /// Drop the content of the ring buffers.
    fn clear_trace(&self) -> Result<()>;
    /// Add functions to trace with the function tracers.
    fn append_function_filters(&self, filters: &[String]) -> Result<()>;
    /// Add function_graph root functions.
    fn append_function_graph_roots(&self, roots: &[String]) -> Result<()>;
}

/// Tracefs implementation writing to the files of a tracefs mount.
pub struct TracefsDir {
    root: PathBuf,
    page_size: usize,
}

impl TracefsDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            page_size: host_page_size(),
        }
    }

    /// Find where tracefs is mounted.
    pub fn discover() -> Result<Self> {
        TRACEFS_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.join("trace").exists())
            .map(Self::new)
            .ok_or_else(|| {
                anyhow!(
                    "Could not find tracefs in {}: consider mounting it, if not a permissions issue",
                    TRACEFS_PATHS.join(", ")
                )
            })
    }

    /// Use a given page size for buffer size conversions.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, file: &str) -> Result<String> {
        let path = self.root.join(file);
        fs::read_to_string(&path).with_context(|| format!("Could not read {}", path.display()))
    }

    fn write(&self, file: &str, content: &str) -> Result<()> {
        let path = self.root.join(file);
        // Control files always exist: never create them.
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .and_then(|mut f| f.write_all(content.as_bytes()))
            .with_context(|| format!("Could not write '{}' to {}", content, path.display()))
    }

    fn append(&self, file: &str, entries: &[String]) -> Result<()> {
        let path = self.root.join(file);
        let mut f = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("Could not open {}", path.display()))?;
        // Each write is parsed separately by the kernel.
        for entry in entries.iter() {
            f.write_all(format!("{entry}\n").as_bytes())
                .with_context(|| format!("Could not append '{entry}' to {}", path.display()))?;
        }
        Ok(())
    }

    fn event_enable_file(group: &str, name: &str) -> String {
        format!("events/{group}/{name}/enable")
    }

    /// Parse trace_clock, e.g. "local [global] counter boot". Returns the
    /// available clocks and the selected one.
    fn parse_clocks(content: &str) -> (BTreeSet<String>, Option<String>) {
        let mut current = None;
        let clocks: BTreeSet<String> = content
            .split_whitespace()
            .map(|clock| match clock.strip_prefix('[').and_then(|c| c.strip_suffix(']')) {
                Some(selected) => {
                    current = Some(selected.to_string());
                    selected.to_string()
                }
                None => clock.to_string(),
            })
            .collect();
        (clocks, current)
    }

    fn syscall_filter_string(ids: &BTreeSet<usize>) -> String {
        if ids.is_empty() {
            return "0".to_string();
        }
        ids.iter()
            .map(|id| format!("id == {id}"))
            .collect::<Vec<_>>()
            .join(" || ")
    }
}

impl Tracefs for TracefsDir {
    fn enable_event(&self, group: &str, name: &str) -> Result<()> {
        self.write(&Self::event_enable_file(group, name), "1")
    }

    fn disable_event(&self, group: &str, name: &str) -> Result<()> {
        self.write(&Self::event_enable_file(group, name), "0")
    }

    fn disable_all_events(&self) -> Result<()> {
        self.write("events/enable", "0")
    }

    fn event_names_in_group(&self, group: &str) -> Result<BTreeSet<String>> {
        let path = self.root.join("events").join(group);
        let mut names = BTreeSet::new();

        for entry in
            fs::read_dir(&path).with_context(|| format!("Could not list {}", path.display()))?
        {
            let entry = entry?;
            // Groups also hold their own "enable" and "filter" files.
            if entry.file_type()?.is_dir() {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    fn set_cpu_buffer_size_pages(&self, pages: usize) -> Result<()> {
        if pages == 0 {
            bail!("Can't set a per-CPU buffer of 0 pages");
        }
        let kb = pages * self.page_size / 1024;
        debug!("Setting the per-CPU buffer size to {kb} kB ({pages} pages)");
        self.write("buffer_size_kb", &kb.to_string())
    }

    fn clock(&self) -> Result<String> {
        Self::parse_clocks(&self.read("trace_clock")?)
            .1
            .ok_or_else(|| anyhow!("No trace clock is selected"))
    }

    fn available_clocks(&self) -> Result<BTreeSet<String>> {
        Ok(Self::parse_clocks(&self.read("trace_clock")?).0)
    }

    fn set_clock(&self, clock: &str) -> Result<()> {
        self.write("trace_clock", clock)
    }

    fn is_tracing_on(&self) -> Result<bool> {
        match self.read("tracing_on")?.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            x => bail!("Unexpected tracing_on value '{x}'"),
        }
    }

    fn set_tracing_on(&self, on: bool) -> Result<()> {
        self.write("tracing_on", if on { "1" } else { "0" })
    }

    fn current_tracer(&self) -> Result<String> {
        Ok(self.read("current_tracer")?.trim().to_string())
    }

    fn set_current_tracer(&self, tracer: &str) -> Result<()> {
        self.write("current_tracer", tracer)
    }

    fn set_syscall_filter(&self, ids: &BTreeSet<usize>) -> Result<()> {
        let filter = Self::syscall_filter_string(ids);
        ["sys_enter", "sys_exit"]
            .iter()
            .try_for_each(|event| self.write(&format!("events/raw_syscalls/{event}/filter"), &filter))
    }

    fn clear_trace(&self) -> Result<()> {
        self.write("trace", "")
    }

    fn append_function_filters(&self, filters: &[String]) -> Result<()> {
        self.append("set_ftrace_filter", filters)
    }

    fn append_function_graph_roots(&self, roots: &[String]) -> Result<()> {
        self.append("set_graph_function", roots)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, read_to_string, write};

    use tempfile::TempDir;

    use super::*;

    /// Builds a fake tracefs tree holding the files we use.
    fn fake_tracefs() -> (TempDir, TracefsDir) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        for (group, name) in [
            ("sched", "sched_switch"),
            ("sched", "sched_waking"),
            ("raw_syscalls", "sys_enter"),
            ("raw_syscalls", "sys_exit"),
        ] {
            let event = root.join("events").join(group).join(name);
            create_dir_all(&event).unwrap();
            write(event.join("enable"), "0\n").unwrap();
            write(event.join("filter"), "none\n").unwrap();
        }
        write(root.join("events/sched/enable"), "0\n").unwrap();
        write(root.join("events/enable"), "0\n").unwrap();
        write(root.join("buffer_size_kb"), "1408\n").unwrap();
        write(root.join("trace_clock"), "[local] global counter uptime perf mono mono_raw boot\n")
            .unwrap();
        write(root.join("tracing_on"), "1\n").unwrap();
        write(root.join("current_tracer"), "nop\n").unwrap();
        write(root.join("trace"), "# tracer: nop\n").unwrap();
        write(root.join("set_ftrace_filter"), "").unwrap();
        write(root.join("set_graph_function"), "").unwrap();

        let tracefs = TracefsDir::new(root).with_page_size(4096);
        (dir, tracefs)
    }

    fn content(tracefs: &TracefsDir, file: &str) -> String {
        read_to_string(tracefs.root().join(file)).unwrap()
    }

    #[test]
    fn events() {
        let (_dir, tracefs) = fake_tracefs();

        tracefs.enable_event("sched", "sched_switch").unwrap();
        assert_eq!(content(&tracefs, "events/sched/sched_switch/enable"), "1");
        tracefs.disable_event("sched", "sched_switch").unwrap();
        assert_eq!(content(&tracefs, "events/sched/sched_switch/enable"), "0");

        // Unknown events can't be enabled.
        assert!(tracefs.enable_event("sched", "nope").is_err());
        assert!(tracefs.root().join("events/sched/nope").metadata().is_err());

        tracefs.disable_all_events().unwrap();
        assert_eq!(content(&tracefs, "events/enable"), "0");
    }

    #[test]
    fn group_listing() {
        let (_dir, tracefs) = fake_tracefs();

        assert_eq!(
            tracefs.event_names_in_group("sched").unwrap(),
            BTreeSet::from(["sched_switch".to_string(), "sched_waking".to_string()])
        );
        assert!(tracefs.event_names_in_group("nope").is_err());
    }

    #[test]
    fn buffer_size() {
        let (_dir, tracefs) = fake_tracefs();

        tracefs.set_cpu_buffer_size_pages(512).unwrap();
        assert_eq!(content(&tracefs, "buffer_size_kb"), "2048");
        assert!(tracefs.set_cpu_buffer_size_pages(0).is_err());
    }

    #[test]
    fn clocks() {
        let (_dir, tracefs) = fake_tracefs();

        assert_eq!(tracefs.clock().unwrap(), "local");
        let clocks = tracefs.available_clocks().unwrap();
        assert_eq!(clocks.len(), 8);
        assert!(clocks.contains("local"));
        assert!(clocks.contains("boot"));

        tracefs.set_clock("boot").unwrap();
        assert_eq!(content(&tracefs, "trace_clock"), "boot");
    }

    #[test]
    fn tracing_on_and_tracer() {
        let (_dir, tracefs) = fake_tracefs();

        assert!(tracefs.is_tracing_on().unwrap());
        tracefs.set_tracing_on(false).unwrap();
        assert!(!tracefs.is_tracing_on().unwrap());

        assert_eq!(tracefs.current_tracer().unwrap(), "nop");
        tracefs.set_current_tracer("function_graph").unwrap();
        assert_eq!(tracefs.current_tracer().unwrap(), "function_graph");
    }

    #[test]
    fn syscall_filter() {
        let (_dir, tracefs) = fake_tracefs();

        tracefs.set_syscall_filter(&BTreeSet::from([0, 2])).unwrap();
        for event in ["sys_enter", "sys_exit"] {
            assert_eq!(
                content(&tracefs, &format!("events/raw_syscalls/{event}/filter")),
                "id == 0 || id == 2"
            );
        }

        tracefs.set_syscall_filter(&BTreeSet::new()).unwrap();
        assert_eq!(content(&tracefs, "events/raw_syscalls/sys_enter/filter"), "0");
    }

    #[test]
    fn clear_and_function_filters() {
        let (_dir, tracefs) = fake_tracefs();

        tracefs.clear_trace().unwrap();
        assert_eq!(content(&tracefs, "trace"), "");

        tracefs
            .append_function_filters(&["vfs_read".to_string(), "vfs_write".to_string()])
            .unwrap();
        tracefs
            .append_function_filters(&["do_sys_open".to_string()])
            .unwrap();
        assert_eq!(
            content(&tracefs, "set_ftrace_filter"),
            "vfs_read\nvfs_write\ndo_sys_open\n"
        );

        tracefs
            .append_function_graph_roots(&["schedule".to_string()])
            .unwrap();
        assert_eq!(content(&tracefs, "set_graph_function"), "schedule\n");
    }
}
