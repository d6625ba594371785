//! # Tracefs mount
//!
//! Tracefs might not be mounted when running in namespaces and containers.
use std::path::Path;

use anyhow::{bail, Result};
use log::{debug, warn};
use nix::{errno::Errno, mount::*, unistd::Uid};

const TRACEFS_TARGET: &str = "/sys/kernel/tracing";

/// Tracefs mount made on our behalf, unmounted when dropped.
pub(crate) struct TracefsMount {
    mounted: bool,
}

impl TracefsMount {
    /// Mount tracefs if not already mounted (and if we can).
    pub(crate) fn mount() -> Result<Self> {
        if !Uid::effective().is_root() {
            bail!("ftmux needs to be run as root when --allow-system-changes is used");
        }

        let mounted = match mount(
            None::<&Path>,
            Path::new(TRACEFS_TARGET),
            Some("tracefs"),
            MsFlags::empty(),
            None::<&str>,
        ) {
            Ok(_) => {
                debug!("Mounted tracefs to {TRACEFS_TARGET}");
                true
            }
            Err(Errno::EBUSY) => {
                debug!("Tracefs is already mounted to {TRACEFS_TARGET}");
                false
            }
            Err(errno) => {
                warn!("Could not mount tracefs to {TRACEFS_TARGET}: {errno}");
                false
            }
        };

        Ok(Self { mounted })
    }
}

impl Drop for TracefsMount {
    fn drop(&mut self) {
        if self.mounted {
            debug!("Unmounting tracefs");
            if let Err(e) = umount(TRACEFS_TARGET) {
                warn!("Could not unmount {TRACEFS_TARGET}: {e}");
            }
        }
    }
}
