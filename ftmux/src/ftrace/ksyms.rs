//! # Kernel symbols
//!
//! Sessions asking for kernel address symbolization need the kernel symbol
//! table to be readable with real addresses.
use std::{fs, path::PathBuf};

use log::{debug, warn};

/// Tells whether kernel symbols can be resolved.
pub trait Ksyms {
    fn available(&self) -> bool;
}

/// Checks /proc/kallsyms (or a copy of it).
pub struct Kallsyms {
    path: PathBuf,
}

impl Kallsyms {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl Default for Kallsyms {
    fn default() -> Self {
        Self::new("/proc/kallsyms")
    }
}

impl Ksyms for Kallsyms {
    fn available(&self) -> bool {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read {}: {e}", self.path.display());
                return false;
            }
        };

        // Without the right privileges all addresses are reported as 0.
        let available = content.lines().any(|line| {
            line.split(' ')
                .next()
                .and_then(|addr| u64::from_str_radix(addr, 16).ok())
                .is_some_and(|addr| addr != 0)
        });
        if !available {
            debug!(
                "{} only exposes null addresses, likely missing privileges",
                self.path.display()
            );
        }
        available
    }
}
