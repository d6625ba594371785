//! # Buffer size policy
//!
//! Converts the per-CPU buffer size a session asks for into the number of
//! pages written to tracefs.
use log::warn;
use nix::unistd::{sysconf, SysconfVar};
use once_cell::sync::Lazy;

/// Per-CPU buffer size used when a session does not ask for one.
pub const DEFAULT_PER_CPU_BUFFER_SIZE_KB: usize = 2 * 1024;
/// Largest per-CPU buffer we will ever ask for (64 MiB).
pub const MAX_PER_CPU_BUFFER_SIZE_KB: usize = 64 * 1024;
/// The kernel needs at least one page per CPU.
pub const MIN_PER_CPU_BUFFER_SIZE_PAGES: usize = 1;

const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| match sysconf(SysconfVar::PAGE_SIZE) {
    Ok(Some(size)) if size > 0 => size as usize,
    Ok(_) => FALLBACK_PAGE_SIZE,
    Err(e) => {
        warn!("Could not get the page size ({e}), assuming {FALLBACK_PAGE_SIZE}");
        FALLBACK_PAGE_SIZE
    }
});

/// Page size of the running host.
pub fn host_page_size() -> usize {
    *PAGE_SIZE
}

/// Number of pages per CPU to allocate for a requested size in kB. A zero
/// request gets the default size, oversized requests are clamped to the
/// maximum and the result is never below one page.
pub fn compute_cpu_buffer_size_in_pages(requested_kb: usize, page_size: usize) -> usize {
    let kb = match requested_kb {
        0 => DEFAULT_PER_CPU_BUFFER_SIZE_KB,
        kb => kb.min(MAX_PER_CPU_BUFFER_SIZE_KB),
    };

    let page_kb = (page_size / 1024).max(1);
    (kb / page_kb).max(MIN_PER_CPU_BUFFER_SIZE_PAGES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 4096 => 512 ; "zero gets the default")]
    #[test_case(1, 4096 => 1 ; "below one page clamps up")]
    #[test_case(3, 4096 => 1 ; "below one page clamps up again")]
    #[test_case(4, 4096 => 1 ; "exactly one page")]
    #[test_case(42, 4096 => 10 ; "rounds down to pages")]
    #[test_case(1024, 4096 => 256 ; "one megabyte")]
    #[test_case(64 * 1024, 4096 => 16384 ; "maximum")]
    #[test_case(64 * 1024 + 1, 4096 => 16384 ; "just above the maximum")]
    #[test_case(1024 * 1024, 4096 => 16384 ; "way above the maximum")]
    #[test_case(0, 16384 => 128 ; "default with 16k pages")]
    #[test_case(8, 16384 => 1 ; "below one 16k page")]
    fn pages(kb: usize, page_size: usize) -> usize {
        compute_cpu_buffer_size_in_pages(kb, page_size)
    }

    #[test]
    fn pure() {
        for kb in [0, 1, 100, 4096, 1 << 30] {
            assert_eq!(
                compute_cpu_buffer_size_in_pages(kb, 4096),
                compute_cpu_buffer_size_in_pages(kb, 4096)
            );
        }
    }

    #[test]
    fn host_page_size_is_sane() {
        let size = host_page_size();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }
}
