//! Process-wide mutable state: the four build-time knobs from the source
//! (re-cast as runtime atomics so a hosted crate can flip them per test
//! instead of per compile), plus the advisory RAM-size globals.
//!
//! Mirrors the singleton-with-atomic-access pattern used for global mutable
//! flags elsewhere in this codebase's ancestry (a lazily-initialized static,
//! read on the hot path without locking).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Cap under which `block_alloc` is allowed to dynamically raise a pool
/// order's `max`. Matches `ALLOW_DYNAMIC_RAISE` in the source.
pub const DEFAULT_ALLOW_DYNAMIC_RAISE: i64 = 512;

/// Process-wide configuration and advisory memory bookkeeping.
///
/// Flips are relaxed-ordered and take effect on subsequent calls, per the
/// concurrency model: these are read on the hot allocation path and must
/// never block.
pub struct BrickConfig {
    debug_mem: AtomicBool,
    mem_retry: AtomicBool,
    mem_prealloc: AtomicBool,
    allow_dynamic_raise: AtomicI64,
    allow_freelist: AtomicBool,
    memavail_kib: AtomicI64,
    memlimit_kib: AtomicI64,
}

impl BrickConfig {
    const fn new() -> Self {
        Self {
            debug_mem: AtomicBool::new(cfg!(feature = "debug-mem")),
            mem_retry: AtomicBool::new(cfg!(feature = "mem-retry")),
            mem_prealloc: AtomicBool::new(cfg!(feature = "mem-prealloc")),
            allow_dynamic_raise: AtomicI64::new(DEFAULT_ALLOW_DYNAMIC_RAISE),
            allow_freelist: AtomicBool::new(true),
            memavail_kib: AtomicI64::new(0),
            memlimit_kib: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn debug_mem(&self) -> bool {
        self.debug_mem.load(Ordering::Relaxed)
    }

    pub fn set_debug_mem(&self, on: bool) {
        self.debug_mem.store(on, Ordering::Relaxed);
    }

    #[inline]
    pub fn mem_retry(&self) -> bool {
        self.mem_retry.load(Ordering::Relaxed)
    }

    pub fn set_mem_retry(&self, on: bool) {
        self.mem_retry.store(on, Ordering::Relaxed);
    }

    #[inline]
    pub fn mem_prealloc(&self) -> bool {
        self.mem_prealloc.load(Ordering::Relaxed)
    }

    pub fn set_mem_prealloc(&self, on: bool) {
        self.mem_prealloc.store(on, Ordering::Relaxed);
    }

    #[inline]
    pub fn allow_dynamic_raise(&self) -> i64 {
        self.allow_dynamic_raise.load(Ordering::Relaxed)
    }

    pub fn set_allow_dynamic_raise(&self, v: i64) {
        self.allow_dynamic_raise.store(v, Ordering::Relaxed);
    }

    #[inline]
    pub fn allow_freelist(&self) -> bool {
        self.allow_freelist.load(Ordering::Relaxed)
    }

    pub fn set_allow_freelist(&self, on: bool) {
        self.allow_freelist.store(on, Ordering::Relaxed);
    }

    pub fn global_memavail_kib(&self) -> i64 {
        self.memavail_kib.load(Ordering::Relaxed)
    }

    pub fn set_global_memavail_kib(&self, kib: i64) {
        self.memavail_kib.store(kib, Ordering::Relaxed);
    }

    pub fn global_memlimit_kib(&self) -> i64 {
        self.memlimit_kib.load(Ordering::Relaxed)
    }

    pub fn set_global_memlimit_kib(&self, kib: i64) {
        self.memlimit_kib.store(kib, Ordering::Relaxed);
    }
}

/// The process-wide configuration instance.
pub static CONFIG: BrickConfig = BrickConfig::new();

#[inline]
pub fn config() -> &'static BrickConfig {
    &CONFIG
}

/// Queries the host for total RAM and records it in `global_memavail`,
/// mirroring the source's `get_total_ram`. Best-effort: a host that doesn't
/// expose this leaves the field at its previous value.
pub fn init_memavail() {
    if let Some(kib) = host_total_ram_kib() {
        CONFIG.set_global_memavail_kib(kib);
        tracing::info!(total_ram_kib = kib, "queried host RAM size");
    }
}

#[cfg(unix)]
fn host_total_ram_kib() -> Option<i64> {
    // SAFETY: sysconf with these names is always safe to call; a negative
    // return means the host doesn't know, which we treat as "unavailable".
    unsafe {
        let pages = libc::sysconf(libc::_SC_PHYS_PAGES);
        let page_size = libc::sysconf(libc::_SC_PAGESIZE);
        if pages < 0 || page_size < 0 {
            return None;
        }
        Some((pages as i64) * (page_size as i64) / 1024)
    }
}

#[cfg(windows)]
fn host_total_ram_kib() -> Option<i64> {
    use windows_sys::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};
    let mut status: MEMORYSTATUSEX = unsafe { std::mem::zeroed() };
    status.dwLength = std::mem::size_of::<MEMORYSTATUSEX>() as u32;
    // SAFETY: status is a valid, correctly-sized buffer.
    let ok = unsafe { GlobalMemoryStatusEx(&mut status) };
    if ok == 0 {
        None
    } else {
        Some((status.ullTotalPhys / 1024) as i64)
    }
}
