//! Process/system memory probes.

use serde::{Deserialize, Serialize};

/// Memory figures reported by a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMemoryInfo {
    /// Physical memory installed
    pub total_bytes: u64,
    /// Memory the OS reports as free
    pub free_bytes: u64,
    /// Memory used by this process
    pub used_bytes: u64,
}

/// Source of memory usage figures
///
/// The sampler and coordinator only ever read through this trait so tests
/// and embedders can supply synthetic figures. Any
/// `Fn() -> Option<SystemMemoryInfo>` closure is a probe.
pub trait MemoryProbe: Send + Sync {
    /// Current memory figures, `None` when the platform exposes none
    fn memory_info(&self) -> Option<SystemMemoryInfo>;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> Option<SystemMemoryInfo> + Send + Sync,
{
    fn memory_info(&self) -> Option<SystemMemoryInfo> {
        self()
    }
}

/// Probe reading this process's resident set size
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn memory_info(&self) -> Option<SystemMemoryInfo> {
        let used_bytes = current_rss_bytes()?;
        let total_bytes = physical_ram_bytes().unwrap_or(0);
        let free_bytes = free_ram_bytes().unwrap_or_else(|| total_bytes.saturating_sub(used_bytes));
        Some(SystemMemoryInfo {
            total_bytes,
            free_bytes,
            used_bytes,
        })
    }
}

#[cfg(target_os = "macos")]
pub fn physical_ram_bytes() -> Option<u64> {
    use std::ffi::CString;
    use std::mem::size_of;
    use std::ptr;

    let key = CString::new("hw.memsize").ok()?;
    let mut value: u64 = 0;
    let mut len = size_of::<u64>();
    let rc = unsafe {
        libc::sysctlbyname(
            key.as_ptr(),
            &mut value as *mut u64 as *mut libc::c_void,
            &mut len,
            ptr::null_mut(),
            0,
        )
    };
    if rc == 0 && len == size_of::<u64>() {
        Some(value)
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
pub fn physical_ram_bytes() -> Option<u64> {
    sysinfo().map(|info| (info.totalram as u64).saturating_mul(info.mem_unit as u64))
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn physical_ram_bytes() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn free_ram_bytes() -> Option<u64> {
    sysinfo().map(|info| (info.freeram as u64).saturating_mul(info.mem_unit as u64))
}

#[cfg(not(target_os = "linux"))]
fn free_ram_bytes() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn sysinfo() -> Option<libc::sysinfo> {
    let mut info = std::mem::MaybeUninit::<libc::sysinfo>::uninit();
    let rc = unsafe { libc::sysinfo(info.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    Some(unsafe { info.assume_init() })
}

#[cfg(target_os = "macos")]
pub fn current_rss_bytes() -> Option<u64> {
    let mut info = libc::mach_task_basic_info {
        virtual_size: 0,
        resident_size: 0,
        resident_size_max: 0,
        user_time: libc::time_value_t { seconds: 0, microseconds: 0 },
        system_time: libc::time_value_t { seconds: 0, microseconds: 0 },
        policy: 0,
        suspend_count: 0,
    };

    let mut count = libc::MACH_TASK_BASIC_INFO_COUNT;
    #[allow(deprecated)]
    let kr = unsafe {
        libc::task_info(
            libc::mach_task_self(),
            libc::MACH_TASK_BASIC_INFO,
            (&mut info as *mut libc::mach_task_basic_info).cast(),
            &mut count,
        )
    };
    if kr == libc::KERN_SUCCESS {
        Some(info.resident_size)
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
pub fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut fields = statm.split_whitespace();
    let _size_pages = fields.next()?;
    let rss_pages = fields.next()?.parse::<u64>().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(rss_pages.saturating_mul(page_size as u64))
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn current_rss_bytes() -> Option<u64> {
    None
}

/// Ask the allocator to hand freed pages back to the OS
///
/// Returns `true` if the allocator reported releasing memory. No-op on
/// platforms without such a hook.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn release_free_memory() -> bool {
    unsafe { libc::malloc_trim(0) == 1 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn release_free_memory() -> bool {
    false
}
