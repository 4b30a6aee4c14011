//! perf_event_open plumbing for the DAMON tracepoint
//!
//! The counter is opened on the kdamond thread and its ring is mapped
//! read-write so the reader can publish `data_tail` back to the kernel.
//!
//! ```text
//!   mmap base ──▶ [ metadata page | data page 0 | ... | data page N-1 ]
//!                   head @1024 (kernel writes, Acquire)
//!                   tail @1032 (we write, Release)
//! ```

#![allow(unsafe_code)] // perf_event_open, mmap and ioctl have no safe wrappers

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use damontop_common::{
    PerfEventAttr, ATTR_FLAG_DISABLED, ATTR_FLAG_SAMPLE_ID_ALL, ATTR_FLAG_WATERMARK, DAMON_SAMPLE_TYPE,
    MMAP_PAGE_DATA_HEAD, MMAP_PAGE_DATA_TAIL, PERF_ATTR_SIZE, PERF_EVENT_IOC_DISABLE, PERF_EVENT_IOC_ENABLE,
    PERF_FLAG_FD_CLOEXEC, PERF_FORMAT_ID,
};
use log::debug;

use super::counters::CounterConfig;
use super::record::{decode_available, DamonSample, DecodeStats};
use super::ring::{RingReader, RingStorage};
use crate::domain::{Pid, ProfilerError};

/// Where the sampling worker gets its records from
///
/// The worker drives one source through setup, enable/disable and decode;
/// tests substitute an in-memory one.
pub trait SampleSource: Send {
    /// Open the counter on `target` and map its ring (disabled)
    ///
    /// # Errors
    /// Fails when the syscall or the mapping fails.
    fn setup(&mut self, counter: &CounterConfig, target: Pid) -> Result<(), ProfilerError>;

    /// # Errors
    /// Fails when the counter is not open or the ioctl fails.
    fn enable(&mut self) -> Result<(), ProfilerError>;

    /// # Errors
    /// Fails when the ioctl fails. Disabling a closed source is a no-op.
    fn disable(&mut self) -> Result<(), ProfilerError>;

    fn is_open(&self) -> bool;

    /// Decode everything currently buffered
    fn decode(&mut self, numa: bool, out: &mut Vec<DamonSample>) -> DecodeStats;

    /// Drop everything currently buffered
    fn reset(&mut self);

    /// Close the counter and unmap the ring
    fn release(&mut self);
}

/// Attribute block for a resolved counter
#[must_use]
pub fn build_attr(counter: &CounterConfig) -> PerfEventAttr {
    PerfEventAttr {
        type_: counter.perf_type,
        size: PERF_ATTR_SIZE,
        config: counter.config,
        sample_period: 1,
        sample_type: DAMON_SAMPLE_TYPE,
        read_format: PERF_FORMAT_ID,
        flags: ATTR_FLAG_DISABLED | ATTR_FLAG_WATERMARK | ATTR_FLAG_SAMPLE_ID_ALL,
        ..PerfEventAttr::default()
    }
}

/// System page size
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

// =============================================================================
// MAPPED RING
// =============================================================================

/// A perf ring mapped from a counter fd
pub struct MmapRing {
    base: NonNull<u8>,
    len: usize,
    page_size: usize,
}

// SAFETY: the mapping is owned exclusively by this value; the kernel is the
// only other party and synchronises through the head/tail atomics.
unsafe impl Send for MmapRing {}

impl MmapRing {
    /// Map `len` bytes of `fd`
    ///
    /// # Errors
    /// Returns [`ProfilerError::MmapFailed`] when the kernel refuses.
    pub fn map(fd: &OwnedFd, len: usize, page_size: usize) -> Result<Self, ProfilerError> {
        // SAFETY: fresh shared mapping of a perf fd; checked against MAP_FAILED
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(ProfilerError::MmapFailed { len, error: std::io::Error::last_os_error() });
        }
        let base = NonNull::new(addr.cast::<u8>())
            .ok_or(ProfilerError::MmapFailed { len, error: std::io::Error::other("null mapping") })?;
        Ok(Self { base, len, page_size })
    }

    fn cursor(&self, offset: usize) -> &AtomicU64 {
        // SAFETY: offsets are inside the metadata page and 8-byte aligned
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicU64>() }
    }
}

impl RingStorage for MmapRing {
    fn load_head(&self) -> u64 {
        self.cursor(MMAP_PAGE_DATA_HEAD).load(Ordering::Acquire)
    }

    fn load_tail(&self) -> u64 {
        self.cursor(MMAP_PAGE_DATA_TAIL).load(Ordering::Relaxed)
    }

    fn store_tail(&mut self, tail: u64) {
        self.cursor(MMAP_PAGE_DATA_TAIL).store(tail, Ordering::Release);
    }

    fn data(&self) -> &[u8] {
        // SAFETY: the data area follows the metadata page and lives as long
        // as the mapping; bytes behind the tail are not rewritten until the
        // tail is published.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(self.page_size), self.len - self.page_size) }
    }
}

impl Drop for MmapRing {
    fn drop(&mut self) {
        // SAFETY: base/len come from a successful mmap
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

// =============================================================================
// PERF SOURCE
// =============================================================================

struct OpenCounter {
    fd: OwnedFd,
    reader: RingReader<MmapRing>,
}

/// [`SampleSource`] backed by a real perf counter
pub struct PerfSampleSource {
    page_size: usize,
    open: Option<OpenCounter>,
}

impl Default for PerfSampleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfSampleSource {
    #[must_use]
    pub fn new() -> Self {
        Self { page_size: page_size(), open: None }
    }

    fn ioctl(&self, request: u64) -> Result<(), ProfilerError> {
        let Some(open) = &self.open else {
            return Err(ProfilerError::NotOpen);
        };
        // SAFETY: fd is a live perf fd; both requests take no argument
        let ret = unsafe { libc::ioctl(open.fd.as_raw_fd(), request as _, 0) };
        if ret < 0 {
            return Err(ProfilerError::IoctlFailed { request, error: std::io::Error::last_os_error() });
        }
        Ok(())
    }
}

impl SampleSource for PerfSampleSource {
    fn setup(&mut self, counter: &CounterConfig, target: Pid) -> Result<(), ProfilerError> {
        self.release();

        let attr = build_attr(counter);
        debug!("perf setup: type {:#x}, config {:#x}, pid {}", attr.type_, attr.config, target.0);

        // SAFETY: attr is a valid PERF_ATTR_SIZE block for the duration of the call
        let ret = unsafe {
            libc::syscall(
                libc::SYS_perf_event_open,
                std::ptr::addr_of!(attr),
                i32::from(target),
                -1i32,
                -1i32,
                PERF_FLAG_FD_CLOEXEC,
            )
        };
        if ret < 0 {
            return Err(ProfilerError::OpenFailed { pid: i32::from(target), error: std::io::Error::last_os_error() });
        }
        let raw = i32::try_from(ret).map_err(|_| ProfilerError::NotOpen)?;
        // SAFETY: the syscall returned a fresh fd that nothing else owns
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let ring = MmapRing::map(&fd, counter.map_len(self.page_size), self.page_size)?;
        self.open = Some(OpenCounter { fd, reader: RingReader::new(ring) });
        Ok(())
    }

    fn enable(&mut self) -> Result<(), ProfilerError> {
        self.ioctl(PERF_EVENT_IOC_ENABLE)
    }

    fn disable(&mut self) -> Result<(), ProfilerError> {
        if self.open.is_none() {
            return Ok(());
        }
        self.ioctl(PERF_EVENT_IOC_DISABLE)
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    fn decode(&mut self, numa: bool, out: &mut Vec<DamonSample>) -> DecodeStats {
        match &mut self.open {
            Some(open) => decode_available(&mut open.reader, numa, out),
            None => DecodeStats::default(),
        }
    }

    fn reset(&mut self) {
        if let Some(open) = &mut self.open {
            open.reader.reset();
        }
    }

    fn release(&mut self) {
        // Unmap before the fd closes
        if let Some(OpenCounter { fd, reader }) = self.open.take() {
            drop(reader);
            drop(fd);
        }
    }
}
