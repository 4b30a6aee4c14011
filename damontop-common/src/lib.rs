//! # Shared Kernel ABI Layouts (perf ring ↔ Userspace)
//!
//! Defines the raw structures and constants exchanged with the kernel through
//! `perf_event_open(2)` and its memory-mapped ring buffer. All types use
//! `#[repr(C)]` so their layout matches the kernel UAPI headers byte for byte.
//!
//! ## Key Types
//!
//! - [`PerfEventAttr`] - Counter configuration passed to `perf_event_open`
//! - [`PerfEventHeader`] - Header preceding every record in the ring
//! - [`damon_aggregated`] - Fixed offsets inside the `damon:damon_aggregated`
//!   tracepoint payload
//!
//! Everything here is `no_std` and allocation free so it can be shared by
//! any consumer of the raw ring bytes.

#![no_std]

// ============================================================================
// perf_event_attr constants
// ============================================================================

/// `PERF_TYPE_HARDWARE`: generic CPU hardware counters
pub const PERF_TYPE_HARDWARE: u32 = 0;

/// `PERF_TYPE_TRACEPOINT`: kernel tracepoint, `config` holds the event ID
pub const PERF_TYPE_TRACEPOINT: u32 = 2;

/// `PERF_TYPE_RAW`: raw PMU event
pub const PERF_TYPE_RAW: u32 = 4;

/// `PERF_COUNT_HW_CPU_CYCLES` for [`PERF_TYPE_HARDWARE`]
pub const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;

pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_TIME: u64 = 1 << 2;
pub const PERF_SAMPLE_CPU: u64 = 1 << 7;
pub const PERF_SAMPLE_PERIOD: u64 = 1 << 8;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;

/// Sample layout requested from the kernel.
///
/// The decoder reads fields in exactly this order: ip, pid/tid, time,
/// cpu/res, period, raw.
pub const DAMON_SAMPLE_TYPE: u64 = PERF_SAMPLE_IP
    | PERF_SAMPLE_TID
    | PERF_SAMPLE_TIME
    | PERF_SAMPLE_CPU
    | PERF_SAMPLE_PERIOD
    | PERF_SAMPLE_RAW;

/// `PERF_FORMAT_ID`
pub const PERF_FORMAT_ID: u64 = 1 << 2;

/// `PERF_FLAG_FD_CLOEXEC` for the `flags` argument of `perf_event_open`
pub const PERF_FLAG_FD_CLOEXEC: u64 = 1 << 3;

/// `PERF_EVENT_IOC_ENABLE` (`_IO('$', 0)`)
pub const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;

/// `PERF_EVENT_IOC_DISABLE` (`_IO('$', 1)`)
pub const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;

/// `PERF_ATTR_SIZE_VER5`, the size of [`PerfEventAttr`]
pub const PERF_ATTR_SIZE: u32 = 112;

// Bit positions inside `PerfEventAttr::flags`
pub const ATTR_FLAG_DISABLED: u64 = 1 << 0;
pub const ATTR_FLAG_WATERMARK: u64 = 1 << 14;
pub const ATTR_FLAG_SAMPLE_ID_ALL: u64 = 1 << 18;

// ============================================================================
// Ring buffer records
// ============================================================================

/// `PERF_RECORD_SAMPLE`
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// Offset of `data_head` inside `struct perf_event_mmap_page`
///
/// The metadata page reserves the first 1 KiB for capability and timing
/// fields, so the cursors always start at this fixed offset.
pub const MMAP_PAGE_DATA_HEAD: usize = 1024;

/// Offset of `data_tail` inside `struct perf_event_mmap_page`
pub const MMAP_PAGE_DATA_TAIL: usize = 1032;

/// Configuration passed to `perf_event_open(2)`
///
/// Mirrors `struct perf_event_attr` (ABI version 5). The kernel bitfield
/// block is flattened into [`PerfEventAttr::flags`]; use the `ATTR_FLAG_*`
/// constants to set individual bits.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerfEventAttr {
    /// Major event type (`PERF_TYPE_*`)
    pub type_: u32,
    /// Size of this structure, always [`PERF_ATTR_SIZE`]
    pub size: u32,
    /// Type-specific configuration (tracepoint ID for tracepoints)
    pub config: u64,
    /// Overflow period; 1 means every event produces a sample
    pub sample_period: u64,
    /// `PERF_SAMPLE_*` bits describing the record body
    pub sample_type: u64,
    /// `PERF_FORMAT_*` bits
    pub read_format: u64,
    /// Flattened kernel bitfield (`disabled`, `watermark`, `sample_id_all`, ...)
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    #[allow(clippy::pub_underscore_fields)]
    pub _reserved: u16,
}

/// Header preceding every record in the perf ring
///
/// `size` covers the header itself plus the record body.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerfEventHeader {
    pub type_: u32,
    pub misc: u16,
    pub size: u16,
}

impl PerfEventHeader {
    /// Encoded size in the ring
    pub const SIZE: usize = 8;

    /// Decode a header from its little-endian ring representation
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            type_: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_le_bytes([bytes[4], bytes[5]]),
            size: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode into the ring representation
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.type_.to_le_bytes());
        out[4..6].copy_from_slice(&self.misc.to_le_bytes());
        out[6..8].copy_from_slice(&self.size.to_le_bytes());
        out
    }
}

// ============================================================================
// damon:damon_aggregated payload
// ============================================================================

/// Byte offsets inside the raw `damon:damon_aggregated` tracepoint payload
///
/// Layout (little-endian):
///
/// ```text
///  0  u16 common_type      2  u8 common_flags     3  u8 common_preempt_count
///  4  i32 common_pid       8  u64 target_id      16  u32 nr_regions
/// 24  u64 start           32  u64 end            40  u32 nr_accesses
/// 44  u32 age             48  u64 local          56  u64 remote
/// ```
///
/// `local` and `remote` are only populated by kernels carrying NUMA access
/// accounting, and only read when it is enabled.
pub mod damon_aggregated {
    pub const COMMON_TYPE: usize = 0;
    pub const COMMON_FLAGS: usize = 2;
    pub const COMMON_PREEMPT_COUNT: usize = 3;
    pub const COMMON_PID: usize = 4;
    pub const TARGET_ID: usize = 8;
    pub const NR_REGIONS: usize = 16;
    pub const START: usize = 24;
    pub const END: usize = 32;
    pub const NR_ACCESSES: usize = 40;
    pub const AGE: usize = 44;
    pub const LOCAL: usize = 48;
    pub const REMOTE: usize = 56;

    /// Smallest payload that carries every mandatory field
    pub const MIN_PAYLOAD: usize = 40;

    /// Payload size including the NUMA counters
    pub const NUMA_PAYLOAD: usize = 64;
}

/// Accumulate `width` little-endian bytes starting at `offset` into a `u64`
///
/// Bytes past the end of `data` read as zero, so a short payload yields a
/// truncated value instead of a panic. `width` is clamped to 8.
#[must_use]
pub fn le_accumulate(data: &[u8], offset: usize, width: usize) -> u64 {
    let width = width.min(8);
    (0..width).fold(0u64, |acc, i| {
        let byte = data.get(offset + i).copied().unwrap_or(0);
        acc | (u64::from(byte) << (8 * i))
    })
}
