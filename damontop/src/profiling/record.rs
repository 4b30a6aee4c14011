//! Decoding of `damon:damon_aggregated` sample records
//!
//! Each sample in the ring is a [`PerfEventHeader`] followed by the fields
//! selected by `DAMON_SAMPLE_TYPE`, in kernel order:
//!
//! ```text
//! u64 ip | u32 pid, u32 tid | u64 time | u32 cpu, u32 res | u64 period
//! u32 raw_size | u8 raw[raw_size]
//! ```
//!
//! The raw payload carries the tracepoint fields at the fixed offsets in
//! [`damontop_common::damon_aggregated`]. Its `target_id` names the monitored process; the
//! header pid/tid belong to kdamond.

use damontop_common::{damon_aggregated as raw, le_accumulate, PerfEventHeader, PERF_RECORD_SAMPLE};
use log::debug;

use super::ring::{RingReader, RingStorage};
use crate::domain::{CpuId, DecodeError, Pid, Tid};
use crate::process::RegionCounterRecord;

/// One decoded DAMON region sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamonSample {
    pub ip: u64,
    /// Monitored process (the payload's `target_id`)
    pub pid: Pid,
    /// Emitting kernel thread
    pub tid: Tid,
    pub time: u64,
    pub cpu: CpuId,
    pub period: u64,
    pub region: RegionCounterRecord,
}

impl DamonSample {
    /// Samples attributed to pid 0 or tid 0 come from kernel context
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.pid.0 != 0 && self.tid.0 != 0
    }
}

/// Counts from one pass over the ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub decoded: usize,
    pub kernel: usize,
    pub invalid: usize,
    pub other: usize,
}

/// Decode every complete record currently in the ring
///
/// Valid user-space samples are appended to `out`. Invalid samples and
/// non-sample records are skipped so the stream keeps moving. A record the
/// kernel has not fully published yet stays in the ring for the next pass.
/// A header with no body means the ring is out of sync; everything pending
/// is dropped.
pub fn decode_available<S: RingStorage>(
    reader: &mut RingReader<S>,
    numa: bool,
    out: &mut Vec<DamonSample>,
) -> DecodeStats {
    let mut stats = DecodeStats::default();

    loop {
        let mut hdr = [0u8; PerfEventHeader::SIZE];
        if reader.peek(&mut hdr).is_err() {
            break;
        }
        let header = PerfEventHeader::from_bytes(&hdr);

        let body = usize::from(header.size).saturating_sub(PerfEventHeader::SIZE);
        if body == 0 {
            reader.reset();
            break;
        }
        if reader.available() < u64::from(header.size) {
            break;
        }
        reader.skip(PerfEventHeader::SIZE);

        if header.type_ != PERF_RECORD_SAMPLE {
            reader.skip(body);
            stats.other += 1;
            continue;
        }

        match read_sample(reader, body, numa) {
            Ok(sample) if sample.is_user() => {
                out.push(sample);
                stats.decoded += 1;
            }
            Ok(_) => stats.kernel += 1,
            Err(e) => {
                debug!("skipping DAMON sample: {e}");
                stats.invalid += 1;
            }
        }
    }

    stats
}

/// Read one sample body of `size` bytes, always consuming exactly `size`
/// bytes (or everything pending if the ring holds less)
fn read_sample<S: RingStorage>(
    reader: &mut RingReader<S>,
    size: usize,
    numa: bool,
) -> Result<DamonSample, DecodeError> {
    let mut body = SampleBody { reader, remaining: size };
    let result = body.decode(numa);
    if body.remaining > 0 {
        body.reader.skip(body.remaining);
    }
    result
}

/// A sample body being read, tracking how much of it is left
struct SampleBody<'a, S> {
    reader: &'a mut RingReader<S>,
    remaining: usize,
}

impl<S: RingStorage> SampleBody<'_, S> {
    fn u32(&mut self) -> Result<u32, DecodeError> {
        let v = self.reader.read_u32()?;
        self.remaining = self.remaining.saturating_sub(4);
        Ok(v)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let v = self.reader.read_u64()?;
        self.remaining = self.remaining.saturating_sub(8);
        Ok(v)
    }

    fn decode(&mut self, numa: bool) -> Result<DamonSample, DecodeError> {
        let ip = self.u64()?;
        let _kdamond = self.u32()?;
        let tid = self.u32()?;
        let time = self.u64()?;
        let cpu = self.u32()?;
        let _res = self.u32()?;
        let period = self.u64()?;
        let raw_size = self.u32()?;

        let payload_len = raw_size as usize;
        if payload_len > self.remaining {
            return Err(DecodeError::Overrun { payload: raw_size, record: self.remaining });
        }

        let mut payload = vec![0u8; payload_len];
        self.reader.read(&mut payload)?;
        self.remaining -= payload_len;

        if payload_len < raw::MIN_PAYLOAD {
            return Err(DecodeError::ShortPayload(raw_size));
        }

        let (local, remote) = if numa {
            (le_accumulate(&payload, raw::LOCAL, 8), le_accumulate(&payload, raw::REMOTE, 8))
        } else {
            (0, 0)
        };

        #[allow(clippy::cast_possible_truncation)]
        let target = le_accumulate(&payload, raw::TARGET_ID, 8) as u32;

        Ok(DamonSample {
            ip,
            pid: Pid(target),
            tid: Tid(tid),
            time,
            cpu: CpuId(cpu),
            period,
            region: RegionCounterRecord {
                nr_regions: le_accumulate(&payload, raw::NR_REGIONS, 4),
                start: le_accumulate(&payload, raw::START, 8),
                end: le_accumulate(&payload, raw::END, 8),
                nr_accesses: le_accumulate(&payload, raw::NR_ACCESSES, 4),
                age: le_accumulate(&payload, raw::AGE, 4),
                local,
                remote,
            },
        })
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Serialize a sample the way the kernel lays it out in the ring
///
/// `kdamond` is the pid written into the sample header. The payload is
/// sized for NUMA fields when `numa` is set.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_sample(sample: &DamonSample, kdamond: Pid, numa: bool) -> Vec<u8> {
    let payload_len = if numa { raw::NUMA_PAYLOAD } else { raw::AGE + 4 };
    let mut payload = vec![0u8; payload_len];
    let mut put = |offset: usize, bytes: &[u8]| {
        payload[offset..offset + bytes.len()].copy_from_slice(bytes);
    };
    put(raw::COMMON_PID, &kdamond.0.to_le_bytes());
    put(raw::TARGET_ID, &u64::from(sample.pid.0).to_le_bytes());
    put(raw::NR_REGIONS, &(sample.region.nr_regions as u32).to_le_bytes());
    put(raw::START, &sample.region.start.to_le_bytes());
    put(raw::END, &sample.region.end.to_le_bytes());
    put(raw::NR_ACCESSES, &(sample.region.nr_accesses as u32).to_le_bytes());
    put(raw::AGE, &(sample.region.age as u32).to_le_bytes());
    if numa {
        put(raw::LOCAL, &sample.region.local.to_le_bytes());
        put(raw::REMOTE, &sample.region.remote.to_le_bytes());
    }

    let mut body = Vec::with_capacity(44 + payload_len);
    body.extend_from_slice(&sample.ip.to_le_bytes());
    body.extend_from_slice(&kdamond.0.to_le_bytes());
    body.extend_from_slice(&sample.tid.0.to_le_bytes());
    body.extend_from_slice(&sample.time.to_le_bytes());
    body.extend_from_slice(&sample.cpu.0.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&sample.period.to_le_bytes());
    body.extend_from_slice(&(payload_len as u32).to_le_bytes());
    body.extend_from_slice(&payload);

    let header = PerfEventHeader {
        type_: PERF_RECORD_SAMPLE,
        misc: 0,
        size: (PerfEventHeader::SIZE + body.len()) as u16,
    };
    let mut record = header.to_bytes().to_vec();
    record.extend_from_slice(&body);
    record
}
