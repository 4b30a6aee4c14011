use damontop::domain::{CpuId, Pid, Tid};
use damontop::process::RegionCounterRecord;
use damontop::profiling::record::encode_sample;
use damontop::profiling::{decode_available, DamonSample, RingReader, VecRing};
use proptest::prelude::*;

const KDAMOND: Pid = Pid(4242);

fn sample_strategy() -> impl Strategy<Value = DamonSample> {
    let header = (any::<u64>(), 1u32..100_000, 1u32..100_000, any::<u64>(), 0u32..1024, 1u64..u64::MAX);
    let region = (1u64..=u64::from(u32::MAX), 0u64..1 << 40, 1u64..1 << 20, 0u64..=u64::from(u32::MAX), 0u64..1000);
    (header, region).prop_map(|((ip, pid, tid, time, cpu, period), (nr_regions, start, len, nr_accesses, age))| {
        DamonSample {
            ip,
            pid: Pid(pid),
            tid: Tid(tid),
            time,
            cpu: CpuId(cpu),
            period,
            region: RegionCounterRecord {
                nr_regions,
                start,
                end: start + len,
                nr_accesses,
                age,
                local: 0,
                remote: 0,
            },
        }
    })
}

fn counts() -> impl Strategy<Value = usize> {
    prop_oneof![Just(0usize), Just(1usize), Just(100usize)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever was pushed comes back in order and the ring ends drained
    #[test]
    fn decode_returns_every_pushed_sample(
        numa in any::<bool>(),
        (n, samples) in counts().prop_flat_map(|n| (Just(n), prop::collection::vec(sample_strategy(), n))),
        cursor in 0u64..1 << 16,
    ) {
        let samples: Vec<DamonSample> = samples
            .into_iter()
            .map(|mut s| {
                if numa {
                    s.region.local = s.region.start % 97;
                    s.region.remote = s.region.end % 89;
                }
                s
            })
            .collect();

        let mut reader = RingReader::new(VecRing::new(1 << 15).with_cursor(cursor));
        for s in &samples {
            prop_assert!(reader.storage_mut().push(&encode_sample(s, KDAMOND, numa)));
        }

        let mut out = Vec::new();
        let stats = decode_available(&mut reader, numa, &mut out);

        prop_assert_eq!(stats.decoded, n);
        prop_assert_eq!(stats.invalid, 0);
        prop_assert_eq!(&out, &samples);
        prop_assert_eq!(reader.available(), 0);
    }
}

#[test]
fn test_kernel_context_samples_are_dropped() {
    let mut reader = RingReader::new(VecRing::new(4096));
    let user = DamonSample {
        ip: 0,
        pid: Pid(10),
        tid: Tid(11),
        time: 0,
        cpu: CpuId(0),
        period: 1,
        region: RegionCounterRecord { nr_regions: 1, start: 0x1000, end: 0x2000, nr_accesses: 5, ..Default::default() },
    };
    let kernel = DamonSample { pid: Pid(0), ..user };

    assert!(reader.storage_mut().push(&encode_sample(&kernel, KDAMOND, false)));
    assert!(reader.storage_mut().push(&encode_sample(&user, KDAMOND, false)));

    let mut out = Vec::new();
    let stats = decode_available(&mut reader, false, &mut out);
    assert_eq!(stats.kernel, 1);
    assert_eq!(stats.decoded, 1);
    assert_eq!(out, vec![user]);
}
