use super::worker::WorkerTotals;

/// Print decode counters gathered by the sampling worker
///
/// Helps tell apart "DAMON produced nothing" from "samples arrived but were
/// attributed to kernel threads or malformed".
pub fn print_decode_diagnostics(totals: &WorkerTotals) {
    let d = &totals.decode;
    eprintln!("\nsampler diagnostics:");
    eprintln!("   - Sample passes: {}", totals.samples);
    eprintln!("   - Region samples decoded: {}", d.decoded);
    if d.decoded == 0 && totals.samples > 0 {
        eprintln!("   - No region samples (is kdamond aggregating the targets?)");
    }
    eprintln!("   - Kernel-context samples dropped: {}", d.kernel);
    eprintln!("   - Malformed samples skipped: {}", d.invalid);
    eprintln!("   - Non-sample records skipped: {}", d.other);
}
