//! Subtracts a `noop` baseline report from a target's raw report.

use super::MetricReport;

/// Fixed set of counters that are denoised. Any other key present in a raw
/// report (e.g. a synthetic `seconds`) is not carried into the clean report.
pub const CLEAN_KEYS: &[&str] = &[
    "cycles",
    "instructions",
    "task-clock",
    "context-switches",
    "cache-misses",
    "L1-dcache-load-misses",
    "LLC-load-misses",
    "page-faults",
];

/// Compute `clean[k] = max(0, raw[k] - noise[k])` for the fixed counter set,
/// plus a synthetic `IPC = clean[instructions] / clean[cycles]`.
pub fn clean_metrics(raw: &MetricReport, noise: &MetricReport) -> MetricReport {
    let mut clean = MetricReport::new();

    for key in CLEAN_KEYS {
        let raw_value = raw.get(*key).copied().unwrap_or(0.0);
        let noise_value = noise.get(*key).copied().unwrap_or(0.0);
        clean.insert(key.to_string(), (raw_value - noise_value).max(0.0));
    }

    let cycles = clean.get("cycles").copied().unwrap_or(0.0);
    let instructions = clean.get("instructions").copied().unwrap_or(0.0);
    let ipc = if cycles > 0.0 { instructions / cycles } else { 0.0 };
    clean.insert("IPC".to_string(), ipc);

    clean
}
