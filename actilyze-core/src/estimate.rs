//! Run duration estimation
//!
//! The analysis script's throughput was measured once on a reference machine
//! (`baseline_mb_per_sec`). To adapt that figure to the local machine, the
//! estimator times a small CPU-bound workload the first time it is asked for
//! an estimate and compares it against the time the same workload took on the
//! reference machine.
//!
//! The calibration runs at most once per [`DurationEstimator`]. Construct one
//! at startup and share it (`Arc`) with whoever needs estimates.

use crate::config::EstimatorConfig;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Hash iterations in the calibration workload.
const CALIBRATION_ITERATIONS: usize = 40_000;

/// Size of the buffer hashed each iteration.
const CALIBRATION_BUFFER_BYTES: usize = 1024;

/// Time the calibration workload took on the reference machine.
const REFERENCE_CALIBRATION_TIME: Duration = Duration::from_millis(120);

const MIN_SPEED_FACTOR: f64 = 0.2;
const MAX_SPEED_FACTOR: f64 = 5.0;

/// Inputs at or below this size (MB) get a zero estimate.
const NEGLIGIBLE_INPUT_MB: f64 = 10.0;

/// Inputs below this size (MB) get a flat startup overhead added.
const SMALL_INPUT_MB: f64 = 20.0;

/// Fixed interpreter/package startup cost, significant only for small inputs.
const SMALL_INPUT_OVERHEAD_SECS: f64 = 15.0;

/// A workload whose wall-clock time is compared with [`REFERENCE_CALIBRATION_TIME`].
pub type CalibrationWorkload = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Estimates wall-clock time for a pending analysis run.
pub struct DurationEstimator {
    baseline_mb_per_sec: f64,
    workload: CalibrationWorkload,
    speed_factor: OnceLock<f64>,
}

impl DurationEstimator {
    /// Create an estimator that calibrates with the built-in hashing workload.
    pub fn new(config: &EstimatorConfig) -> Self {
        Self::with_workload(config.baseline_mb_per_sec, Arc::new(hash_workload))
    }

    /// Create an estimator with a custom calibration workload.
    pub fn with_workload(baseline_mb_per_sec: f64, workload: CalibrationWorkload) -> Self {
        Self {
            baseline_mb_per_sec,
            workload,
            speed_factor: OnceLock::new(),
        }
    }

    /// Local-vs-reference slowdown, calibrating on first call.
    ///
    /// Concurrent first callers all wait for the same calibration run.
    pub fn speed_factor(&self) -> f64 {
        *self.speed_factor.get_or_init(|| {
            let elapsed = (self.workload)();
            let factor = speed_factor_from(elapsed);
            tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                speed_factor = factor,
                "Calibrated duration estimator"
            );
            factor
        })
    }

    /// Estimated wall-clock time to analyse `total_input_mb` of input.
    pub fn estimate(&self, total_input_mb: f64) -> Duration {
        if !total_input_mb.is_finite() || total_input_mb <= NEGLIGIBLE_INPUT_MB {
            return Duration::ZERO;
        }

        let factor = self.speed_factor();
        let linear = |mb: f64| (mb / self.baseline_mb_per_sec) * factor;

        let seconds = if total_input_mb < SMALL_INPUT_MB {
            linear(total_input_mb) + SMALL_INPUT_OVERHEAD_SECS
        } else {
            // Floor at the small-input ceiling so the estimate never drops at the boundary.
            linear(total_input_mb).max(linear(SMALL_INPUT_MB) + SMALL_INPUT_OVERHEAD_SECS)
        };

        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::ZERO
        }
    }
}

/// Clamp the local/reference time ratio into the supported range.
fn speed_factor_from(local: Duration) -> f64 {
    let ratio = local.as_secs_f64() / REFERENCE_CALIBRATION_TIME.as_secs_f64();
    if ratio.is_nan() {
        return 1.0;
    }
    ratio.clamp(MIN_SPEED_FACTOR, MAX_SPEED_FACTOR)
}

/// Built-in calibration: repeatedly hash a small buffer, changing one byte each
/// round so the work cannot be folded away.
fn hash_workload() -> Duration {
    let mut buffer = [0u8; CALIBRATION_BUFFER_BYTES];
    let started = Instant::now();

    let mut digest = Sha256::digest(buffer);
    for i in 0..CALIBRATION_ITERATIONS {
        buffer[i % CALIBRATION_BUFFER_BYTES] ^= digest[0].wrapping_add(i as u8);
        digest = Sha256::digest(buffer);
    }

    let elapsed = started.elapsed();
    tracing::debug!(digest = %hex::encode(&digest[..8]), "Calibration workload finished");
    elapsed
}

/// Sum of input file sizes in megabytes. Unreadable paths count as zero.
pub fn total_input_size_mb<P: AsRef<Path>>(paths: &[P]) -> f64 {
    let bytes: u64 = paths
        .iter()
        .filter_map(|p| std::fs::metadata(p.as_ref()).ok())
        .map(|m| m.len())
        .sum();
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed(elapsed: Duration) -> CalibrationWorkload {
        Arc::new(move || elapsed)
    }

    #[test]
    fn test_small_inputs_estimate_zero() {
        let estimator = DurationEstimator::with_workload(0.5, fixed(REFERENCE_CALIBRATION_TIME));
        assert_eq!(estimator.estimate(0.0), Duration::ZERO);
        assert_eq!(estimator.estimate(10.0), Duration::ZERO);
        assert_eq!(estimator.estimate(-3.0), Duration::ZERO);
        assert_eq!(estimator.estimate(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_small_input_overhead() {
        let estimator = DurationEstimator::with_workload(1.0, fixed(REFERENCE_CALIBRATION_TIME));
        assert_eq!(estimator.speed_factor(), 1.0);
        assert_eq!(estimator.estimate(12.0), Duration::from_secs(27));
    }

    #[test]
    fn test_large_input_linear() {
        let estimator = DurationEstimator::with_workload(0.5, fixed(REFERENCE_CALIBRATION_TIME));
        assert_eq!(estimator.estimate(500.0), Duration::from_secs(1000));
    }

    #[test]
    fn test_estimate_is_monotonic() {
        for elapsed_ms in [1, 120, 600, 10_000] {
            let estimator =
                DurationEstimator::with_workload(0.5, fixed(Duration::from_millis(elapsed_ms)));
            let mut previous = Duration::ZERO;
            let mut mb = 10.5;
            while mb < 200.0 {
                let current = estimator.estimate(mb);
                assert!(
                    current >= previous,
                    "estimate dropped at {mb} MB (factor {})",
                    estimator.speed_factor()
                );
                previous = current;
                mb += 0.25;
            }
        }
    }

    #[test]
    fn test_speed_factor_clamped() {
        assert_eq!(speed_factor_from(Duration::ZERO), MIN_SPEED_FACTOR);
        assert_eq!(speed_factor_from(Duration::from_secs(60)), MAX_SPEED_FACTOR);
        assert_eq!(speed_factor_from(Duration::from_millis(240)), 2.0);
    }

    #[test]
    fn test_calibrates_once_under_contention() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let workload: CalibrationWorkload = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            REFERENCE_CALIBRATION_TIME
        });
        let estimator = DurationEstimator::with_workload(0.5, workload);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| estimator.estimate(100.0));
            }
        });
        estimator.estimate(42.0);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hash_workload_runs() {
        let elapsed = hash_workload();
        assert!(elapsed > Duration::ZERO);
    }

    #[test]
    fn test_total_input_size_mb() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, vec![0u8; 1024 * 1024]).unwrap();
        std::fs::write(&b, vec![0u8; 512 * 1024]).unwrap();

        let total = total_input_size_mb(&[a, b, dir.path().join("missing.bin")]);
        assert!((total - 1.5).abs() < f64::EPSILON);
    }
}
