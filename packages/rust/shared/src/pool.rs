//! Worker pool sizing shared by the crawl, download and parse stages.

use std::time::Duration;

/// Lower bound for the per-item delay inside a pool.
const MIN_TASK_DELAY: Duration = Duration::from_millis(50);

/// Upper bound for I/O-bound pools derived from available parallelism.
fn io_ceiling() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus * 2).clamp(4, 32)
}

/// Number of workers for `task_count` tasks under a stage's hard limit.
pub fn allocate_workers(task_count: usize, hard_limit: usize) -> usize {
    io_ceiling().min(hard_limit).min(task_count).max(1)
}

/// Request delay spread across `workers` concurrent workers.
pub fn per_worker_delay(delay: Duration, workers: usize) -> Duration {
    if delay.is_zero() {
        return Duration::ZERO;
    }
    let divided = delay / workers.max(1) as u32;
    divided.max(MIN_TASK_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_clamped_by_task_count_and_limit() {
        assert_eq!(allocate_workers(2, 8), 2);
        assert_eq!(allocate_workers(0, 8), 1);
        assert!(allocate_workers(1000, 6) <= 6);
        assert!(allocate_workers(1000, 6) >= 4);
    }

    #[test]
    fn delay_divided_with_floor() {
        assert_eq!(
            per_worker_delay(Duration::from_secs(5), 5),
            Duration::from_secs(1)
        );
        assert_eq!(
            per_worker_delay(Duration::from_millis(100), 8),
            Duration::from_millis(50)
        );
        assert_eq!(per_worker_delay(Duration::ZERO, 8), Duration::ZERO);
    }
}
