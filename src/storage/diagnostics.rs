//! Card diagnostics: stress and throughput tests plus an info snapshot
//!
//! These routines exercise a mounted session and are meant for bench checks
//! of a card, not for normal operation. They write scratch files to the card
//! root and remove them afterwards.

use super::StorageSession;
use log::{info, warn};
use serde::Serialize;

const STRESS_FILE: &str = "/stress_test.tmp";
const STRESS_DATA: &[u8] = b"STRESS_TEST_DATA_0123456789";
const SPEED_FILE: &str = "/speed_test.tmp";

/// Outcome of a stress run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressResult {
    pub iterations: u32,
    pub failures: u32,
    pub elapsed_ms: u64,
}

impl StressResult {
    pub fn passed(&self) -> bool {
        self.failures == 0
    }

    pub fn avg_ms_per_iteration(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.elapsed_ms as f64 / self.iterations as f64
        }
    }
}

/// Write, read back, and delete a small file `iterations` times
pub fn stress_test(session: &mut StorageSession, iterations: u32) -> StressResult {
    let mut result = StressResult {
        iterations,
        failures: 0,
        elapsed_ms: 0,
    };
    if !session.is_mounted() {
        warn!("Stress test failed: not mounted");
        result.failures = iterations.max(1);
        return result;
    }

    info!("Starting stress test with {} iterations", iterations);
    let start = session.clock().now_ms();

    for _ in 0..iterations {
        if session.write_file(STRESS_FILE, STRESS_DATA).is_err() {
            result.failures += 1;
            continue;
        }
        match session.read_file(STRESS_FILE) {
            Ok(content) if content == STRESS_DATA => {}
            _ => result.failures += 1,
        }
        if session.delete_file(STRESS_FILE).is_err() {
            result.failures += 1;
        }
    }

    result.elapsed_ms = session.clock().now_ms().saturating_sub(start);
    info!(
        "Stress test complete: {} iterations, {} failures, {} ms ({:.2} ms/iteration)",
        result.iterations,
        result.failures,
        result.elapsed_ms,
        result.avg_ms_per_iteration()
    );
    result
}

fn pattern(block_size: usize) -> Vec<u8> {
    (0..block_size).map(|i| (i % 256) as u8).collect()
}

fn kb_per_sec(bytes: usize, elapsed_ms: u64) -> f64 {
    // Sub-millisecond runs are reported against 1 ms
    (bytes as f64 / 1024.0) / (elapsed_ms.max(1) as f64 / 1000.0)
}

/// Sequential read throughput in KB/s, 0.0 on failure
pub fn read_speed_test(session: &mut StorageSession, block_size: usize, iterations: u32) -> f64 {
    if !session.is_mounted() {
        warn!("Read speed test failed: not mounted");
        return 0.0;
    }
    info!("Read speed test (block: {}, iterations: {})", block_size, iterations);

    let block = pattern(block_size);
    if session.write_file(SPEED_FILE, &[]).is_err() {
        return 0.0;
    }
    for _ in 0..iterations {
        if session.append_file(SPEED_FILE, &block).is_err() {
            let _ = session.delete_file(SPEED_FILE);
            return 0.0;
        }
    }

    let start = session.clock().now_ms();
    let total_read = match session.read_file(SPEED_FILE) {
        Ok(data) => data.len(),
        Err(_) => return 0.0,
    };
    let elapsed = session.clock().now_ms().saturating_sub(start);
    let _ = session.delete_file(SPEED_FILE);

    let speed = kb_per_sec(total_read, elapsed);
    info!("Read speed: {:.2} KB/s", speed);
    speed
}

/// Sequential write throughput in KB/s, 0.0 on failure
pub fn write_speed_test(session: &mut StorageSession, block_size: usize, iterations: u32) -> f64 {
    if !session.is_mounted() {
        warn!("Write speed test failed: not mounted");
        return 0.0;
    }
    info!("Write speed test (block: {}, iterations: {})", block_size, iterations);

    let block = pattern(block_size);
    let start = session.clock().now_ms();
    if session.write_file(SPEED_FILE, &[]).is_err() {
        return 0.0;
    }
    let mut total_written = 0;
    for _ in 0..iterations {
        if session.append_file(SPEED_FILE, &block).is_err() {
            break;
        }
        total_written += block.len();
    }
    let elapsed = session.clock().now_ms().saturating_sub(start);
    let _ = session.delete_file(SPEED_FILE);

    let speed = kb_per_sec(total_written, elapsed);
    info!("Write speed: {:.2} KB/s", speed);
    speed
}

/// Point-in-time view of the card and session
#[derive(Debug, Clone, Serialize)]
pub struct FsInfo {
    pub mounted: bool,
    pub mount_point: String,
    pub current_dir: String,
    pub card_type: String,
    pub block_size: u32,
    pub sector_count: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub last_error_code: i32,
    pub last_error: String,
}

impl FsInfo {
    pub fn capture(session: &StorageSession) -> Self {
        Self {
            mounted: session.is_mounted(),
            mount_point: session.mount_point().to_string(),
            current_dir: session.current_dir().to_string(),
            card_type: session.fs_type().to_string(),
            block_size: session.block_size(),
            sector_count: session.sector_count(),
            total_bytes: session.total_bytes(),
            used_bytes: session.used_bytes(),
            free_bytes: session.free_bytes(),
            last_error_code: session.error_code(),
            last_error: session.last_error_message().to_string(),
        }
    }

    /// Percentage of the card in use
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 * 100.0 / self.total_bytes as f64
        }
    }

    /// Write the snapshot to the log
    pub fn dump(&self) {
        if !self.mounted {
            info!("SD card info: NOT MOUNTED");
            return;
        }
        info!(
            "SD card info: mount={} dir={} type={} block={} sectors={}",
            self.mount_point, self.current_dir, self.card_type, self.block_size, self.sector_count
        );
        info!(
            "SD card space: total {:.2} MB, used {:.2} MB, free {:.2} MB ({:.1}%)",
            self.total_bytes as f64 / 1_048_576.0,
            self.used_bytes as f64 / 1_048_576.0,
            self.free_bytes as f64 / 1_048_576.0,
            self.usage_percent()
        );
        info!("SD card last error: [{}] {}", self.last_error_code, self.last_error);
    }
}
