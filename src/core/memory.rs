//! Human-readable memory figures for log lines.

use sysinfo::System;

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Format a byte count with a binary magnitude suffix (`1024` → `1 KB`).
///
/// Values are rounded to two decimals and trailing zeros dropped.
pub fn human_bytes(bytes: f64) -> String {
    if !bytes.is_finite() || bytes <= 0.0 {
        return "0 B".to_string();
    }
    let exponent = (bytes.log2() / 10.0)
        .floor()
        .clamp(0.0, (UNITS.len() - 1) as f64);
    let scaled = ((bytes / 1024f64.powf(exponent)) * 100.0).round() / 100.0;

    let number = format!("{:.2}", scaled);
    let number = number.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", number, UNITS[exponent as usize])
}

/// Snapshot of the current process's resident memory, in bytes.
///
/// Returns 0 when the platform does not expose process statistics.
pub fn process_memory() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

/// Memory usage reporter used by the engine's debug logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryReporter;

impl MemoryReporter {
    pub fn new() -> Self {
        Self
    }

    /// Report `bytes` (or the live process figure when `None`), either raw
    /// (`nice == false`) or as a human-readable string.
    pub fn usage(&self, nice: bool, bytes: Option<f64>) -> String {
        let bytes = bytes.unwrap_or_else(|| process_memory() as f64);
        if nice {
            human_bytes(bytes)
        } else {
            format!("{}", bytes.round() as u64)
        }
    }
}
