use std::fmt;
use std::time::Duration;

use crate::digest::HashAlgorithm;

/// Outcome of one sending or receiving pass over a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes: u64,
    pub duration: Duration,
    /// Hex digest of the transferred bytes
    pub digest: String,
    pub algorithm: HashAlgorithm,
    /// Messages moved when framing is active
    pub messages: Option<u64>,
}

impl TransferStats {
    pub fn performance(&self) -> String {
        format_performance(self.bytes, self.duration)
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, about {}", self.bytes, self.performance())?;
        if let Some(messages) = self.messages {
            write!(f, ", {} messages", messages)?;
        }
        Ok(())
    }
}

fn rate(bytes: u64, duration: Duration) -> Option<u64> {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        Some((bytes as f64 / secs).round() as u64)
    } else {
        None
    }
}

/// `"<amount>/<secs>s or <amount per second>/s"`, without the rate when no
/// time has passed
pub fn format_performance(bytes: u64, duration: Duration) -> String {
    let amount = bytes_to_human(bytes);
    let secs = duration.as_secs_f64();
    match rate(bytes, duration) {
        Some(per_second) => format!(
            "{}/{:.2}s or {}/s",
            amount,
            secs,
            bytes_to_human(per_second)
        ),
        None => format!("{}/{:.2}s", amount, secs),
    }
}

pub fn bytes_to_human(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
