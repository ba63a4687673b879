//! Progress logging for upload events.

use coldpush_transfer::ThroughputMeter;
use coldpush_upload::UploadEvent;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Logs upload events until the uploader drops its sender.
pub async fn log_events(mut events: mpsc::Receiver<UploadEvent>, total_size: u64) {
    let meter = ThroughputMeter::default();

    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::StateChanged(state) => debug!(%state, "state changed"),
            UploadEvent::PartUploaded {
                offset, length, ..
            } => {
                meter.record(length as u64);
                let sent = meter.total();
                let eta = meter
                    .eta(total_size.saturating_sub(sent))
                    .map(|d| format!("{}s", d.as_secs()))
                    .unwrap_or_else(|| "-".into());
                info!(
                    offset,
                    progress = %format!("{}/{}", format_bytes(sent), format_bytes(total_size)),
                    rate = %format!("{}/s", format_bytes(meter.bytes_per_second() as u64)),
                    %eta,
                    "part uploaded"
                );
            }
            UploadEvent::Completed { archive_id } => debug!(%archive_id, "archive completed"),
            UploadEvent::Failed { error } => debug!(%error, "upload failed"),
        }
    }
}

/// Human readable byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
