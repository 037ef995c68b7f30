//! Notification text.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use ppewatch_model::{AlertRecord, EquipmentSpec};

/// Format a violation duration as `"M minute(s) and S second(s)"`,
/// or `"S second(s)"` under a minute.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let minutes = total / 60;
    let seconds = total % 60;
    if minutes > 0 {
        format!("{minutes} minute(s) and {seconds} second(s)")
    } else {
        format!("{seconds} second(s)")
    }
}

/// Convert a UTC timestamp to the configured local offset.
///
/// Offsets are rounded to the minute; out-of-range offsets fall back to UTC.
pub fn local_time(timestamp: DateTime<Utc>, offset_hours: f64) -> DateTime<FixedOffset> {
    let offset_secs = (offset_hours * 60.0).round() as i32 * 60;
    let offset = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| Utc.fix());
    timestamp.with_timezone(&offset)
}

/// Compose the notification body for `record`.
///
/// Equipment is listed by display label when `labels` defines one.
pub fn compose_message(
    record: &AlertRecord,
    labels: Option<&EquipmentSpec>,
    offset_hours: f64,
) -> String {
    let local = local_time(record.timestamp, offset_hours);
    let duration = Duration::from_secs_f64(record.alert_duration_seconds.max(0.0));

    let mut lines = vec![
        "PPE VIOLATION ALERT".to_string(),
        String::new(),
        format!("Camera: {}", record.camera_id),
        format!("Date: {}", local.format("%d/%m/%Y")),
        format!("Time: {}", local.format("%H:%M:%S")),
    ];
    if let Some(roi) = record.roi_name.as_deref().filter(|r| !r.is_empty()) {
        let names: Vec<&str> = roi.split(',').map(str::trim).collect();
        lines.push(format!("ROI: {}", names.join(", ")));
    }
    lines.push(format!("Location: cell ({}, {})", record.grid_x, record.grid_y));
    lines.push(format!("Time without PPE: {}", format_duration(duration)));
    lines.push(String::new());
    lines.push("Missing PPE:".to_string());
    for class in &record.missing_ppe {
        let label = labels.map_or(class.as_str(), |spec| spec.label(class));
        lines.push(format!("  - {label}"));
    }
    lines.push(String::new());
    lines.push(format!("Track ID: {}", record.person_track_id));
    lines.join("\n")
}
