//! Building persisted records and notifications for fired alerts.

use ppewatch_common::config::AlertConfig;
use ppewatch_model::{
    AlertImage, AlertImageRef, AlertRecord, EquipmentSpec, FramePayload, ImageRegion,
    Notification,
};

use crate::engine::Confirmation;
use crate::message::compose_message;

/// Where a fired alert came from.
#[derive(Debug, Clone, Copy)]
pub struct AlertSource<'a> {
    pub camera_id: &'a str,
    /// Selected ROI names, comma separated.
    pub roi_name: Option<&'a str>,
    pub frame_seq: u64,
    pub frame: &'a FramePayload,
}

/// Pick the image to attach: the padded person crop when `save_crop_only`,
/// the full frame otherwise, nothing when images are disabled.
///
/// A crop that falls entirely outside the frame degrades to the full frame.
pub fn select_region(
    config: &AlertConfig,
    confirmation: &Confirmation,
    frame: &FramePayload,
) -> Option<ImageRegion> {
    if !config.save_alert_images {
        return None;
    }
    if !config.save_crop_only {
        return Some(ImageRegion::FullFrame);
    }
    let region = confirmation
        .bbox
        .padded_crop(config.crop_padding_px, frame.width, frame.height)
        .map_or(ImageRegion::FullFrame, ImageRegion::Crop);
    Some(region)
}

/// Build the record and notification for a fired confirmation.
pub fn build_alert(
    config: &AlertConfig,
    confirmation: &Confirmation,
    source: AlertSource<'_>,
    labels: Option<&EquipmentSpec>,
) -> (AlertRecord, Notification) {
    let region = select_region(config, confirmation, source.frame);

    let record = AlertRecord {
        camera_id: source.camera_id.to_string(),
        timestamp: source.frame.captured_at,
        grid_x: confirmation.cell.x,
        grid_y: confirmation.cell.y,
        person_track_id: confirmation.track_id,
        missing_ppe: confirmation.missing.clone(),
        person_box: confirmation.bbox,
        roi_name: source.roi_name.map(str::to_string),
        frame_width: source.frame.width,
        frame_height: source.frame.height,
        alert_duration_seconds: confirmation.duration.as_secs_f64(),
        image: region.map(|region| AlertImageRef {
            frame_seq: source.frame_seq,
            region,
        }),
    };

    let notification = Notification {
        camera_id: record.camera_id.clone(),
        message: compose_message(&record, labels, config.timezone_offset_hours),
        image: region.map(|region| AlertImage {
            frame: source.frame.clone(),
            region,
        }),
    };

    (record, notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Outcome;
    use ppewatch_model::{BBox, GridCell, PixelRect};
    use std::time::Duration;

    fn confirmation(bbox: BBox) -> Confirmation {
        Confirmation {
            track_id: 9,
            bbox,
            cell: GridCell { x: 1, y: 2 },
            missing: vec!["helmet".to_string()],
            frames: 25,
            duration: Duration::from_secs(16),
            outcome: Outcome::Fired,
        }
    }

    #[test]
    fn test_build_alert_with_crop() {
        let config = AlertConfig::default();
        let frame = FramePayload::new(640, 480, vec![0u8; 16]);
        let source = AlertSource {
            camera_id: "gate",
            roi_name: Some("entrance"),
            frame_seq: 77,
            frame: &frame,
        };
        let person = confirmation(BBox::new(100.0, 100.0, 200.0, 300.0));
        let (record, notification) = build_alert(&config, &person, source, None);

        let expected = ImageRegion::Crop(PixelRect { x: 80, y: 80, width: 140, height: 240 });
        assert_eq!(record.cell(), GridCell { x: 1, y: 2 });
        assert_eq!(record.roi_name.as_deref(), Some("entrance"));
        assert_eq!(record.alert_duration_seconds, 16.0);
        assert_eq!(record.image, Some(AlertImageRef { frame_seq: 77, region: expected }));
        assert_eq!(notification.image.map(|i| i.region), Some(expected));
        assert!(notification.message.contains("Camera: gate"));
    }

    #[test]
    fn test_region_follows_image_switches() {
        let frame = FramePayload::new(640, 480, vec![0u8; 16]);
        let c = confirmation(BBox::new(100.0, 100.0, 200.0, 300.0));

        let full = AlertConfig {
            save_crop_only: false,
            ..AlertConfig::default()
        };
        assert_eq!(select_region(&full, &c, &frame), Some(ImageRegion::FullFrame));

        let none = AlertConfig {
            save_alert_images: false,
            ..AlertConfig::default()
        };
        assert_eq!(select_region(&none, &c, &frame), None);

        let outside = confirmation(BBox::new(900.0, 900.0, 950.0, 950.0));
        assert_eq!(
            select_region(&AlertConfig::default(), &outside, &frame),
            Some(ImageRegion::FullFrame)
        );
    }
}
