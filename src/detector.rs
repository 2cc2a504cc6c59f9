//! Optional pre-step that asks the remote service to propose two lap
//! segments inside a single uploaded video. The proposals land in
//! user-editable fields; detection never starts a job by itself.

use crate::config::DetectConfig;
use crate::transport::{ControlPlane, DetectedLap, TimeRange, TransportError};
use crate::uploader::{UploadSequencer, VideoFile};
use std::sync::Arc;
use tracing::{info, instrument};

/// Up to two proposed lap segments, best candidates first
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectedSegments {
    pub seg_a: Option<TimeRange>,
    pub seg_b: Option<TimeRange>,
}

impl DetectedSegments {
    /// True when the service proposed nothing. A normal, non-fatal outcome.
    pub fn is_empty(&self) -> bool {
        self.seg_a.is_none() && self.seg_b.is_none()
    }

    /// Overwrite the form fields with whichever proposals exist, leaving
    /// the user's existing values untouched for the rest
    pub fn apply_to(&self, seg_a: &mut TimeRange, seg_b: &mut TimeRange) {
        if let Some(proposed) = self.seg_a {
            *seg_a = proposed;
        }
        if let Some(proposed) = self.seg_b {
            *seg_b = proposed;
        }
    }
}

/// Lap auto-detection against an uploaded video
pub struct SegmentDetector {
    client: Arc<dyn ControlPlane>,
    uploads: Arc<UploadSequencer>,
    config: DetectConfig,
}

impl SegmentDetector {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        uploads: Arc<UploadSequencer>,
        config: DetectConfig,
    ) -> Self {
        Self {
            client,
            uploads,
            config,
        }
    }

    /// Upload the video if needed (reusing the session cache), then map the
    /// two best detected laps onto proposed segments with seconds rounded
    /// to two decimals for display.
    #[instrument(skip(self, file), fields(source = %file.source()))]
    pub async fn auto_detect(&self, file: &VideoFile) -> Result<DetectedSegments, TransportError> {
        let target = self.uploads.ensure_uploaded(file).await?;

        let laps = self
            .client
            .detect_laps(
                &target,
                self.config.min_lap_s,
                self.config.max_lap_s,
                self.config.top_k,
            )
            .await?;

        let mut candidates = laps.into_iter();
        let segments = DetectedSegments {
            seg_a: candidates.next().map(as_segment),
            seg_b: candidates.next().map(as_segment),
        };

        if segments.is_empty() {
            info!("No laps detected");
        } else {
            info!(seg_a = ?segments.seg_a, seg_b = ?segments.seg_b, "Laps detected");
        }

        Ok(segments)
    }
}

fn as_segment(lap: DetectedLap) -> TimeRange {
    TimeRange {
        start_s: round2(lap.start_s),
        end_s: round2(lap.end_s),
    }
}

fn round2(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockControlPlane, SignedUpload};

    fn lap(start_s: f64, end_s: f64, score: f64) -> DetectedLap {
        DetectedLap {
            start_s,
            end_s,
            score,
        }
    }

    fn detector_with(client: MockControlPlane) -> SegmentDetector {
        let client: Arc<dyn ControlPlane> = Arc::new(client);
        let uploads = Arc::new(UploadSequencer::new(client.clone()));
        SegmentDetector::new(client, uploads, DetectConfig::default())
    }

    fn expect_upload(client: &mut MockControlPlane) {
        client.expect_sign_upload().times(1).returning(|name, _| {
            Ok(SignedUpload {
                bucket: "b".to_string(),
                key: format!("uploads/{name}"),
                put_url: "https://storage.example.com/put".to_string(),
                get_url: "https://storage.example.com/get".to_string(),
            })
        });
        client
            .expect_put_to_storage()
            .times(1)
            .returning(|_, _, _| Ok(()));
    }

    #[tokio::test]
    async fn test_detection_uses_configured_defaults_and_rounds() {
        let mut client = MockControlPlane::new();
        expect_upload(&mut client);
        client
            .expect_detect_laps()
            .withf(|video, min_lap_s, max_lap_s, top_k| {
                video.key == "uploads/v.mp4"
                    && *min_lap_s == 20.0
                    && *max_lap_s == 300.0
                    && *top_k == 6
            })
            .times(1)
            .returning(|_, _, _, _| {
                Ok(vec![
                    lap(12.3456, 95.6789, 0.94),
                    lap(96.0011, 178.9999, 0.88),
                    lap(200.0, 260.0, 0.41),
                ])
            });

        let detector = detector_with(client);
        let file = VideoFile::from_bytes("v.mp4", "video/mp4", vec![7u8; 4]);

        let segments = detector.auto_detect(&file).await.unwrap();
        assert_eq!(segments.seg_a, Some(TimeRange::new(12.35, 95.68)));
        // Only the first two candidates are used
        assert_eq!(segments.seg_b, Some(TimeRange::new(96.0, 179.0)));
    }

    #[tokio::test]
    async fn test_single_candidate_fills_only_seg_a() {
        let mut client = MockControlPlane::new();
        expect_upload(&mut client);
        client
            .expect_detect_laps()
            .times(1)
            .returning(|_, _, _, _| Ok(vec![lap(10.0, 80.0, 0.9)]));

        let detector = detector_with(client);
        let file = VideoFile::from_bytes("v.mp4", "video/mp4", vec![7u8; 4]);

        let segments = detector.auto_detect(&file).await.unwrap();
        assert_eq!(segments.seg_a, Some(TimeRange::new(10.0, 80.0)));
        assert_eq!(segments.seg_b, None);
    }

    #[tokio::test]
    async fn test_zero_candidates_leave_existing_fields_unmodified() {
        let mut client = MockControlPlane::new();
        expect_upload(&mut client);
        client
            .expect_detect_laps()
            .times(1)
            .returning(|_, _, _, _| Ok(vec![]));

        let detector = detector_with(client);
        let file = VideoFile::from_bytes("v.mp4", "video/mp4", vec![7u8; 4]);

        let segments = detector.auto_detect(&file).await.unwrap();
        assert!(segments.is_empty());

        let mut seg_a = TimeRange::new(5.0, 65.0);
        let mut seg_b = TimeRange::new(70.0, 0.0);
        segments.apply_to(&mut seg_a, &mut seg_b);
        assert_eq!(seg_a, TimeRange::new(5.0, 65.0));
        assert_eq!(seg_b, TimeRange::new(70.0, 0.0));
    }

    #[tokio::test]
    async fn test_detection_reuses_the_upload_cache() {
        let mut client = MockControlPlane::new();
        // One sign + one PUT even though the file is used twice
        expect_upload(&mut client);
        client
            .expect_detect_laps()
            .times(2)
            .returning(|_, _, _, _| Ok(vec![lap(10.0, 80.0, 0.9)]));

        let detector = detector_with(client);
        let file = VideoFile::from_bytes("v.mp4", "video/mp4", vec![7u8; 4]);

        detector.auto_detect(&file).await.unwrap();
        detector.auto_detect(&file).await.unwrap();
    }
}
