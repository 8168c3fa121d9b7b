//! Best-effort metadata from file size and container alone.

use reelay_core::models::EstimatedMetadata;

const MB: i64 = 1024 * 1024;

struct SizeTier {
    below_bytes: i64,
    width: i32,
    height: i32,
    bitrate: i64,
}

const SIZE_TIERS: [SizeTier; 3] = [
    SizeTier {
        below_bytes: 25 * MB,
        width: 640,
        height: 360,
        bitrate: 1_000_000,
    },
    SizeTier {
        below_bytes: 150 * MB,
        width: 1280,
        height: 720,
        bitrate: 2_500_000,
    },
    SizeTier {
        below_bytes: 1024 * MB,
        width: 1920,
        height: 1080,
        bitrate: 5_000_000,
    },
];

const LARGEST: SizeTier = SizeTier {
    below_bytes: i64::MAX,
    width: 3840,
    height: 2160,
    bitrate: 16_000_000,
};

fn container_factor(mime_type: &str) -> f64 {
    let mime = mime_type.to_lowercase();
    if mime.contains("webm") {
        0.8
    } else if mime.contains("quicktime") {
        1.5
    } else {
        1.0
    }
}

/// Guess duration, resolution and bitrate. Authoritative values always replace these.
pub fn estimate(size_bytes: i64, mime_type: &str) -> EstimatedMetadata {
    let size = size_bytes.max(0);
    let tier = SIZE_TIERS
        .iter()
        .find(|t| size < t.below_bytes)
        .unwrap_or(&LARGEST);

    let bitrate = ((tier.bitrate as f64) * container_factor(mime_type)).round() as i64;
    let duration_seconds = ((size as f64 * 8.0) / bitrate as f64).max(1.0);

    EstimatedMetadata {
        duration_seconds,
        width: tier.width,
        height: tier.height,
        aspect_ratio: "16:9".to_string(),
        bitrate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_tiers() {
        let small = estimate(10 * MB, "video/mp4");
        assert_eq!((small.width, small.height), (640, 360));

        let medium = estimate(100 * MB, "video/mp4");
        assert_eq!((medium.width, medium.height), (1280, 720));

        let large = estimate(500 * MB, "video/mp4");
        assert_eq!((large.width, large.height), (1920, 1080));

        let huge = estimate(4096 * MB, "video/mp4");
        assert_eq!((huge.width, huge.height), (3840, 2160));
    }

    #[test]
    fn test_duration_follows_bitrate() {
        let estimate = estimate(10_000_000, "video/mp4");
        assert_eq!(estimate.bitrate, 1_000_000);
        assert!((estimate.duration_seconds - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_container_scales_bitrate() {
        assert_eq!(estimate(10 * MB, "video/webm").bitrate, 800_000);
        assert_eq!(estimate(10 * MB, "video/quicktime").bitrate, 1_500_000);
    }

    #[test]
    fn test_tiny_files_get_a_minimum_duration() {
        assert_eq!(estimate(0, "video/mp4").duration_seconds, 1.0);
        assert_eq!(estimate(-5, "video/mp4").duration_seconds, 1.0);
    }
}
