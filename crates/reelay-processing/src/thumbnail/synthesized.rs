//! Deterministic preview graphic keyed by video identity.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

fn hue(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes) % 360
}

fn pattern(kind: u8, digest: &[u8]) -> String {
    let mut shapes = String::new();
    match kind % 3 {
        0 => {
            for i in 0..6u32 {
                let cx = (u32::from(digest[8 + i as usize]) * WIDTH) / 255;
                let cy = (u32::from(digest[14 + i as usize]) * HEIGHT) / 255;
                let r = 12 + u32::from(digest[20 + i as usize]) % 40;
                shapes.push_str(&format!(
                    r#"<circle cx="{cx}" cy="{cy}" r="{r}" fill="white" fill-opacity="0.18"/>"#
                ));
            }
        }
        1 => {
            for i in 0..8u32 {
                let x = i * 44 + u32::from(digest[8 + i as usize]) % 20;
                shapes.push_str(&format!(
                    r#"<rect x="{x}" y="0" width="14" height="{HEIGHT}" fill="white" fill-opacity="0.14" transform="skewX(-20)"/>"#
                ));
            }
        }
        _ => {
            for i in 0..5u32 {
                let cx = 30 + i * 65;
                let cy = 40 + u32::from(digest[8 + i as usize]) % 100;
                let s = 14 + u32::from(digest[16 + i as usize]) % 18;
                shapes.push_str(&format!(
                    r#"<polygon points="{},{} {},{} {},{} {},{}" fill="white" fill-opacity="0.2"/>"#,
                    cx,
                    cy - s,
                    cx + s,
                    cy,
                    cx,
                    cy + s,
                    cx - s,
                    cy
                ));
            }
        }
    }
    shapes
}

/// SVG markup for `video_id`. The same id always yields the same image.
pub fn preview_svg(video_id: Uuid) -> String {
    let digest = Sha256::digest(video_id.as_bytes());
    let from = hue([digest[0], digest[1]]);
    let to = hue([digest[2], digest[3]]);

    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<defs><linearGradient id="g" x1="0" y1="0" x2="1" y2="1">"#,
            r#"<stop offset="0" stop-color="hsl({from},65%,45%)"/>"#,
            r#"<stop offset="1" stop-color="hsl({to},70%,30%)"/>"#,
            r#"</linearGradient></defs>"#,
            r#"<rect width="{w}" height="{h}" fill="url(#g)"/>"#,
            "{shapes}",
            r#"<polygon points="146,70 146,110 180,90" fill="white" fill-opacity="0.85"/>"#,
            "</svg>"
        ),
        w = WIDTH,
        h = HEIGHT,
        from = from,
        to = to,
        shapes = pattern(digest[4], &digest),
    )
}

pub fn preview_data_uri(video_id: Uuid) -> String {
    format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(preview_svg(video_id))
    )
}
