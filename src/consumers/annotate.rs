//! Overlay drawing for preview frames.
//!
//! Always draws on a private `RgbImage` copied out of the shared frame.

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::detect::Detection;
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BAR_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const GLYPH_ADVANCE: i32 = 6;
const BAR_HEIGHT: i32 = 11;

/// Copy `frame` and draw detection boxes plus a capture-time bar on the copy.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut image = frame.to_image()?;
    if image.width() == 0 || image.height() == 0 {
        return Ok(image);
    }
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;

    for detection in detections {
        let [x1, y1, x2, y2] = detection.bbox;
        let left = x1.min(x2).clamp(0.0, max_x).round() as i32;
        let right = x1.max(x2).clamp(0.0, max_x).round() as i32;
        let top = y1.min(y2).clamp(0.0, max_y).round() as i32;
        let bottom = y1.max(y2).clamp(0.0, max_y).round() as i32;
        draw_rectangle(&mut image, left, top, right, bottom, BOX_COLOR);

        let label = format!("{} {:.2}", detection.label, detection.confidence);
        let label_y = (top - 9).max(0);
        fill_rect(
            &mut image,
            left,
            label_y,
            left + label.len() as i32 * GLYPH_ADVANCE + 2,
            label_y + 8,
            BAR_COLOR,
        );
        draw_text(&mut image, left + 1, label_y + 1, &label, BOX_COLOR);
    }

    let stamp = frame.captured_at().format("%Y-%m-%d %H:%M:%S").to_string();
    let width = image.width() as i32;
    let height = image.height() as i32;
    let bar_top = (height - BAR_HEIGHT).max(0);
    fill_rect(&mut image, 0, bar_top, width - 1, height - 1, BAR_COLOR);
    draw_text(&mut image, 2, bar_top + 2, &stamp, TEXT_COLOR);

    Ok(image)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for x in left..=right {
        put(image, x, top, color);
        put(image, x, bottom, color);
    }
    for y in top..=bottom {
        put(image, left, y, color);
        put(image, right, y, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for y in top..=bottom {
        for x in left..=right {
            put(image, x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for ch in text.chars() {
        if let Some(rows) = glyph(ch.to_ascii_lowercase()) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..5 {
                    if (bits >> (4 - col)) & 1 == 1 {
                        put(image, x + col, y + row as i32, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x < 0 || y < 0 {
        return;
    }
    if let Some(pixel) = image.get_pixel_mut_checked(x as u32, y as u32) {
        *pixel = color;
    }
}

/// 5x7 bitmaps for timestamps, scores and class labels. Letters are lowercase only.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0b00000, 0b00100, 0b00100, 0b00000, 0b00100, 0b00100, 0b00000],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        'a' => [0b00000, 0b00000, 0b01110, 0b00001, 0b01111, 0b10001, 0b01111],
        'b' => [0b10000, 0b10000, 0b10110, 0b11001, 0b10001, 0b10001, 0b11110],
        'c' => [0b00000, 0b00000, 0b01110, 0b10000, 0b10000, 0b10001, 0b01110],
        'd' => [0b00001, 0b00001, 0b01101, 0b10011, 0b10001, 0b10001, 0b01111],
        'e' => [0b00000, 0b00000, 0b01110, 0b10001, 0b11111, 0b10000, 0b01110],
        'f' => [0b00110, 0b01001, 0b01000, 0b11100, 0b01000, 0b01000, 0b01000],
        'g' => [0b00000, 0b01111, 0b10001, 0b10001, 0b01111, 0b00001, 0b01110],
        'h' => [0b10000, 0b10000, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'i' => [0b00100, 0b00000, 0b01100, 0b00100, 0b00100, 0b00100, 0b01110],
        'j' => [0b00010, 0b00000, 0b00110, 0b00010, 0b00010, 0b10010, 0b01100],
        'k' => [0b10000, 0b10000, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010],
        'l' => [0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'm' => [0b00000, 0b00000, 0b11010, 0b10101, 0b10101, 0b10001, 0b10001],
        'n' => [0b00000, 0b00000, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'o' => [0b00000, 0b00000, 0b01110, 0b10001, 0b10001, 0b10001, 0b01110],
        'p' => [0b00000, 0b00000, 0b11110, 0b10001, 0b11110, 0b10000, 0b10000],
        'q' => [0b00000, 0b00000, 0b01101, 0b10011, 0b01111, 0b00001, 0b00001],
        'r' => [0b00000, 0b00000, 0b10110, 0b11001, 0b10000, 0b10000, 0b10000],
        's' => [0b00000, 0b00000, 0b01110, 0b10000, 0b01110, 0b00001, 0b11110],
        't' => [0b01000, 0b01000, 0b11100, 0b01000, 0b01000, 0b01001, 0b00110],
        'u' => [0b00000, 0b00000, 0b10001, 0b10001, 0b10001, 0b10011, 0b01101],
        'v' => [0b00000, 0b00000, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'w' => [0b00000, 0b00000, 0b10001, 0b10001, 0b10101, 0b10101, 0b01010],
        'x' => [0b00000, 0b00000, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001],
        'y' => [0b00000, 0b00000, 0b10001, 0b10001, 0b01111, 0b00001, 0b01110],
        'z' => [0b00000, 0b00000, 0b11111, 0b00010, 0b00100, 0b01000, 0b11111],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn gray_frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![128; (width * height * 3) as usize], width, height, Utc::now()).unwrap()
    }

    #[test]
    fn draws_on_a_copy() -> Result<()> {
        let frame = gray_frame(64, 48);
        let detections = vec![Detection::new("person", 0.9, [10.0, 20.0, 30.0, 40.0])];
        let image = annotate(&frame, &detections)?;

        assert_eq!(image.get_pixel(10, 25), &BOX_COLOR);
        assert_eq!(image.get_pixel(30, 25), &BOX_COLOR);
        assert_eq!(image.get_pixel(20, 30), &Rgb([128, 128, 128]));
        // The shared frame is untouched.
        assert!(frame.pixels().iter().all(|&byte| byte == 128));
        Ok(())
    }

    #[test]
    fn out_of_bounds_boxes_are_clamped() -> Result<()> {
        let frame = gray_frame(64, 64);
        let detections = vec![Detection::new("car", 0.7, [-50.0, -50.0, 500.0, 500.0])];
        let image = annotate(&frame, &detections)?;
        assert_eq!(image.get_pixel(0, 20), &BOX_COLOR);
        assert_eq!(image.get_pixel(63, 20), &BOX_COLOR);
        Ok(())
    }

    #[test]
    fn timestamp_bar_spans_the_bottom() -> Result<()> {
        let frame = gray_frame(32, 32);
        let image = annotate(&frame, &[])?;
        assert_eq!(image.get_pixel(31, 31), &BAR_COLOR);
        assert_eq!(image.get_pixel(31, 0), &Rgb([128, 128, 128]));
        Ok(())
    }

    #[test]
    fn label_carries_class_and_score() -> Result<()> {
        let frame = gray_frame(128, 64);
        let detections = vec![Detection::new("person", 0.9, [10.0, 20.0, 100.0, 50.0])];
        let image = annotate(&frame, &detections)?;
        // "person 0.90" is 11 glyphs wide; its backing bar reaches past x=70.
        assert_eq!(image.get_pixel(75, 11), &BAR_COLOR);
        assert_eq!(image.get_pixel(90, 11), &Rgb([128, 128, 128]));
        Ok(())
    }

    #[test]
    fn every_letter_has_a_glyph() {
        for ch in ('a'..='z').chain("0123456789:-._".chars()) {
            assert!(glyph(ch).is_some(), "missing glyph for {ch:?}");
        }
    }
}
