#![allow(dead_code)]

use image::{GrayImage, ImageFormat, Luma};
use std::io::Cursor;

pub const WIDTH: u32 = 160;
pub const HEIGHT: u32 = 120;

/// Encodes a flat gray frame with an optional bright square
pub fn jpeg_frame(square: Option<(u32, u32, u32)>) -> Vec<u8> {
    let mut img = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([40]));
    if let Some((x0, y0, side)) = square {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                img.put_pixel(x, y, Luma([210]));
            }
        }
    }

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .expect("jpeg encoding");
    out.into_inner()
}
