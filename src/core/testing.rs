//! Synthetic fixtures shared by the unit tests.

use image::{imageops, ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const CHROME_SEED: u64 = 0xc4c0;
/// Height of the shared UI bar in `with_chrome`.
const CHROME_HEIGHT: u32 = 30;

/// A busy image of random rectangles and discs over a gradient. Different
/// seeds give unrelated images.
pub fn textured_image(seed: u64, width: u32, height: u32) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = ImageBuffer::from_fn(width, height, |x, y| {
        let intensity = ((x + y) % 256) as u8 / 4 + 32;
        Rgb([intensity, intensity, intensity])
    });

    for _ in 0..90 {
        let w = rng.gen_range(6..48);
        let h = rng.gen_range(6..48);
        let x = rng.gen_range(0..width as i32 - 6);
        let y = rng.gen_range(0..height as i32 - 6);
        let color = Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]);
        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), color);
    }

    for _ in 0..40 {
        let center = (rng.gen_range(0..width as i32), rng.gen_range(0..height as i32));
        let radius = rng.gen_range(3..16);
        let color = Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]);
        draw_filled_circle_mut(&mut img, center, radius, color);
    }

    img
}

pub fn save_textured_image(path: &Path, seed: u64) {
    textured_image(seed, 320, 240)
        .save(path)
        .expect("failed to write test image");
}

/// `textured_image` under an identical textured bar across the top, like
/// screenshots of different characters sharing the same UI.
pub fn with_chrome(seed: u64, width: u32, height: u32) -> RgbImage {
    let mut img = textured_image(seed, width, height);
    let bar = textured_image(CHROME_SEED, width, CHROME_HEIGHT);
    imageops::replace(&mut img, &bar, 0, 0);
    img
}
