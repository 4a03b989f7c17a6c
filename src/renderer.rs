use crate::decoder::DecodedTile;
use image::{
    Rgba, RgbaImage,
    imageops::{FilterType, crop_imm, resize},
};

/// Opacity applied to tiles the player has not uncovered yet (about 12%).
pub const COVERED_ALPHA: u8 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTile {
    image: RgbaImage,
    covered: bool,
}

impl RenderedTile {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn is_covered(&self) -> bool {
        self.covered
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Draws the tile onto a fresh transparent canvas of the same size, at
/// [`COVERED_ALPHA`] opacity when covered and fully opaque otherwise. The
/// decoded tile is never modified.
pub fn render(tile: &DecodedTile, covered: bool) -> RenderedTile {
    let source = tile.image();

    let opacity = if covered { COVERED_ALPHA } else { u8::MAX };

    let mut canvas = RgbaImage::new(source.width(), source.height());

    for (dst, src) in canvas.pixels_mut().zip(source.pixels()) {
        let [r, g, b, a] = src.0;

        *dst = Rgba([r, g, b, scale_alpha(a, opacity)]);
    }

    RenderedTile {
        image: canvas,
        covered,
    }
}

fn scale_alpha(alpha: u8, opacity: u8) -> u8 {
    ((u32::from(alpha) * u32::from(opacity) + 127) / 255) as u8
}

/// Crops the centre of `image` to the aspect ratio of the target and scales
/// the result to exactly `width`×`height`.
pub fn fill_target(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (orig_width, orig_height) = image.dimensions();

    if width == 0 || height == 0 || orig_width == 0 || orig_height == 0 {
        return RgbaImage::new(width, height);
    }

    // compare orig_width / orig_height with width / height without floats
    let lhs = u64::from(orig_width) * u64::from(height);
    let rhs = u64::from(width) * u64::from(orig_height);

    let (crop_width, crop_height) = if lhs > rhs {
        ((rhs / u64::from(height)) as u32, orig_height)
    } else if lhs < rhs {
        (orig_width, (lhs / u64::from(width)) as u32)
    } else {
        (orig_width, orig_height)
    };

    let crop_width = crop_width.clamp(1, orig_width);
    let crop_height = crop_height.clamp(1, orig_height);

    let cropped = crop_imm(
        image,
        (orig_width - crop_width) / 2,
        (orig_height - crop_height) / 2,
        crop_width,
        crop_height,
    )
    .to_image();

    if cropped.dimensions() == (width, height) {
        cropped
    } else {
        resize(&cropped, width, height, FilterType::Lanczos3)
    }
}
