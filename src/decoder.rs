use crate::asset_store::{AssetStore, asset_path};
use image::{ImageError, ImageReader, Rgba, RgbaImage};
use std::io::{self, BufReader, Seek};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeRequest {
    pub asset_name: String,
    pub target_width: u32,
    pub target_height: u32,
}

impl DecodeRequest {
    pub fn new(asset_name: impl Into<String>, target_width: u32, target_height: u32) -> Self {
        Self {
            asset_name: asset_name.into(),
            target_width,
            target_height,
        }
    }

    /// Zero in either dimension means the display surface has not been laid out yet.
    pub fn is_measured(&self) -> bool {
        self.target_width != 0 && self.target_height != 0
    }
}

/// Downsampled tile pixels, owned by whoever requested the decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    image: RgbaImage,
    scale_factor: u32,
}

impl DecodedTile {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn scale_factor(&self) -> u32 {
        self.scale_factor
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Tile(DecodedTile),
    /// Target size unknown, retry once the surface is measured.
    NotReady,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("error opening asset {asset}: {source}")]
    Open {
        asset: String,
        #[source]
        source: io::Error,
    },

    #[error("error reading bounds of asset {asset}: {source}")]
    Probe {
        asset: String,
        #[source]
        source: ImageError,
    },

    #[error("error rewinding asset {asset}: {source}")]
    Rewind {
        asset: String,
        #[source]
        source: io::Error,
    },

    #[error("error decoding asset {asset}: {source}")]
    Decode {
        asset: String,
        #[source]
        source: ImageError,
    },

    #[error("asset {asset} has no pixels")]
    Empty { asset: String },
}

impl DecodeError {
    pub fn asset(&self) -> &str {
        match self {
            Self::Open { asset, .. }
            | Self::Probe { asset, .. }
            | Self::Rewind { asset, .. }
            | Self::Decode { asset, .. }
            | Self::Empty { asset } => asset,
        }
    }
}

/// Largest integer stride that still leaves the decoded image at least as big
/// as the target in both dimensions. Never less than 1.
pub fn scale_factor(
    photo_width: u32,
    photo_height: u32,
    target_width: u32,
    target_height: u32,
) -> u32 {
    let horizontal = photo_width.checked_div(target_width).unwrap_or(1);
    let vertical = photo_height.checked_div(target_height).unwrap_or(1);

    horizontal.min(vertical).max(1)
}

/// Two pass decode: read the intrinsic size without touching pixel data, then
/// decode again and downsample by the computed stride.
pub fn decode_scaled(
    store: &dyn AssetStore,
    directory: &str,
    request: &DecodeRequest,
) -> Result<Decoded, DecodeError> {
    if !request.is_measured() {
        return Ok(Decoded::NotReady);
    }

    let asset = || request.asset_name.clone();

    let stream = store
        .open(&asset_path(directory, &request.asset_name))
        .map_err(|source| DecodeError::Open {
            asset: asset(),
            source,
        })?;

    let mut reader = BufReader::new(stream);

    let (photo_width, photo_height) = ImageReader::new(&mut reader)
        .with_guessed_format()
        .map_err(ImageError::from)
        .and_then(ImageReader::into_dimensions)
        .map_err(|source| DecodeError::Probe {
            asset: asset(),
            source,
        })?;

    if photo_width == 0 || photo_height == 0 {
        return Err(DecodeError::Empty { asset: asset() });
    }

    let factor = scale_factor(
        photo_width,
        photo_height,
        request.target_width,
        request.target_height,
    );

    log::trace!(
        "Decoding {} ({photo_width}x{photo_height}) with scale factor {factor}",
        request.asset_name
    );

    reader.rewind().map_err(|source| DecodeError::Rewind {
        asset: asset(),
        source,
    })?;

    let image = ImageReader::new(&mut reader)
        .with_guessed_format()
        .map_err(ImageError::from)
        .and_then(ImageReader::decode)
        .map_err(|source| DecodeError::Decode {
            asset: asset(),
            source,
        })?
        .into_rgba8();

    Ok(Decoded::Tile(DecodedTile {
        image: downsample(image, factor),
        scale_factor: factor,
    }))
}

/// Box filter over `factor`×`factor` blocks; trailing rows and columns that do
/// not fill a block are dropped.
fn downsample(image: RgbaImage, factor: u32) -> RgbaImage {
    if factor <= 1 {
        return image;
    }

    let samples = u64::from(factor) * u64::from(factor);

    RgbaImage::from_fn(image.width() / factor, image.height() / factor, |x, y| {
        let mut sum = [0u64; 4];

        for dy in 0..factor {
            for dx in 0..factor {
                let px = image.get_pixel(x * factor + dx, y * factor + dy);

                for (acc, ch) in sum.iter_mut().zip(px.0) {
                    *acc += u64::from(ch);
                }
            }
        }

        Rgba(sum.map(|s| ((s + samples / 2) / samples) as u8))
    })
}
