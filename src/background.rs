use clap::{
    builder::{TypedValueParser, ValueParserFactory},
    error::ErrorKind,
};
use image::{Pixel, Rgba, RgbaImage};
use itertools::Itertools;
use std::{fmt::Display, str::FromStr};

/// Opaque color that transparent tile pixels are flattened onto for formats
/// without alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Background(pub Rgba<u8>);

impl Default for Background {
    fn default() -> Self {
        Self(Rgba([255, 255, 255, 255]))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("error parsing color")]
pub struct BackgroundError;

impl Background {
    /// Blends every pixel of `raster` over the background in place.
    pub fn flatten(&self, raster: &mut RgbaImage) {
        for px in raster.pixels_mut() {
            let mut bg = self.0;

            bg.blend(px);

            *px = bg;
        }
    }

    pub fn rgb(&self) -> [u8; 3] {
        let [r, g, b, _] = self.0.0;

        [r, g, b]
    }
}

impl Display for Background {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [r, g, b] = self.rgb();

        write!(f, "{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl FromStr for Background {
    type Err = BackgroundError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 {
            return Err(BackgroundError);
        }

        s.chars()
            .chunks(2)
            .into_iter()
            .map(Iterator::collect::<String>)
            .map(|c| u8::from_str_radix(&c, 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| BackgroundError)
            .map(|rgb| Self(Rgba([rgb[0], rgb[1], rgb[2], 255])))
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundParser;

impl TypedValueParser for BackgroundParser {
    type Value = Background;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let value_str = value
            .to_str()
            .ok_or_else(|| clap::Error::raw(ErrorKind::InvalidUtf8, "Invalid UTF-8"))?;

        Background::from_str(value_str).map_err(|e| clap::Error::raw(ErrorKind::ValueValidation, e))
    }
}

impl ValueParserFactory for Background {
    type Parser = BackgroundParser;

    fn value_parser() -> Self::Parser {
        BackgroundParser
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex() {
        let bg: Background = "ff8000".parse().unwrap();

        assert_eq!(bg.0, Rgba([255, 128, 0, 255]));
        assert_eq!(bg.to_string(), "ff8000");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("fff".parse::<Background>(), Err(BackgroundError));
        assert_eq!("gg0000".parse::<Background>(), Err(BackgroundError));
        // multibyte chars pass the length check but not the radix parse
        assert_eq!("é0000".parse::<Background>(), Err(BackgroundError));
    }

    #[test]
    fn flatten_blends_over_background() {
        let mut raster = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        raster.put_pixel(1, 0, Rgba([10, 20, 30, 255]));

        Background(Rgba([200, 100, 50, 255])).flatten(&mut raster);

        assert_eq!(raster.get_pixel(0, 0).0, [200, 100, 50, 255]);
        assert_eq!(raster.get_pixel(1, 0).0, [10, 20, 30, 255]);
    }
}
