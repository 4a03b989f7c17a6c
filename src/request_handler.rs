use crate::{
    background::Background,
    decoder::{DecodeError, DecodeRequest, Decoded},
    renderer::fill_target,
    structs::Context,
};
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::{
    Method, Request, Response, StatusCode,
    body::{Bytes, Incoming},
};
use image::{DynamicImage, ImageError, ImageFormat, RgbaImage};
use serde::Serialize;
use std::{convert::Infallible, io::Cursor, sync::Arc};
use tokio::{runtime::Runtime, task::JoinError};
use url::Url;

/// Largest tile side served, in pixels.
pub const MAX_TILE_SIDE: u32 = 4096;

#[derive(thiserror::Error, Debug)]
enum ProcessingError {
    #[error("join error")]
    JoinError(#[from] JoinError),

    #[error("HTTP error")]
    HttpError(StatusCode, Option<&'static str>),

    #[error("image encoding error: {0}")]
    ImageEncodingError(#[from] ImageError),

    #[error("jpeg encoding error: {0}")]
    EncodingError(#[from] jpeg_encoder::EncodingError),

    #[error("{0}")]
    DecodeError(#[from] DecodeError),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum BodyError {
    #[error("infallible")]
    Infillable(Infallible),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Png,
    Jpeg,
}

impl TileFormat {
    fn content_type(self) -> &'static str {
        match self {
            TileFormat::Png => "image/png",
            TileFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileQuery {
    pub position: usize,
    pub format: TileFormat,
    pub width: u32,
    pub height: u32,
    pub fill: bool,
    pub background: Option<Background>,
    pub fallback_missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    List,
    Tile(TileQuery),
    NotFound,
    BadRequest(&'static str),
}

#[derive(Serialize)]
struct TileEntry<'a> {
    position: usize,
    name: &'a str,
    uncovered: bool,
}

pub fn route(url: &Url) -> Route {
    let path = url.path().trim_end_matches('/');

    if path == "/tiles" {
        return Route::List;
    }

    let Some(file) = path.strip_prefix("/tiles/") else {
        return Route::NotFound;
    };

    let (position, format) = if let Some(stem) = file.strip_suffix(".png") {
        (stem, TileFormat::Png)
    } else if let Some(stem) = file
        .strip_suffix(".jpg")
        .or_else(|| file.strip_suffix(".jpeg"))
    {
        (stem, TileFormat::Jpeg)
    } else {
        return Route::NotFound;
    };

    let Ok(position) = position.parse::<usize>() else {
        return Route::NotFound;
    };

    let mut query = TileQuery {
        position,
        format,
        width: 0,
        height: 0,
        fill: false,
        background: None,
        fallback_missing: false,
    };

    for pair in url.query_pairs() {
        match pair.0.as_ref() {
            "width" | "w" => match pair.1.parse() {
                Ok(width) => query.width = width,
                Err(_) => return Route::BadRequest("invalid width"),
            },
            "height" | "h" => match pair.1.parse() {
                Ok(height) => query.height = height,
                Err(_) => return Route::BadRequest("invalid height"),
            },
            "background" | "bg" => match pair.1.parse::<Background>() {
                Ok(bg) => query.background = Some(bg),
                Err(_) => return Route::BadRequest("invalid background"),
            },
            "fit" => match pair.1.as_ref() {
                "fill" => query.fill = true,
                "contain" => query.fill = false,
                _ => return Route::BadRequest("invalid fit"),
            },
            "fallback_missing" => {
                query.fallback_missing = true;
            }
            _ => {}
        }
    }

    if !within_limits(query.width, query.height) {
        return Route::BadRequest("tile too large");
    }

    Route::Tile(query)
}

pub async fn handle_request(
    pool: Arc<Runtime>,
    req: Request<Incoming>,
    context: &'static Context,
) -> Result<Response<BoxBody<Bytes, BodyError>>, hyper::http::Error> {
    if req.method() != Method::GET {
        return http_error(StatusCode::METHOD_NOT_ALLOWED);
    }

    let Ok(url) = Url::parse(&format!("http://localhost{}", req.uri())) else {
        return http_error(StatusCode::BAD_REQUEST);
    };

    match route(&url) {
        Route::List => match list_tiles(context) {
            Ok(data) => ok_response(data, "application/json"),
            Err(e) => {
                log::error!("Error: {e}");

                http_error(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        Route::Tile(query) => {
            let format = query.format;

            pool.spawn_blocking(move || process_tile(context, &query))
                .await
                .map_err(ProcessingError::JoinError)
                .and_then(|inner_result| inner_result)
                .map_or_else(
                    |e| {
                        if let ProcessingError::HttpError(sc, message) = e {
                            log::debug!("Responding {sc}");

                            http_error_msg(sc, message.unwrap_or_else(|| sc.as_str()))
                        } else {
                            log::error!("Error: {e}");

                            http_error(StatusCode::INTERNAL_SERVER_ERROR)
                        }
                    },
                    |data| match data {
                        Some(data) => {
                            log::debug!("Responding tile");

                            ok_response(data, format.content_type())
                        }
                        None => {
                            log::debug!("Responding not ready");

                            Response::builder()
                                .status(StatusCode::NO_CONTENT)
                                .body(Empty::<Bytes>::new().map_err(|e| match e {}).boxed())
                        }
                    },
                )
        }
        Route::BadRequest(message) => http_error_msg(StatusCode::BAD_REQUEST, message),
        Route::NotFound => http_error(StatusCode::NOT_FOUND),
    }
}

fn ok_response(
    data: Bytes,
    content_type: &str,
) -> Result<Response<BoxBody<Bytes, BodyError>>, hyper::http::Error> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .body(Full::new(data).map_err(|e| match e {}).boxed())
}

fn http_error(sc: StatusCode) -> Result<Response<BoxBody<Bytes, BodyError>>, hyper::http::Error> {
    http_error_msg(sc, sc.as_str())
}

fn http_error_msg(
    sc: StatusCode,
    message: &str,
) -> Result<Response<BoxBody<Bytes, BodyError>>, hyper::http::Error> {
    Response::builder().status(sc).body(
        Full::new(Bytes::from(message.to_owned()))
            .map_err(BodyError::Infillable)
            .boxed(),
    )
}

fn list_tiles(context: &Context) -> Result<Bytes, ProcessingError> {
    let uncovered = context.gallery.uncovered_asset_names();

    let entries: Vec<_> = context
        .gallery
        .asset_names()
        .iter()
        .enumerate()
        .map(|(position, name)| TileEntry {
            position,
            name,
            uncovered: uncovered.contains(name),
        })
        .collect();

    Ok(Bytes::from(serde_json::to_vec(&entries)?))
}

fn within_limits(width: u32, height: u32) -> bool {
    width <= MAX_TILE_SIDE && height <= MAX_TILE_SIDE
}

/// `Ok(None)` means the requested size was not set.
fn process_tile(context: &Context, query: &TileQuery) -> Result<Option<Bytes>, ProcessingError> {
    if !within_limits(query.width, query.height) {
        return Err(ProcessingError::HttpError(
            StatusCode::BAD_REQUEST,
            Some("tile too large"),
        ));
    }

    let gallery = &context.gallery;

    let background = query.background.unwrap_or(context.default_background);

    let Some(asset_name) = gallery.asset_name(query.position) else {
        return Err(ProcessingError::HttpError(StatusCode::NOT_FOUND, None));
    };

    let request = DecodeRequest::new(asset_name, query.width, query.height);

    let tile = match gallery.decode(&request) {
        Ok(Decoded::Tile(tile)) => tile,
        Ok(Decoded::NotReady) => return Ok(None),
        Err(e) if query.fallback_missing => {
            log::warn!("{e}; responding blank");

            let blank = RgbaImage::new(query.width, query.height);

            return encode(blank, query.format, &background, context.jpeg_quality).map(Some);
        }
        Err(e) => return Err(e.into()),
    };

    let rendered = gallery.render(asset_name, &tile);

    let raster = if query.fill {
        fill_target(rendered.image(), query.width, query.height)
    } else {
        rendered.into_image()
    };

    encode(raster, query.format, &background, context.jpeg_quality).map(Some)
}

fn encode(
    mut raster: RgbaImage,
    format: TileFormat,
    background: &Background,
    jpeg_quality: u8,
) -> Result<Bytes, ProcessingError> {
    let mut out: Vec<u8> = vec![];

    match format {
        TileFormat::Png => {
            raster.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
        }
        TileFormat::Jpeg => {
            let too_large = || {
                ProcessingError::HttpError(StatusCode::BAD_REQUEST, Some("tile too large for JPEG"))
            };

            let width = u16::try_from(raster.width()).map_err(|_| too_large())?;
            let height = u16::try_from(raster.height()).map_err(|_| too_large())?;

            background.flatten(&mut raster);

            let rgb = DynamicImage::ImageRgba8(raster).into_rgb8();

            jpeg_encoder::Encoder::new(&mut out, jpeg_quality).encode(
                rgb.as_raw(),
                width,
                height,
                jpeg_encoder::ColorType::Rgb,
            )?;
        }
    }

    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{asset_store::MemoryAssetStore, gallery::Gallery, settings::SharedSettings};
    use image::Rgba;

    fn context() -> Context {
        let mut tile = Cursor::new(Vec::new());
        RgbaImage::from_pixel(64, 48, Rgba([40, 80, 120, 255]))
            .write_to(&mut tile, ImageFormat::Png)
            .unwrap();

        let store = MemoryAssetStore::new()
            .with("img/tile.png", tile.into_inner())
            .with("img/broken.png", b"not a png".to_vec());

        Context {
            gallery: Gallery::new(Arc::new(store), "img", Arc::new(SharedSettings::default())),
            default_background: Background::default(),
            jpeg_quality: 85,
        }
    }

    fn tile_query(position: usize, width: u32, height: u32) -> TileQuery {
        TileQuery {
            position,
            format: TileFormat::Png,
            width,
            height,
            fill: false,
            background: None,
            fallback_missing: false,
        }
    }

    fn png_of(data: Option<Bytes>) -> RgbaImage {
        image::load_from_memory(&data.expect("expected tile data"))
            .unwrap()
            .into_rgba8()
    }

    fn parse(path: &str) -> Route {
        route(&Url::parse(&format!("http://localhost{path}")).unwrap())
    }

    #[test]
    fn routes_listing() {
        assert_eq!(parse("/tiles"), Route::List);
        assert_eq!(parse("/tiles/"), Route::List);
        assert_eq!(parse("/"), Route::NotFound);
    }

    #[test]
    fn routes_tile_with_query() {
        let Route::Tile(query) = parse("/tiles/3.jpg?w=128&height=96&bg=000000&fit=fill") else {
            panic!("expected a tile route");
        };

        assert_eq!(query.position, 3);
        assert_eq!(query.format, TileFormat::Jpeg);
        assert_eq!((query.width, query.height), (128, 96));
        assert!(query.fill);
        assert_eq!(query.background, Some(Background(Rgba([0, 0, 0, 255]))));
        assert!(!query.fallback_missing);
    }

    #[test]
    fn tile_size_defaults_to_unmeasured() {
        let Route::Tile(query) = parse("/tiles/0.png?fallback_missing") else {
            panic!("expected a tile route");
        };

        assert_eq!(query.format, TileFormat::Png);
        assert_eq!((query.width, query.height), (0, 0));
        assert!(query.fallback_missing);
    }

    #[test]
    fn rejects_bad_tiles() {
        assert_eq!(parse("/tiles/x.png"), Route::NotFound);
        assert_eq!(parse("/tiles/1.gif"), Route::NotFound);
        assert_eq!(parse("/tiles/1.png?w=-3"), Route::BadRequest("invalid width"));
        assert_eq!(parse("/tiles/1.png?bg=zz"), Route::BadRequest("invalid background"));
        assert_eq!(parse("/tiles/1.png?fit=stretch"), Route::BadRequest("invalid fit"));
    }

    #[test]
    fn rejects_oversized_tiles() {
        assert_eq!(
            parse("/tiles/0.png?w=4097&h=10"),
            Route::BadRequest("tile too large")
        );
        assert_eq!(
            parse("/tiles/0.png?w=4294967295&h=4294967295&fit=fill"),
            Route::BadRequest("tile too large")
        );
        assert!(matches!(parse("/tiles/0.png?w=4096&h=4096"), Route::Tile(_)));
    }

    #[test]
    fn unmeasured_tile_has_no_content() {
        assert!(matches!(process_tile(&context(), &tile_query(0, 0, 48)), Ok(None)));
    }

    #[test]
    fn unknown_position_is_not_found() {
        assert!(matches!(
            process_tile(&context(), &tile_query(9, 32, 32)),
            Err(ProcessingError::HttpError(sc, None)) if sc == StatusCode::NOT_FOUND
        ));
    }

    #[test]
    fn broken_asset_without_fallback_fails() {
        assert!(matches!(
            process_tile(&context(), &tile_query(1, 32, 32)),
            Err(ProcessingError::DecodeError(_))
        ));
    }

    #[test]
    fn broken_asset_with_fallback_is_blank() {
        let query = TileQuery {
            fallback_missing: true,
            ..tile_query(1, 20, 10)
        };

        let blank = png_of(process_tile(&context(), &query).unwrap());

        assert_eq!(blank.dimensions(), (20, 10));
        assert!(blank.pixels().all(|px| px.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn oversized_query_is_rejected_before_decoding() {
        let query = TileQuery {
            fill: true,
            fallback_missing: true,
            ..tile_query(1, u32::MAX, u32::MAX)
        };

        assert!(matches!(
            process_tile(&context(), &query),
            Err(ProcessingError::HttpError(sc, _)) if sc == StatusCode::BAD_REQUEST
        ));
    }

    #[test]
    fn fill_gives_exact_size() {
        let context = context();

        let contained = png_of(process_tile(&context, &tile_query(0, 30, 30)).unwrap());
        assert_eq!(contained.dimensions(), (64, 48));

        let query = TileQuery {
            fill: true,
            ..tile_query(0, 30, 30)
        };

        let filled = png_of(process_tile(&context, &query).unwrap());
        assert_eq!(filled.dimensions(), (30, 30));
    }

    #[test]
    fn encodes_png_and_jpeg() {
        let raster = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 30]));

        let png = encode(raster.clone(), TileFormat::Png, &Background::default(), 85).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().into_rgba8();
        assert_eq!(decoded, raster);

        let jpeg = encode(raster, TileFormat::Jpeg, &Background::default(), 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
    }
}
