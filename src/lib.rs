//! Image core of a picture-puzzle gallery: lists tile images from an asset
//! bundle, decodes them downsampled to the on-screen tile size and dims the
//! ones the player has not uncovered yet.

pub mod asset_store;
pub mod background;
pub mod decoder;
pub mod gallery;
pub mod renderer;
pub mod request_handler;
pub mod settings;
pub mod slot;
pub mod structs;

pub use asset_store::{AssetAccessError, AssetListing, AssetStore, DirAssetStore, MemoryAssetStore};
pub use decoder::{DecodeError, DecodeRequest, Decoded, DecodedTile, decode_scaled, scale_factor};
pub use gallery::{Gallery, TileImage};
pub use renderer::{COVERED_ALPHA, RenderedTile, render};
pub use settings::{Settings, SettingsFile, SettingsSource, SharedSettings};
pub use slot::{DisplaySlot, SlotTicket};
