use crate::{
    asset_store::{AssetListing, AssetStore},
    decoder::{DecodeError, DecodeRequest, Decoded, DecodedTile, decode_scaled},
    renderer::{RenderedTile, render},
    settings::SettingsSource,
    slot::{DisplaySlot, SlotTicket},
};
use std::{collections::HashSet, sync::Arc};
use tokio::runtime::Handle;

/// What a grid cell ends up showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileImage {
    Ready(RenderedTile),
    /// The cell has no size yet; ask again after layout.
    NotReady,
    /// Decoding failed; the cell stays empty.
    Blank,
}

/// Grid adapter over one asset directory.
pub struct Gallery {
    store: Arc<dyn AssetStore>,
    listing: AssetListing,
    settings: Arc<dyn SettingsSource>,
}

impl Gallery {
    pub fn new(
        store: Arc<dyn AssetStore>,
        directory: &str,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        let listing = AssetListing::load(store.as_ref(), directory);

        Self {
            store,
            listing,
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.listing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listing.is_empty()
    }

    pub fn asset_name(&self, position: usize) -> Option<&str> {
        self.listing.get(position)
    }

    pub fn asset_names(&self) -> &[String] {
        self.listing.names()
    }

    pub fn is_uncovered(&self, asset_name: &str) -> bool {
        self.settings.is_uncovered(asset_name)
    }

    pub fn uncovered_asset_names(&self) -> HashSet<String> {
        self.settings.uncovered_asset_names()
    }

    pub fn decode(&self, request: &DecodeRequest) -> Result<Decoded, DecodeError> {
        decode_scaled(self.store.as_ref(), self.listing.directory(), request)
    }

    /// Applies the overlay for the tile's current uncovered state.
    pub fn render(&self, asset_name: &str, tile: &DecodedTile) -> RenderedTile {
        render(tile, !self.settings.is_uncovered(asset_name))
    }

    /// Decodes and renders on the calling thread.
    pub fn tile(&self, position: usize, target_width: u32, target_height: u32) -> TileImage {
        let Some(asset_name) = self.asset_name(position) else {
            log::warn!("No tile at position {position}");
            return TileImage::Blank;
        };

        let decoded = self.decode(&DecodeRequest::new(asset_name, target_width, target_height));

        self.finish(asset_name, decoded)
    }

    /// Decodes on the blocking pool of `pool`, then renders on the caller.
    pub async fn load_tile(
        self: &Arc<Self>,
        pool: &Handle,
        position: usize,
        target_width: u32,
        target_height: u32,
    ) -> TileImage {
        let Some(asset_name) = self.asset_name(position) else {
            log::warn!("No tile at position {position}");
            return TileImage::Blank;
        };

        let request = DecodeRequest::new(asset_name, target_width, target_height);

        if !request.is_measured() {
            return TileImage::NotReady;
        }

        let gallery = Arc::clone(self);

        match pool.spawn_blocking(move || gallery.decode(&request)).await {
            Ok(decoded) => self.finish(asset_name, decoded),
            Err(e) => {
                log::error!("Decode task for {asset_name} failed: {e}");

                TileImage::Blank
            }
        }
    }

    /// Binds `slot` to the asset at `position`, loads it and returns the
    /// result only if the slot was not reassigned in the meantime.
    pub async fn load_into_slot(
        self: &Arc<Self>,
        pool: &Handle,
        slot: &DisplaySlot,
        position: usize,
        target_width: u32,
        target_height: u32,
    ) -> Option<(SlotTicket, TileImage)> {
        let Some(asset_name) = self.asset_name(position) else {
            slot.clear();
            return None;
        };

        let ticket = slot.assign(asset_name);

        let image = self
            .load_tile(pool, position, target_width, target_height)
            .await;

        slot.deliver(&ticket, image).map(|image| (ticket, image))
    }

    fn finish(&self, asset_name: &str, decoded: Result<Decoded, DecodeError>) -> TileImage {
        match decoded {
            Ok(Decoded::Tile(tile)) => TileImage::Ready(self.render(asset_name, &tile)),
            Ok(Decoded::NotReady) => TileImage::NotReady,
            Err(e) => {
                log::warn!("{e}");

                TileImage::Blank
            }
        }
    }
}
