use std::{
    fs::{self, File},
    io::{self, BufReader, Cursor, Read, Seek},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// A single-use byte stream over one asset. Must be seekable so the decoder can
/// rewind after the bounds probe.
pub trait AssetStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> AssetStream for T {}

/// Read-only bundle of tile images.
pub trait AssetStore: Send + Sync {
    /// Names of the assets directly inside `directory`.
    fn list(&self, directory: &str) -> io::Result<Vec<String>>;

    /// Opens `path` (`directory/name`) for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn AssetStream>>;
}

#[derive(thiserror::Error, Debug)]
#[error("error accessing assets at {path}: {source}")]
pub struct AssetAccessError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

pub fn list_assets(
    store: &dyn AssetStore,
    directory: &str,
) -> Result<Vec<String>, AssetAccessError> {
    store.list(directory).map_err(|source| AssetAccessError {
        path: directory.to_owned(),
        source,
    })
}

pub fn asset_path(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        name.to_owned()
    } else {
        format!("{}/{}", directory.trim_end_matches('/'), name)
    }
}

/// Listing read once and shared by the count query and the per-position
/// lookup, so both always agree on the order.
#[derive(Debug, Clone, Default)]
pub struct AssetListing {
    directory: String,
    names: Vec<String>,
}

impl AssetListing {
    /// Enumerates `directory`. A failed enumeration is logged and yields an
    /// empty listing.
    pub fn load(store: &dyn AssetStore, directory: &str) -> Self {
        let names = match list_assets(store, directory) {
            Ok(names) => names,
            Err(e) => {
                log::warn!("{e}");

                Vec::new()
            }
        };

        log::debug!("Listed {} assets in {directory:?}", names.len());

        Self {
            directory: directory.to_owned(),
            names,
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Assets stored as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct DirAssetStore {
    root: PathBuf,
}

impl DirAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);

        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("asset path escapes the asset root: {path}"),
            ));
        }

        Ok(self.root.join(relative))
    }
}

impl AssetStore for DirAssetStore {
    fn list(&self, directory: &str) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(self.resolve(directory)?)? {
            let entry = entry?;

            if !entry.file_type()?.is_file() {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => log::warn!("Skipping non UTF-8 asset name {name:?}"),
            }
        }

        // read_dir order is platform dependent
        names.sort();

        Ok(names)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn AssetStream>> {
        Ok(Box::new(BufReader::new(File::open(self.resolve(path)?)?)))
    }
}

/// Assets held in memory, listed in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetStore {
    entries: Vec<(String, Arc<[u8]>)>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the asset at `path`.
    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        let path = path.into();
        let data = data.into();

        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = data,
            None => self.entries.push((path, data)),
        }
    }

    pub fn with(mut self, path: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        self.insert(path, data);

        self
    }
}

impl AssetStore for MemoryAssetStore {
    fn list(&self, directory: &str) -> io::Result<Vec<String>> {
        let prefix = asset_path(directory, "");

        let names: Vec<String> = self
            .entries
            .iter()
            .filter_map(|(path, _)| path.strip_prefix(prefix.as_str()))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(str::to_owned)
            .collect();

        if names.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such asset directory: {directory}"),
            ));
        }

        Ok(names)
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn AssetStream>> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, data)| Box::new(Cursor::new(Arc::clone(data))) as Box<dyn AssetStream>)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such asset: {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        std::env::temp_dir().join(format!("puzzle_assets_{tag}_{nanos}"))
    }

    #[test]
    fn memory_store_lists_in_insertion_order() {
        let store = MemoryAssetStore::new()
            .with("img/b.png", vec![1u8])
            .with("img/a.png", vec![2u8])
            .with("img/nested/c.png", vec![3u8])
            .with("other/d.png", vec![4u8]);

        assert_eq!(store.list("img").unwrap(), vec!["b.png", "a.png"]);
    }

    #[test]
    fn memory_store_missing_directory_fails() {
        let store = MemoryAssetStore::new().with("img/a.png", vec![1u8]);

        let err = list_assets(&store, "missing").unwrap_err();

        assert_eq!(err.path, "missing");
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn memory_store_open_reads_bytes() {
        let store = MemoryAssetStore::new().with("img/a.png", vec![7u8, 8, 9]);

        let mut out = Vec::new();
        store.open("img/a.png").unwrap().read_to_end(&mut out).unwrap();

        assert_eq!(out, vec![7, 8, 9]);
        assert!(store.open("img/zzz.png").is_err());
    }

    #[test]
    fn dir_store_lists_sorted_files_only() {
        let root = temp_root("list");
        let dir = root.join("img");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("tile_02.png"), b"x").unwrap();
        fs::write(dir.join("tile_01.png"), b"y").unwrap();

        let store = DirAssetStore::new(&root);

        assert_eq!(store.list("img").unwrap(), vec!["tile_01.png", "tile_02.png"]);

        let mut out = Vec::new();
        store.open("img/tile_01.png").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"y");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn dir_store_rejects_escaping_paths() {
        let store = DirAssetStore::new(temp_root("escape"));

        let err = store.open("../secret.png").err().unwrap();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn listing_degrades_to_empty() {
        let listing = AssetListing::load(&MemoryAssetStore::new(), "img");

        assert!(listing.is_empty());
        assert_eq!(listing.get(0), None);
    }

    #[test]
    fn asset_path_joins() {
        assert_eq!(asset_path("img", "a.png"), "img/a.png");
        assert_eq!(asset_path("img/", "a.png"), "img/a.png");
        assert_eq!(asset_path("", "a.png"), "a.png");
    }
}
