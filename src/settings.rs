use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs, io,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

/// Player progress as stored by the game. Keys we do not use are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub uncovered_pics: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("error reading settings: {0}")]
    Io(#[from] io::Error),

    #[error("error parsing settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of the uncovered-set. Implementations must answer from current
/// state on every call; callers query once per render and never cache.
pub trait SettingsSource: Send + Sync {
    fn uncovered_asset_names(&self) -> HashSet<String>;

    fn is_uncovered(&self, asset_name: &str) -> bool {
        self.uncovered_asset_names().contains(asset_name)
    }
}

/// Settings JSON file written by the game, re-read on every query.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Settings, SettingsError> {
        let data = fs::read(&self.path)?;

        Ok(serde_json::from_slice(&data)?)
    }
}

impl SettingsSource for SettingsFile {
    fn uncovered_asset_names(&self) -> HashSet<String> {
        match self.load() {
            Ok(settings) => settings.uncovered_pics.into_iter().collect(),
            Err(SettingsError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No settings at {}, nothing uncovered", self.path.display());

                HashSet::new()
            }
            Err(e) => {
                log::warn!("{e} ({})", self.path.display());

                HashSet::new()
            }
        }
    }
}

/// In-process settings handle. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Marks `asset_name` as revealed. Returns false if it already was.
    pub fn uncover(&self, asset_name: &str) -> bool {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if settings.uncovered_pics.iter().any(|name| name == asset_name) {
            return false;
        }

        settings.uncovered_pics.push(asset_name.to_owned());

        true
    }
}

impl SettingsSource for SharedSettings {
    fn uncovered_asset_names(&self) -> HashSet<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .uncovered_pics
            .iter()
            .cloned()
            .collect()
    }

    fn is_uncovered(&self, asset_name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .uncovered_pics
            .iter()
            .any(|name| name == asset_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        std::env::temp_dir().join(format!("puzzle_settings_{tag}_{nanos}.json"))
    }

    #[test]
    fn parses_game_settings() {
        let settings: Settings = serde_json::from_str(
            r#"{"uncoveredPics": ["a.png", "b.png"], "lastSeenPic": 1, "playSounds": false}"#,
        )
        .unwrap();

        assert_eq!(settings.uncovered_pics, vec!["a.png", "b.png"]);
    }

    #[test]
    fn settings_file_is_reread() {
        let path = temp_file("reread");
        let file = SettingsFile::new(&path);

        fs::write(&path, r#"{"uncoveredPics": ["a.png"]}"#).unwrap();
        assert!(file.is_uncovered("a.png"));
        assert!(!file.is_uncovered("b.png"));

        fs::write(&path, r#"{"uncoveredPics": ["a.png", "b.png"]}"#).unwrap();
        assert!(file.is_uncovered("b.png"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_or_broken_file_uncovers_nothing() {
        let path = temp_file("broken");
        let file = SettingsFile::new(&path);

        assert!(file.uncovered_asset_names().is_empty());

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(file.load(), Err(SettingsError::Json(_))));
        assert!(file.uncovered_asset_names().is_empty());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn shared_settings_uncover() {
        let settings = SharedSettings::default();
        let handle = settings.clone();

        assert!(!handle.is_uncovered("tile.png"));
        assert!(settings.uncover("tile.png"));
        assert!(!settings.uncover("tile.png"));
        assert!(handle.is_uncovered("tile.png"));
        assert_eq!(
            handle.uncovered_asset_names(),
            HashSet::from(["tile.png".to_owned()])
        );
    }
}
