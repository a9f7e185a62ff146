use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::Result;

/// Flat key-value cache persisted as one pretty-printed JSON object.
///
/// The whole file is read on `load` and rewritten on `flush`; `put` only touches memory.
/// Keys are kept sorted so consecutive dumps diff cleanly.
#[derive(Debug)]
pub struct JsonStore<V> {
    path: PathBuf,
    entries: BTreeMap<String, V>,
    dirty: bool,
}

impl<V> JsonStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Loads the cache at `path`, starting empty when the file doesn't exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded cache");

        Ok(JsonStore {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole map next to the target and renames it over,
    /// so an interrupted flush leaves the previous dump intact.
    /// Does nothing when nothing changed since the last flush.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec_pretty(&self.entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &self.path).await?;

        self.dirty = false;
        debug!(path = %self.path.display(), entries = self.entries.len(), "flushed cache");
        Ok(())
    }
}

/// A geocoded position. Serialized as `{"lat": .., "lng": ..}`,
/// the older `[lat, lng]` pair is still accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "CoordinateRepr")]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CoordinateRepr {
    Object { lat: f64, lng: f64 },
    Pair(f64, f64),
}

impl From<CoordinateRepr> for Coordinate {
    fn from(repr: CoordinateRepr) -> Self {
        match repr {
            CoordinateRepr::Object { lat, lng } => Coordinate { lat, lng },
            CoordinateRepr::Pair(lat, lng) => Coordinate { lat, lng },
        }
    }
}

/// School unit code -> postal address. `None` means the page was fetched but had no address.
pub type AddressCache = JsonStore<Option<String>>;
/// Address -> position. `None` means every geocoding attempt came back empty.
pub type CoordCache = JsonStore<Option<Coordinate>>;
