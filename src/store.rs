use crate::diff::{diff, merge};
use crate::errors::{MonitorError, Result};
use crate::listing::Listing;
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info};

/// The two listing collections kept on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum StoreKind {
    /// Every listing ever observed, deduplicated by link.
    Seen,
    /// Everything extracted by the cycle in progress.
    New,
}

impl StoreKind {
    pub fn file_name(self) -> &'static str {
        match self {
            StoreKind::Seen => "seen_items.json",
            StoreKind::New => "new_items.json",
        }
    }
}

/// Flat-file JSON storage for [`StoreKind`] collections.
///
/// Single writer only; there is no locking.
#[derive(Debug, Clone)]
pub struct ListingStore {
    dir: PathBuf,
}

impl ListingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, kind: StoreKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Loads a collection, creating an empty file if none exists yet.
    pub fn load(&self, kind: StoreKind) -> Result<Vec<Listing>> {
        let path = self.path(kind);
        if !path.exists() {
            debug!("{} does not exist, initializing", path.display());
            self.save(kind, &[])?;
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path).map_err(|e| MonitorError::io(&path, e))?;
        serde_json::from_str(&raw).map_err(|source| MonitorError::Corrupt { path, source })
    }

    /// Overwrites a collection with `listings` as indented JSON.
    pub fn save(&self, kind: StoreKind, listings: &[Listing]) -> Result<()> {
        let path = self.path(kind);
        ensure_parent(&path)?;
        let json = serde_json::to_string_pretty(listings)
            .map_err(|source| MonitorError::Corrupt {
                path: path.clone(),
                source,
            })?;
        fs::write(&path, json).map_err(|e| MonitorError::io(&path, e))
    }

    pub fn clear(&self, kind: StoreKind) -> Result<()> {
        self.save(kind, &[])
    }

    /// Folds the persisted new batch into the seen set and empties the batch.
    ///
    /// Both collections are re-read from disk so a batch left behind by an
    /// interrupted cycle is recovered here as well. Returns the listings that
    /// were appended to the seen set.
    pub fn reconcile(&self) -> Result<Vec<Listing>> {
        let seen = self.load(StoreKind::Seen)?;
        let latest = self.load(StoreKind::New)?;
        let truly_new = diff(&latest, &seen);
        if !truly_new.is_empty() {
            self.save(StoreKind::Seen, &merge(&seen, &truly_new))?;
            info!(
                "Recorded {} new listings ({} seen in total)",
                truly_new.len(),
                seen.len() + truly_new.len()
            );
        }
        self.clear(StoreKind::New)?;
        Ok(truly_new)
    }

    /// Creates both backing files if they are missing.
    pub fn init(&self) -> Result<()> {
        for kind in StoreKind::iter() {
            if !self.path(kind).exists() {
                self.clear(kind)?;
            }
        }
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| MonitorError::io(parent, e))
        }
        _ => Ok(()),
    }
}
