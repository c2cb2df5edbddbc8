use crate::error::SimError;
use crate::record::{Record, SignatureField};
use once_cell::sync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub type SignatureSet = FxHashSet<String>;

/// Where blacklisted signatures come from, keyed by field family
/// (`resources_100`, `asset_hashes_300`, ...).
pub trait BlacklistSource: Send + Sync {
    fn load(&self, family: &str) -> Result<SignatureSet, SimError>;
}

/// Reads `{dir}/{family}.blacklist`, one signature per line.
pub struct FileBlacklistSource {
    dir: PathBuf,
}

impl FileBlacklistSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BlacklistSource for FileBlacklistSource {
    fn load(&self, family: &str) -> Result<SignatureSet, SimError> {
        let path = self.dir.join(format!("{}.blacklist", family));
        let contents = fs::read_to_string(&path).map_err(|source| SimError::Blacklist {
            family: family.to_string(),
            source,
        })?;
        Ok(contents
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Fixed blacklists, mostly for tests and single-process runs.
#[derive(Default)]
pub struct StaticBlacklistSource {
    sets: FxHashMap<String, SignatureSet>,
}

impl StaticBlacklistSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, family: &str, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sets
            .insert(family.to_string(), signatures.into_iter().map(Into::into).collect());
        self
    }
}

impl BlacklistSource for StaticBlacklistSource {
    /// Unknown families have an empty blacklist.
    fn load(&self, family: &str) -> Result<SignatureSet, SimError> {
        Ok(self.sets.get(family).cloned().unwrap_or_default())
    }
}

/// Process-lifetime cache of blacklists, one lazily loaded cell per field.
///
/// A cell is populated at most once and never invalidated. A failed load
/// leaves the cell empty so the next caller retries.
pub struct BlacklistCache {
    source: Box<dyn BlacklistSource>,
    cells: Mutex<FxHashMap<String, Arc<OnceCell<Arc<SignatureSet>>>>>,
}

impl BlacklistCache {
    pub fn new(source: Box<dyn BlacklistSource>) -> Self {
        Self {
            source,
            cells: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn get(&self, field: &str) -> Result<Arc<SignatureSet>, SimError> {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .map_err(|_| SimError::Other("blacklist cache poisoned".to_string()))?;
            cells.entry(field.to_string()).or_default().clone()
        };
        // The map lock is released here so a slow load only blocks callers of the same field.
        cell.get_or_try_init(|| {
            let family = SignatureField::family(field);
            let set = self.source.load(family)?;
            tracing::debug!(field, family, size = set.len(), "loaded blacklist");
            Ok(Arc::new(set))
        })
        .cloned()
    }
}

/// Removes blacklisted signatures from a record's field.
pub struct SignatureFilter {
    cache: BlacklistCache,
}

impl SignatureFilter {
    pub fn new(source: Box<dyn BlacklistSource>) -> Self {
        Self {
            cache: BlacklistCache::new(source),
        }
    }

    pub fn filter(&self, record: &Record, field: &str) -> Result<SignatureSet, SimError> {
        let blacklist = self.cache.get(field)?;
        Ok(record
            .signatures(field)
            .iter()
            .filter(|s| !blacklist.contains(s.as_str()))
            .cloned()
            .collect())
    }
}
