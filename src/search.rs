use crate::error::SimError;
use crate::record::Record;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};

/// "Records whose `field` contains at least `minimum_match` of `terms`".
#[derive(Debug, Clone, PartialEq)]
pub struct TermsQuery {
    pub field: String,
    pub terms: Vec<String>,
    pub minimum_match: usize,
    pub size: usize,
}

/// The inverted-index search service.
pub trait SearchLike: Send + Sync {
    /// Returned records carry id, downloads and the queried field only.
    fn terms_query(&self, query: &TermsQuery) -> Result<Vec<Record>, SimError>;
    /// Ids of every record flagged as decompiled.
    fn eligible_ids(&self) -> Result<Vec<String>, SimError>;
}

/// Point lookups against the record store. `Ok(None)` means not found.
pub trait RecordStoreLike: Send + Sync {
    fn find(&self, id: &str) -> Result<Option<Record>, SimError>;
}

/// In-memory stand-in for both the record store and the search index.
pub struct InMemoryIndex {
    inner: RwLock<IndexInner>,
}

#[derive(Default)]
struct IndexInner {
    order: Vec<String>,
    records: FxHashMap<String, Record>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner::default()),
        }
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        let mut inner = IndexInner::default();
        for record in records {
            inner.insert(record);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Loads one JSON-encoded record per line. Blank lines are skipped.
    pub fn from_jsonl(path: &Path) -> Result<Self, SimError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<Record>(&line)?);
        }
        Ok(Self::from_records(records))
    }

    pub fn insert(&self, record: Record) -> Result<(), SimError> {
        self.inner
            .write()
            .map_err(|_| SimError::Search("index lock poisoned".to_string()))?
            .insert(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexInner>, SimError> {
        self.inner
            .read()
            .map_err(|_| SimError::Search("index lock poisoned".to_string()))
    }
}

impl IndexInner {
    fn insert(&mut self, record: Record) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    fn in_order(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchLike for InMemoryIndex {
    fn terms_query(&self, query: &TermsQuery) -> Result<Vec<Record>, SimError> {
        let inner = self.read()?;
        let terms: FxHashSet<&str> = query.terms.iter().map(String::as_str).collect();
        let mut hits: Vec<(usize, &Record)> = inner
            .in_order()
            .filter_map(|record| {
                let present: FxHashSet<&str> =
                    record.signatures(&query.field).iter().map(String::as_str).collect();
                let overlap = present.intersection(&terms).count();
                (overlap > 0 && overlap >= query.minimum_match).then_some((overlap, record))
            })
            .collect();
        // Highest overlap first, like a relevance-sorted search index.
        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(hits
            .into_iter()
            .take(query.size)
            .map(|(_, record)| {
                Record::new(&record.id, record.downloads)
                    .with_signatures(&query.field, record.signatures(&query.field).to_vec())
            })
            .collect())
    }

    fn eligible_ids(&self) -> Result<Vec<String>, SimError> {
        let inner = self.read()?;
        Ok(inner
            .in_order()
            .filter(|r| r.decompiled)
            .map(|r| r.id.clone())
            .collect())
    }
}

impl RecordStoreLike for InMemoryIndex {
    fn find(&self, id: &str) -> Result<Option<Record>, SimError> {
        Ok(self.read()?.records.get(id).cloned())
    }
}
