use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// An application record as stored in the signature index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub decompiled: bool,
    #[serde(default)]
    pub fields: FxHashMap<String, Vec<String>>,
}

impl Record {
    pub fn new(id: &str, downloads: u64) -> Self {
        Record {
            id: id.to_string(),
            downloads,
            decompiled: true,
            fields: FxHashMap::default(),
        }
    }

    pub fn with_signatures<I, S>(mut self, field: &str, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .insert(field.to_string(), signatures.into_iter().map(Into::into).collect());
        self
    }

    /// Raw signatures for `field`; empty when the record does not carry it.
    pub fn signatures(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Builds the signature field names for a truncation cutoff.
pub struct SignatureField;

impl SignatureField {
    pub const PREFIX: &'static str = "sig_";

    pub fn resources(cutoff: u32) -> String {
        format!("{}resources_{}", Self::PREFIX, cutoff)
    }

    pub fn asset_hashes(cutoff: u32) -> String {
        format!("{}asset_hashes_{}", Self::PREFIX, cutoff)
    }

    /// Blacklist family for a field: the field name without the `sig_` prefix.
    pub fn family(field: &str) -> &str {
        field.strip_prefix(Self::PREFIX).unwrap_or(field)
    }
}

/// One of the independent grouping dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Resources,
    Hashes,
    All,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Resources, Namespace::Hashes, Namespace::All];

    /// Key prefix used by the group store.
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Resources => "res",
            Namespace::Hashes => "hashes",
            Namespace::All => "all",
        }
    }

    /// Key used in the persisted result document.
    pub fn artifact_key(&self) -> &'static str {
        match self {
            Namespace::Resources => "resources",
            Namespace::Hashes => "asset_hashes",
            Namespace::All => "all",
        }
    }
}

/// A record id paired with the weight (download count) that decides group roots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightedId {
    pub id: String,
    pub weight: u64,
}

impl WeightedId {
    pub fn new(id: &str, weight: u64) -> Self {
        WeightedId {
            id: id.to_string(),
            weight,
        }
    }
}

/// A candidate that met the similarity threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: String,
    pub downloads: u64,
    pub score: f64,
}

impl Match {
    pub fn weighted(&self) -> WeightedId {
        WeightedId::new(&self.id, self.downloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_at_cutoff() {
        assert_eq!(SignatureField::resources(100), "sig_resources_100");
        assert_eq!(SignatureField::asset_hashes(3000), "sig_asset_hashes_3000");
    }

    #[test]
    fn test_family_strips_prefix_only_once() {
        assert_eq!(SignatureField::family("sig_resources_100"), "resources_100");
        assert_eq!(SignatureField::family("sig_sig_x"), "sig_x");
        assert_eq!(SignatureField::family("plain"), "plain");
    }

    #[test]
    fn test_missing_field_is_empty() {
        let record = Record::new("a", 1).with_signatures("sig_resources_100", ["x"]);
        assert_eq!(record.signatures("sig_resources_100"), ["x".to_string()]);
        assert!(record.signatures("sig_asset_hashes_100").is_empty());
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: Record = serde_json::from_str(r#"{"id":"com.example"}"#).unwrap();
        assert_eq!(record.downloads, 0);
        assert!(!record.decompiled);
        assert!(record.fields.is_empty());
    }

    #[test]
    fn test_namespace_keys() {
        let prefixes: Vec<_> = Namespace::ALL.iter().map(|n| n.prefix()).collect();
        assert_eq!(prefixes, vec!["res", "hashes", "all"]);
        assert_eq!(Namespace::Hashes.artifact_key(), "asset_hashes");
    }
}
