use crate::cluster::{Group, GroupStoreLike};
use crate::error::SimError;
use crate::record::Namespace;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::Path;

/// Groups of one namespace, written as a JSON object `root -> [members]` in list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupList(pub Vec<Group>);

impl Serialize for GroupList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for group in &self.0 {
            map.serialize_entry(&group.root, &group.members)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GroupList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GroupListVisitor;

        impl<'de> Visitor<'de> for GroupListVisitor {
            type Value = GroupList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of root id to member ids")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<GroupList, A::Error> {
                let mut groups = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((root, members)) = access.next_entry::<String, Vec<String>>()? {
                    groups.push(Group { root, members });
                }
                Ok(GroupList(groups))
            }
        }

        deserializer.deserialize_map(GroupListVisitor)
    }
}

/// The persisted outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub resources: GroupList,
    pub asset_hashes: GroupList,
    pub all: GroupList,
}

impl MatchResult {
    pub fn collect(store: &dyn GroupStoreLike) -> Result<Self, SimError> {
        Ok(Self {
            resources: GroupList(store.groups(Namespace::Resources)?),
            asset_hashes: GroupList(store.groups(Namespace::Hashes)?),
            all: GroupList(store.groups(Namespace::All)?),
        })
    }

    pub fn namespace(&self, namespace: Namespace) -> &[Group] {
        match namespace {
            Namespace::Resources => &self.resources.0,
            Namespace::Hashes => &self.asset_hashes.0,
            Namespace::All => &self.all.0,
        }
    }

    /// Writes pretty JSON next to `path` and renames it into place.
    pub fn write_atomic(&self, path: &Path) -> Result<(), SimError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SimError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(root: &str, members: &[&str]) -> Group {
        Group {
            root: root.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_serializes_groups_as_ordered_map() {
        let result = MatchResult {
            resources: GroupList(vec![g("z", &["a", "b", "z"]), g("c", &["c", "d"])]),
            asset_hashes: GroupList::default(),
            all: GroupList(vec![g("z", &["a", "z"])]),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"resources":{"z":["a","b","z"],"c":["c","d"]},"asset_hashes":{},"all":{"z":["a","z"]}}"#
        );
    }

    #[test]
    fn test_write_then_load_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches").join("0.8_100");
        let result = MatchResult {
            resources: GroupList(vec![g("z", &["x", "y", "z"]), g("a", &["a", "b"])]),
            ..MatchResult::default()
        };
        result.write_atomic(&path).unwrap();
        assert!(!dir.path().join("matches").join("0.8_100.tmp").exists());
        let loaded = MatchResult::load(&path).unwrap();
        assert_eq!(loaded, result);
        assert_eq!(loaded.namespace(Namespace::Resources)[0].root, "z");
    }
}
