use crate::cluster::{DupPointer, Group, GroupState, GroupStoreLike, MergeOutcome, merge_into, sort_groups};
use crate::error::SimError;
use crate::record::{Namespace, WeightedId};
use itertools::Itertools;
use postgres::{Client, NoTls, Transaction};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dup_pointers (
    namespace TEXT NOT NULL,
    id        TEXT NOT NULL,
    root      TEXT NOT NULL,
    weight    BIGINT NOT NULL,
    PRIMARY KEY (namespace, id)
);
CREATE TABLE IF NOT EXISTS dup_members (
    namespace TEXT NOT NULL,
    root      TEXT NOT NULL,
    member    TEXT NOT NULL,
    PRIMARY KEY (namespace, root, member)
);
";

/// Group store shared by every worker process. Each merge runs in one
/// transaction holding a per-namespace advisory lock.
pub struct PgGroupStore {
    client: Mutex<Client>,
}

impl PgGroupStore {
    pub fn connect(url: &str) -> Result<Self, SimError> {
        let mut client = Client::connect(url, NoTls)?;
        client.batch_execute(SCHEMA)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Client>, SimError> {
        self.client
            .lock()
            .map_err(|_| SimError::Store("postgres client lock poisoned".to_string()))
    }
}

fn to_db_weight(weight: u64) -> Result<i64, SimError> {
    i64::try_from(weight).map_err(|_| SimError::Store(format!("weight {} out of range", weight)))
}

fn from_db_weight(weight: i64) -> Result<u64, SimError> {
    u64::try_from(weight).map_err(|_| SimError::Store(format!("negative weight {}", weight)))
}

/// [`GroupState`] over an open transaction, scoped to one namespace.
struct PgTx<'t, 'c> {
    tx: &'t mut Transaction<'c>,
    namespace: &'static str,
}

impl GroupState for PgTx<'_, '_> {
    fn pointer(&mut self, id: &str) -> Result<Option<DupPointer>, SimError> {
        let row = self.tx.query_opt(
            "SELECT root, weight FROM dup_pointers WHERE namespace = $1 AND id = $2",
            &[&self.namespace, &id],
        )?;
        match row {
            Some(row) => Ok(Some(DupPointer {
                root: row.get(0),
                weight: from_db_weight(row.get(1))?,
            })),
            None => Ok(None),
        }
    }

    fn members(&mut self, root: &str) -> Result<Vec<String>, SimError> {
        let rows = self.tx.query(
            "SELECT member FROM dup_members WHERE namespace = $1 AND root = $2 ORDER BY member",
            &[&self.namespace, &root],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn set_pointer(&mut self, id: &str, pointer: &DupPointer) -> Result<(), SimError> {
        let weight = to_db_weight(pointer.weight)?;
        self.tx.execute(
            "INSERT INTO dup_pointers (namespace, id, root, weight) VALUES ($1, $2, $3, $4)
             ON CONFLICT (namespace, id) DO UPDATE SET root = EXCLUDED.root, weight = EXCLUDED.weight",
            &[&self.namespace, &id, &pointer.root, &weight],
        )?;
        Ok(())
    }

    fn add_members(&mut self, root: &str, ids: &[String]) -> Result<(), SimError> {
        self.tx.execute(
            "INSERT INTO dup_members (namespace, root, member)
             SELECT $1, $2, unnest($3::text[])
             ON CONFLICT DO NOTHING",
            &[&self.namespace, &root, &ids],
        )?;
        Ok(())
    }

    fn delete_group(&mut self, root: &str) -> Result<(), SimError> {
        self.tx.execute(
            "DELETE FROM dup_members WHERE namespace = $1 AND root = $2",
            &[&self.namespace, &root],
        )?;
        Ok(())
    }
}

impl GroupStoreLike for PgGroupStore {
    fn merge(&self, namespace: Namespace, matches: &[WeightedId]) -> Result<MergeOutcome, SimError> {
        let mut client = self.lock()?;
        let mut tx = client.transaction()?;
        let ns = namespace.prefix();
        tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&ns])?;
        let outcome = {
            let mut state = PgTx {
                tx: &mut tx,
                namespace: ns,
            };
            merge_into(&mut state, matches)?
        };
        // An early return above drops `tx`, which rolls back.
        tx.commit()?;
        Ok(outcome)
    }

    fn pointer(&self, namespace: Namespace, id: &str) -> Result<Option<DupPointer>, SimError> {
        let mut client = self.lock()?;
        let row = client.query_opt(
            "SELECT root, weight FROM dup_pointers WHERE namespace = $1 AND id = $2",
            &[&namespace.prefix(), &id],
        )?;
        match row {
            Some(row) => Ok(Some(DupPointer {
                root: row.get(0),
                weight: from_db_weight(row.get(1))?,
            })),
            None => Ok(None),
        }
    }

    fn groups(&self, namespace: Namespace) -> Result<Vec<Group>, SimError> {
        let mut client = self.lock()?;
        let rows = client.query(
            "SELECT root, member FROM dup_members WHERE namespace = $1 ORDER BY root, member",
            &[&namespace.prefix()],
        )?;
        let pairs: Vec<(String, String)> = rows.iter().map(|row| (row.get(0), row.get(1))).collect();
        let mut groups: Vec<Group> = pairs
            .into_iter()
            .group_by(|(root, _)| root.clone())
            .into_iter()
            .map(|(root, members)| Group {
                root,
                members: members.map(|(_, member)| member).collect(),
            })
            .collect();
        sort_groups(&mut groups);
        Ok(groups)
    }

    fn clear(&self) -> Result<(), SimError> {
        self.lock()?
            .batch_execute("TRUNCATE dup_pointers, dup_members")?;
        Ok(())
    }
}
