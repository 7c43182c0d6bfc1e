//! StateStore, the redb-backed host inventory.
//!
//! Implements [`HostInventory`] over four tables: hosts (disks embedded) and
//! one table per reservation kind. All values are JSON-serialized into
//! redb's `&[u8]` value columns. redb admits a single write transaction at a
//! time, so each revision check and the writes it guards are serialized
//! against every other mutation. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::inventory::{ChangeSet, HostInventory};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Def = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe inventory store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "inventory store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory inventory store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(USED_COMPUTES).map_err(map_err!(Table))?;
        txn.open_table(USED_DISKS).map_err(map_err!(Table))?;
        txn.open_table(USED_PORTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read every record of one reservation table, optionally limited to a host.
    fn scan<T: DeserializeOwned>(&self, def: Def, host_id: Option<&str>) -> StateResult<Vec<T>> {
        let prefix = host_id.map(|id| format!("{id}:"));
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if prefix.as_deref().is_none_or(|p| key.value().starts_with(p)) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }
}

impl HostInventory for StateStore {
    fn insert_host(&self, host: &Host) -> StateResult<Host> {
        let mut stored = host.clone();
        stored.revision = 1;
        let value = encode(&stored)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            if table.get(host.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("host {}", host.id)));
            }
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let other: Host = decode(value.value())?;
                if other.status != HostStatus::Deleted
                    && other.ip == host.ip
                    && other.host_name == host.host_name
                {
                    return Err(StateError::AlreadyExists(format!(
                        "host {}({}) is already imported as {}",
                        host.host_name, host.ip, other.id
                    )));
                }
            }
            table
                .insert(host.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host_id = %host.id, ip = %host.ip, "host stored");
        Ok(stored)
    }

    fn get_host(&self, host_id: &str) -> StateResult<Option<Host>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        read_host(&table, host_id)
    }

    fn list_hosts(&self) -> StateResult<Vec<Host>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn delete_hosts(&self, hosts: &[Host], deleted_at: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            for def in [USED_COMPUTES, USED_DISKS, USED_PORTS] {
                let table = txn.open_table(def).map_err(map_err!(Table))?;
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (key, _) = entry.map_err(map_err!(Read))?;
                    let key = key.value();
                    if let Some(host) = hosts.iter().find(|h| key_of_host(key, &h.id)) {
                        return Err(StateError::InUse(host.id.clone()));
                    }
                }
            }

            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            for host in hosts {
                check_revision(&table, host)?;
                let mut deleted = host.clone();
                deleted.status = HostStatus::Deleted;
                deleted.deleted_at = Some(deleted_at);
                deleted.updated_at = deleted_at;
                deleted.disks.clear();
                deleted.revision += 1;
                let value = encode(&deleted)?;
                table
                    .insert(host.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(hosts = hosts.len(), "hosts soft-deleted");
        Ok(())
    }

    fn list_reservations(&self, host_id: &str) -> StateResult<HostReservations> {
        Ok(HostReservations {
            computes: self.scan(USED_COMPUTES, Some(host_id))?,
            disks: self.scan(USED_DISKS, Some(host_id))?,
            ports: self.scan(USED_PORTS, Some(host_id))?,
        })
    }

    fn list_all_reservations(&self) -> StateResult<Vec<Reservation>> {
        let all = HostReservations {
            computes: self.scan(USED_COMPUTES, None)?,
            disks: self.scan(USED_DISKS, None)?,
            ports: self.scan(USED_PORTS, None)?,
        };
        Ok(all.into_reservations().collect())
    }

    fn commit(&self, change: &ChangeSet) -> StateResult<()> {
        if change.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            for host in &change.hosts {
                check_revision(&hosts, host)?;
                let mut next = host.clone();
                next.revision += 1;
                let value = encode(&next)?;
                hosts
                    .insert(host.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut computes = txn.open_table(USED_COMPUTES).map_err(map_err!(Table))?;
            let mut disks = txn.open_table(USED_DISKS).map_err(map_err!(Table))?;
            let mut ports = txn.open_table(USED_PORTS).map_err(map_err!(Table))?;

            for r in &change.remove {
                let key = r.table_key();
                let table = match r {
                    Reservation::Compute(_) => &mut computes,
                    Reservation::Disk(_) => &mut disks,
                    Reservation::Port(_) => &mut ports,
                };
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }

            for r in &change.insert {
                let key = r.table_key();
                let value = match r {
                    Reservation::Compute(c) => encode(c)?,
                    Reservation::Disk(d) => encode(d)?,
                    Reservation::Port(p) => encode(p)?,
                };
                let table = match r {
                    Reservation::Compute(_) => &mut computes,
                    Reservation::Disk(_) => &mut disks,
                    Reservation::Port(_) => &mut ports,
                };
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            hosts = change.hosts.len(),
            inserted = change.insert.len(),
            removed = change.remove.len(),
            "change set committed"
        );
        Ok(())
    }
}

/// Whether a `{host_id}:{record_id}` key belongs to `host_id`.
fn key_of_host(key: &str, host_id: &str) -> bool {
    key.strip_prefix(host_id)
        .is_some_and(|rest| rest.starts_with(':'))
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn read_host(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    host_id: &str,
) -> StateResult<Option<Host>> {
    match table.get(host_id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Fail unless the stored copy of `host` is at the same revision.
fn check_revision(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    host: &Host,
) -> StateResult<()> {
    let stored = read_host(table, &host.id)?
        .ok_or_else(|| StateError::NotFound(format!("host {}", host.id)))?;
    if stored.revision != host.revision {
        debug!(
            host_id = %host.id,
            expected = host.revision,
            found = stored.revision,
            "revision mismatch"
        );
        return Err(StateError::Conflict(host.id.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_host(id: &str, ip: &str) -> Host {
        Host {
            id: id.to_string(),
            ip: ip.to_string(),
            credential: Credential::Key {
                user_name: "tidb".to_string(),
                key_path: None,
            },
            host_name: format!("{id}.local"),
            arch: Arch::X86,
            os: "CentOS".to_string(),
            kernel: "5.10".to_string(),
            spec: "8C16G".to_string(),
            cpu_cores: 8,
            memory: 16,
            free_cpu_cores: 8,
            free_memory: 16,
            nic: "10GE".to_string(),
            region: "r1".to_string(),
            zone: "z1".to_string(),
            rack: "k1".to_string(),
            cluster_type: "TiDB".to_string(),
            purpose: Purpose::Compute,
            disk_type: DiskType::Ssd,
            reserved: false,
            traits: 0,
            status: HostStatus::Online,
            stat: HostStat::Loadless,
            disks: vec![Disk {
                id: format!("{id}-d1"),
                host_id: id.to_string(),
                name: "sdb".to_string(),
                capacity: 256,
                path: "/data1".to_string(),
                disk_type: DiskType::Ssd,
                status: DiskStatus::Available,
            }],
            created_at: 1000,
            updated_at: 1000,
            deleted_at: None,
            revision: 0,
        }
    }

    fn compute(host_id: &str, id: &str, holder: &str) -> Reservation {
        Reservation::Compute(UsedCompute {
            id: id.to_string(),
            host_id: host_id.to_string(),
            holder_id: holder.to_string(),
            request_id: "req-1".to_string(),
            cpu_cores: 2,
            memory: 4,
            created_at: 1000,
        })
    }

    // ── Host CRUD ──────────────────────────────────────────────────

    #[test]
    fn host_insert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();

        assert_eq!(stored.revision, 1);
        assert_eq!(store.get_host("h1").unwrap(), Some(stored));
    }

    #[test]
    fn host_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_host("nope").unwrap().is_none());
    }

    #[test]
    fn duplicate_ip_and_name_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();

        let mut twin = test_host("h2", "10.0.0.1");
        twin.host_name = "h1.local".to_string();
        let err = store.insert_host(&twin).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));

        let err = store.insert_host(&test_host("h1", "10.0.0.9")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    #[test]
    fn host_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        store.insert_host(&test_host("h2", "10.0.0.2")).unwrap();
        assert_eq!(store.list_hosts().unwrap().len(), 2);
    }

    #[test]
    fn host_commit_checks_revision() {
        let store = StateStore::open_in_memory().unwrap();
        let mut host = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();

        host.reserved = true;
        store.commit(&ChangeSet { hosts: vec![host.clone()], ..Default::default() }).unwrap();
        assert_eq!(store.get_host("h1").unwrap().unwrap().revision, 2);

        // Stale copy loses.
        host.reserved = false;
        let err = store
            .commit(&ChangeSet { hosts: vec![host], ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(id) if id == "h1"));
        assert!(store.get_host("h1").unwrap().unwrap().reserved);
    }

    #[test]
    fn delete_is_soft_and_cascades_disks() {
        let store = StateStore::open_in_memory().unwrap();
        let host = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();

        store.delete_hosts(&[host], 2000).unwrap();

        let deleted = store.get_host("h1").unwrap().unwrap();
        assert_eq!(deleted.status, HostStatus::Deleted);
        assert_eq!(deleted.deleted_at, Some(2000));
        assert!(deleted.disks.is_empty());

        // Same ip/name may be imported again under a new ID.
        let mut again = test_host("h9", "10.0.0.1");
        again.host_name = "h1.local".to_string();
        store.insert_host(&again).unwrap();
    }

    #[test]
    fn delete_refuses_host_with_reservations() {
        let store = StateStore::open_in_memory().unwrap();
        let host = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        store
            .commit(&ChangeSet {
                insert: vec![compute("h1", "c1", "cluster-a")],
                ..Default::default()
            })
            .unwrap();

        let err = store.delete_hosts(&[host], 2000).unwrap_err();
        assert!(matches!(err, StateError::InUse(_)));
        assert_eq!(store.get_host("h1").unwrap().unwrap().status, HostStatus::Online);
    }

    #[test]
    fn delete_of_several_hosts_is_all_or_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let h1 = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        let h2 = store.insert_host(&test_host("h2", "10.0.0.2")).unwrap();
        store.insert_host(&test_host("h10", "10.0.0.10")).unwrap();
        store
            .commit(&ChangeSet {
                insert: vec![compute("h2", "c1", "cluster-a"), compute("h10", "c2", "cluster-a")],
                ..Default::default()
            })
            .unwrap();

        let err = store.delete_hosts(&[h1.clone(), h2], 2000).unwrap_err();
        assert!(matches!(err, StateError::InUse(id) if id == "h2"));
        assert_eq!(store.get_host("h1").unwrap().unwrap().status, HostStatus::Online);

        // A record on h10 does not hold h1.
        store.delete_hosts(&[h1], 2000).unwrap();
        assert_eq!(store.get_host("h1").unwrap().unwrap().status, HostStatus::Deleted);
        assert_eq!(store.get_host("h10").unwrap().unwrap().status, HostStatus::Online);
    }

    #[test]
    fn delete_with_stale_revision_changes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let h1 = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        let h2 = store.insert_host(&test_host("h2", "10.0.0.2")).unwrap();
        let mut newer = h2.clone();
        newer.reserved = true;
        store.commit(&ChangeSet { hosts: vec![newer], ..Default::default() }).unwrap();

        let err = store.delete_hosts(&[h1, h2], 2000).unwrap_err();
        assert!(matches!(err, StateError::Conflict(id) if id == "h2"));
        assert_eq!(store.get_host("h1").unwrap().unwrap().status, HostStatus::Online);
    }

    // ── Reservations ───────────────────────────────────────────────

    #[test]
    fn commit_writes_hosts_and_reservations_together() {
        let store = StateStore::open_in_memory().unwrap();
        let mut host = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        store.insert_host(&test_host("h2", "10.0.0.2")).unwrap();

        host.free_cpu_cores = 6;
        host.free_memory = 12;
        store
            .commit(&ChangeSet {
                hosts: vec![host],
                insert: vec![
                    compute("h1", "c1", "cluster-a"),
                    compute("h2", "c2", "cluster-a"),
                ],
                remove: vec![],
            })
            .unwrap();

        let h1 = store.get_host("h1").unwrap().unwrap();
        assert_eq!(h1.free_cpu_cores, 6);
        assert_eq!(h1.revision, 2);
        assert_eq!(store.list_reservations("h1").unwrap().computes.len(), 1);
        assert_eq!(store.list_all_reservations().unwrap().len(), 2);
    }

    #[test]
    fn conflicting_commit_changes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        let host = store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();

        let mut first = host.clone();
        first.free_cpu_cores = 4;
        store
            .commit(&ChangeSet {
                hosts: vec![first],
                ..Default::default()
            })
            .unwrap();

        let mut second = host;
        second.free_cpu_cores = 2;
        let err = store
            .commit(&ChangeSet {
                hosts: vec![second],
                insert: vec![compute("h1", "c9", "cluster-b")],
                remove: vec![],
            })
            .unwrap_err();

        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(store.get_host("h1").unwrap().unwrap().free_cpu_cores, 4);
        assert!(store.list_all_reservations().unwrap().is_empty());
    }

    #[test]
    fn commit_removes_reservations() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        let c1 = compute("h1", "c1", "cluster-a");
        let c2 = compute("h1", "c2", "cluster-b");
        store
            .commit(&ChangeSet {
                insert: vec![c1.clone(), c2],
                ..Default::default()
            })
            .unwrap();

        store
            .commit(&ChangeSet {
                remove: vec![c1],
                ..Default::default()
            })
            .unwrap();

        let held = store.list_reservations("h1").unwrap();
        assert_eq!(held.computes.len(), 1);
        assert_eq!(held.computes[0].holder_id, "cluster-b");
    }

    #[test]
    fn reservations_are_scoped_by_host_prefix() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .commit(&ChangeSet {
                insert: vec![compute("h1", "c1", "a"), compute("h10", "c2", "a")],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.list_reservations("h1").unwrap().computes.len(), 1);
        assert_eq!(store.list_reservations("h10").unwrap().computes.len(), 1);
        assert!(store.list_reservations("h2").unwrap().is_empty());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.insert_host(&test_host("h1", "10.0.0.1")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let host = store.get_host("h1").unwrap();
        assert!(host.is_some());
        assert_eq!(host.unwrap().ip, "10.0.0.1");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_hosts().unwrap().is_empty());
        assert!(store.list_all_reservations().unwrap().is_empty());
        assert!(store.list_reservations("any").unwrap().is_empty());
        store.commit(&ChangeSet::default()).unwrap();
        assert!(matches!(
            store.commit(&ChangeSet {
                hosts: vec![test_host("nope", "10.0.0.1")],
                ..Default::default()
            }),
            Err(StateError::NotFound(_))
        ));
    }
}
