//! Durable order records.
//!
//! Every submitted order has a record until it is confirmed or cancelled, so a
//! restarted process can see what is still outstanding at the broker.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use parking_lot::Mutex;
use theta_core::{Order, ThetaError};
use tracing::warn;

pub trait OrderStore: Send + Sync {
    /// Insert or replace the record for `order.id`.
    fn put(&self, order: &Order) -> Result<(), ThetaError>;
    /// Delete the record for `id`. Missing records are not an error.
    fn remove(&self, id: u64) -> Result<(), ThetaError>;
    /// Every stored record, sorted by id.
    fn load_all(&self) -> Result<Vec<Order>, ThetaError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: Mutex<AHashMap<u64, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }
}

impl OrderStore for MemoryOrderStore {
    fn put(&self, order: &Order) -> Result<(), ThetaError> {
        self.orders.lock().insert(order.id, order.clone());
        Ok(())
    }

    fn remove(&self, id: u64) -> Result<(), ThetaError> {
        self.orders.lock().remove(&id);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Order>, ThetaError> {
        let mut all: Vec<Order> = self.orders.lock().values().cloned().collect();
        all.sort_by_key(|o| o.id);
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// File-backed
// ---------------------------------------------------------------------------

/// One `order-<id>.json` file per outstanding order.
///
/// Writes go to a temporary file first and are renamed into place, so a crash
/// never leaves a half-written record.
#[derive(Debug)]
pub struct FileOrderStore {
    dir: PathBuf,
}

impl FileOrderStore {
    /// Open (and create if needed) the record directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ThetaError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| ThetaError::OrderStore(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("order-{id}.json"))
    }
}

fn record_id(path: &Path) -> Option<u64> {
    path.file_name()?.to_str()?.strip_prefix("order-")?.strip_suffix(".json")?.parse().ok()
}

impl OrderStore for FileOrderStore {
    fn put(&self, order: &Order) -> Result<(), ThetaError> {
        let path = self.record_path(order.id);
        let tmp = path.with_extension("json.tmp");
        let body =
            serde_json::to_vec_pretty(order).map_err(|e| ThetaError::OrderStore(e.to_string()))?;
        std::fs::write(&tmp, body)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| ThetaError::OrderStore(format!("write {}: {e}", path.display())))
    }

    fn remove(&self, id: u64) -> Result<(), ThetaError> {
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ThetaError::OrderStore(format!("remove {}: {e}", path.display()))),
        }
    }

    fn load_all(&self) -> Result<Vec<Order>, ThetaError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| ThetaError::OrderStore(format!("read {}: {e}", self.dir.display())))?;

        let mut all = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ThetaError::OrderStore(e.to_string()))?.path();
            if record_id(&path).is_none() {
                continue;
            }
            let parsed = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|b| serde_json::from_slice::<Order>(&b).map_err(|e| e.to_string()));
            match parsed {
                Ok(order) => all.push(order),
                Err(e) => warn!("[orders] skipping unreadable record {}: {e}", path.display()),
            }
        }
        all.sort_by_key(|o| o.id);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use theta_core::{Direction, OrderKind, OrderStatus};

    use super::*;

    fn order(id: u64) -> Order {
        Order {
            id,
            symbol: "NIFTY25JAN22150CE".into(),
            direction: Direction::Buy,
            quantity: 75,
            kind: OrderKind::StopMarket,
            price: None,
            trigger_price: Some(132.0),
            parent_order_id: Some(1),
            status: OrderStatus::Pending,
            created_ms: 1,
        }
    }

    #[test]
    fn memory_store_roundtrip() {
        let s = MemoryOrderStore::new();
        s.put(&order(3)).unwrap();
        s.put(&order(1)).unwrap();
        s.remove(1).unwrap();
        s.remove(99).unwrap();
        let ids: Vec<u64> = s.load_all().unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, [3]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = FileOrderStore::open(dir.path()).unwrap();
            s.put(&order(7)).unwrap();
            s.put(&order(2)).unwrap();
            s.put(&order(5)).unwrap();
            s.remove(5).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("order-9.json"), "{ not json").unwrap();

        let s = FileOrderStore::open(dir.path()).unwrap();
        let loaded = s.load_all().unwrap();
        assert_eq!(loaded.iter().map(|o| o.id).collect::<Vec<_>>(), [2, 7]);
        assert_eq!(loaded[1], order(7));
        assert!(!dir.path().join("order-7.json.tmp").exists());
    }

    #[test]
    fn record_names() {
        assert_eq!(record_id(Path::new("/x/order-42.json")), Some(42));
        assert_eq!(record_id(Path::new("/x/order-42.json.tmp")), None);
        assert_eq!(record_id(Path::new("/x/fill-42.json")), None);
    }
}
