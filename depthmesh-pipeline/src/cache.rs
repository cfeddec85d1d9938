//! Fingerprint-keyed cache of processed meshes
//!
//! Reads go straight to a shared map under a read lock. Every mutation is
//! queued to a single writer thread, which applies it under the write
//! lock, so readers see an entry either fully present or absent.

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use depthmesh_core::{Error, ProcessedMesh, Result};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::{debug, warn};

/// Stable digest of a serialized input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of `data`, covering its length and every byte
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write_usize(data.len());
        hasher.write(data);
        Self(hasher.finish())
    }

    /// Fingerprint of `data` processed under settings digested as
    /// `settings`. Equal bytes under different settings get different keys.
    pub fn of_with(data: &[u8], settings: u64) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write_u64(Self::of(data).0);
        hasher.write_u64(settings);
        Self(hasher.finish())
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

struct Entry {
    mesh: Arc<ProcessedMesh>,
    size_bytes: usize,
    last_access: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<Fingerprint, Entry>,
    used_bytes: usize,
}

struct Shared {
    state: RwLock<CacheState>,
    clock: AtomicU64,
    budget_bytes: usize,
}

impl Shared {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn apply(&self, command: Command) {
        match command {
            Command::Set {
                fingerprint,
                mesh,
                size_bytes,
            } => self.insert(fingerprint, mesh, size_bytes),
            Command::Remove(fingerprint) => {
                let mut state = self.state.write();
                if let Some(old) = state.entries.remove(&fingerprint) {
                    state.used_bytes -= old.size_bytes;
                }
            }
            Command::Clear => {
                let mut state = self.state.write();
                state.entries.clear();
                state.used_bytes = 0;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn insert(&self, fingerprint: Fingerprint, mesh: Arc<ProcessedMesh>, size_bytes: usize) {
        let mut state = self.state.write();
        // A replaced entry goes even when its successor is not admitted
        if let Some(old) = state.entries.remove(&fingerprint) {
            state.used_bytes -= old.size_bytes;
        }

        if size_bytes > self.budget_bytes {
            warn!(
                fingerprint = fingerprint.value(),
                size_bytes,
                budget = self.budget_bytes,
                "mesh larger than cache budget, not cached"
            );
            return;
        }

        while state.used_bytes + size_bytes > self.budget_bytes {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::SeqCst))
                .map(|(k, _)| *k);
            let Some(key) = oldest else { break };
            if let Some(evicted) = state.entries.remove(&key) {
                state.used_bytes -= evicted.size_bytes;
                debug!(fingerprint = key.value(), size_bytes = evicted.size_bytes, "evicted cached mesh");
            }
        }

        state.used_bytes += size_bytes;
        state.entries.insert(
            fingerprint,
            Entry {
                mesh,
                size_bytes,
                last_access: AtomicU64::new(self.tick()),
            },
        );
    }
}

enum Command {
    Set {
        fingerprint: Fingerprint,
        mesh: Arc<ProcessedMesh>,
        size_bytes: usize,
    },
    Remove(Fingerprint),
    Clear,
    Flush(flume::Sender<()>),
}

/// Byte-bounded least-recently-used cache of processed meshes
pub struct ProcessedMeshCache {
    shared: Arc<Shared>,
    sender: Option<flume::Sender<Command>>,
    writer: Option<JoinHandle<()>>,
}

impl ProcessedMeshCache {
    /// Create a cache holding at most `budget_bytes` of meshes and start
    /// its writer thread
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: RwLock::new(CacheState::default()),
            clock: AtomicU64::new(0),
            budget_bytes,
        });
        let (sender, receiver) = flume::unbounded::<Command>();

        let writer_state = Arc::clone(&shared);
        let writer = std::thread::Builder::new()
            .name("depthmesh-cache-writer".to_string())
            .spawn(move || {
                for command in receiver.iter() {
                    writer_state.apply(command);
                }
            })
            .map_err(|e| Error::ProcessingFailed {
                operation: "cache".to_string(),
                reason: format!("failed to start writer thread: {}", e),
            })?;

        Ok(Self {
            shared,
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    /// Look up a mesh and mark it as most recently used
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ProcessedMesh>> {
        let state = self.shared.state.read();
        let entry = state.entries.get(fingerprint)?;
        entry.last_access.store(self.shared.tick(), Ordering::SeqCst);
        debug!(fingerprint = fingerprint.value(), "cache hit");
        Some(Arc::clone(&entry.mesh))
    }

    /// Queue `mesh` for insertion, evicting the least recently used
    /// entries until it fits
    pub fn set(&self, fingerprint: Fingerprint, mesh: Arc<ProcessedMesh>, size_bytes: usize) {
        self.send(Command::Set {
            fingerprint,
            mesh,
            size_bytes,
        });
    }

    /// Queue removal of one entry
    pub fn remove(&self, fingerprint: Fingerprint) {
        self.send(Command::Remove(fingerprint));
    }

    /// Queue removal of every entry
    pub fn clear(&self) {
        self.send(Command::Clear);
    }

    /// Block until every previously queued write has been applied
    pub fn flush(&self) {
        let (done, wait) = flume::bounded(1);
        if self.try_send(Command::Flush(done)) {
            let _ = wait.recv();
        }
    }

    fn send(&self, command: Command) {
        if !self.try_send(command) {
            warn!("cache writer has stopped, dropping write");
        }
    }

    fn try_send(&self, command: Command) -> bool {
        self.sender
            .as_ref()
            .map_or(false, |sender| sender.send(command).is_ok())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.shared.state.read().entries.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.shared.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by applied entries
    pub fn used_bytes(&self) -> usize {
        self.shared.state.read().used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.shared.budget_bytes
    }
}

impl Drop for ProcessedMeshCache {
    fn drop(&mut self) {
        // Closing the queue lets the writer drain it and exit
        self.sender.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthmesh_core::{MeshData, MeshQuality, Point3f, Vector3f};

    fn mesh(offset: f32) -> Arc<ProcessedMesh> {
        let vertices = vec![
            Point3f::new(offset, 0.0, 0.0),
            Point3f::new(offset + 1.0, 0.0, 0.0),
            Point3f::new(offset, 1.0, 0.0),
        ];
        let data = MeshData::from_parts(vertices, vec![Vector3f::z(); 3], vec![0, 1, 2]);
        Arc::new(ProcessedMesh::new(data, MeshQuality::Good))
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Fingerprint::of(b"scan bytes");
        assert_eq!(a, Fingerprint::of(b"scan bytes"));
        assert_ne!(a, Fingerprint::of(b"scan byteS"));
        assert_ne!(Fingerprint::of(&[]), Fingerprint::of(&[0]));
    }

    #[test]
    fn test_set_then_get() {
        let cache = ProcessedMeshCache::new(1000).unwrap();
        let key = Fingerprint::of(b"a");
        cache.set(key, mesh(0.0), 100);
        cache.flush();

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.vertex_count(), 3);
        assert_eq!(cache.used_bytes(), 100);
        assert!(cache.get(&Fingerprint::of(b"b")).is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ProcessedMeshCache::new(300).unwrap();
        let (a, b, c, d) = (
            Fingerprint::of(b"a"),
            Fingerprint::of(b"b"),
            Fingerprint::of(b"c"),
            Fingerprint::of(b"d"),
        );
        cache.set(a, mesh(0.0), 100);
        cache.set(b, mesh(1.0), 100);
        cache.set(c, mesh(2.0), 100);
        cache.flush();

        // Touching `a` makes `b` the oldest
        assert!(cache.get(&a).is_some());
        cache.set(d, mesh(3.0), 150);
        cache.flush();

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(!cache.contains(&c));
        assert!(cache.contains(&d));
        assert_eq!(cache.used_bytes(), 250);
    }

    #[test]
    fn test_replacing_entry_updates_size() {
        let cache = ProcessedMeshCache::new(300).unwrap();
        let key = Fingerprint::of(b"a");
        cache.set(key, mesh(0.0), 200);
        cache.set(key, mesh(1.0), 250);
        cache.flush();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 250);
        assert_eq!(cache.get(&key).unwrap().vertices()[0].x, 1.0);
    }

    #[test]
    fn test_oversized_entry_is_not_admitted() {
        let cache = ProcessedMeshCache::new(100).unwrap();
        let small = Fingerprint::of(b"small");
        cache.set(small, mesh(0.0), 50);
        cache.set(Fingerprint::of(b"big"), mesh(1.0), 101);
        cache.flush();
        assert!(cache.contains(&small));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_settings_change_the_fingerprint() {
        let plain = Fingerprint::of_with(b"scan", 1);
        assert_eq!(plain, Fingerprint::of_with(b"scan", 1));
        assert_ne!(plain, Fingerprint::of_with(b"scan", 2));
        assert_ne!(plain, Fingerprint::of_with(b"scan!", 1));
    }

    #[test]
    fn test_oversized_replacement_drops_old_entry() {
        let cache = ProcessedMeshCache::new(100).unwrap();
        let key = Fingerprint::of(b"a");
        cache.set(key, mesh(0.0), 60);
        cache.set(key, mesh(1.0), 101);
        cache.flush();
        assert!(!cache.contains(&key));
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ProcessedMeshCache::new(1000).unwrap();
        let (a, b) = (Fingerprint::of(b"a"), Fingerprint::of(b"b"));
        cache.set(a, mesh(0.0), 10);
        cache.set(b, mesh(1.0), 20);
        cache.remove(a);
        cache.flush();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 20);

        cache.clear();
        cache.flush();
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cache = Arc::new(ProcessedMeshCache::new(10_000).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50u32 {
                        let key = Fingerprint::of(&(t * 100 + i).to_le_bytes());
                        cache.set(key, mesh(i as f32), 10);
                        if let Some(hit) = cache.get(&key) {
                            assert_eq!(hit.vertex_count(), 3);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        cache.flush();
        assert_eq!(cache.len(), 200);
        assert_eq!(cache.used_bytes(), 2000);
    }
}
