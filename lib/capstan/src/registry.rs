use crate::wake::Wake;
use conduit::key::Key;
use hashbrown::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Observable state of a handle. Cancelled is the synonym for "key absent
/// from the registry" and never stored.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Pending,
    Finished,
    Error,
    Lost,
    Cancelled,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Status::Pending => "pending",
            Status::Finished => "finished",
            Status::Error => "error",
            Status::Lost => "lost",
            Status::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

struct Entry {
    status: Status,
    wake: Arc<Wake>,
    exception: Option<String>,
    traceback: Option<String>,
    type_name: Option<String>,
}

impl Entry {
    fn new() -> Entry {
        Entry {
            status: Status::Pending,
            wake: Arc::new(Wake::new()),
            exception: None,
            traceback: None,
            type_name: None,
        }
    }
}

/// Process-wide mapping from key to handle state, with a parallel refcount
/// map. Event-driven transitions run on the event-loop thread; entry creation
/// and refcounting run on whichever thread constructs or drops a handle, so
/// both maps sit behind locks and increments stay atomic with decrements.
pub struct Registry {
    entries: Mutex<HashMap<Key, Entry>>,
    refs: Mutex<HashMap<Key, usize>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            entries: Mutex::new(HashMap::new()),
            refs: Mutex::new(HashMap::new()),
        }
    }

    /// Create a pending entry for the key unless one is already tracked.
    pub fn ensure(&self, key: &Key) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(key.clone()).or_insert_with(Entry::new);
    }

    pub fn inc_ref(&self, key: &Key) {
        let mut refs = self.refs.lock().unwrap();
        *refs.entry(key.clone()).or_insert(0) += 1;
    }

    /// Decrement the refcount. Returns true on the 1 -> 0 transition, at
    /// which point the counter is forgotten and the caller must release the
    /// key.
    pub fn dec_ref(&self, key: &Key) -> bool {
        let mut refs = self.refs.lock().unwrap();

        match refs.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                refs.remove(key);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for a key whose last local reference is gone. The wake
    /// is cleared so a stale `Arc` held by a racing waiter re-blocks rather
    /// than observing a phantom completion.
    pub fn release(&self, key: &Key) -> bool {
        let mut entries = self.entries.lock().unwrap();

        match entries.remove(key) {
            Some(entry) => {
                entry.wake.clear();
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[inline]
    pub fn refcount(&self, key: &Key) -> usize {
        *self.refs.lock().unwrap().get(key).unwrap_or(&0)
    }

    pub fn status(&self, key: &Key) -> Status {
        match self.entries.lock().unwrap().get(key) {
            Some(entry) => entry.status,
            None => Status::Cancelled,
        }
    }

    pub fn wake_of(&self, key: &Key) -> Option<Arc<Wake>> {
        self.entries.lock().unwrap().get(key).map(|entry| entry.wake.clone())
    }

    pub fn exception_of(&self, key: &Key) -> Option<String> {
        self.entries.lock().unwrap().get(key).and_then(|entry| entry.exception.clone())
    }

    pub fn traceback_of(&self, key: &Key) -> Option<String> {
        self.entries.lock().unwrap().get(key).and_then(|entry| entry.traceback.clone())
    }

    pub fn type_of(&self, key: &Key) -> Option<String> {
        self.entries.lock().unwrap().get(key).and_then(|entry| entry.type_name.clone())
    }

    /// The key's payload landed in cluster memory. The reported type is
    /// recorded the first time only.
    pub fn mark_finished(&self, key: &Key, type_name: Option<String>) {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get_mut(key) {
            entry.status = Status::Finished;
            if entry.type_name.is_none() {
                entry.type_name = type_name;
            }
            entry.wake.set();
        }
    }

    /// The key's payload fell out of cluster memory; re-arm the wake until
    /// recomputation lands.
    pub fn mark_lost(&self, key: &Key) {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get_mut(key) {
            entry.status = Status::Lost;
            entry.wake.clear();
        }
    }

    pub fn mark_erred(&self, key: &Key, exception: String, traceback: Option<String>) {
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get_mut(key) {
            entry.status = Status::Error;
            entry.exception = Some(exception);
            entry.traceback = traceback;
            entry.wake.set();
        }
    }

    /// Remove the key, waking any blocked observer so it sees the absence.
    pub fn cancel_key(&self, key: &Key) -> bool {
        let mut entries = self.entries.lock().unwrap();

        match entries.remove(key) {
            Some(entry) => {
                entry.wake.set();
                true
            }
            None => false,
        }
    }

    /// Drop every entry and set every wake so all pending waiters unblock
    /// with whatever status they observe. Returns how many were woken.
    pub fn clear_all(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();

        for (_, entry) in entries.drain() {
            entry.wake.set();
        }

        count
    }
}
