use crate::driver::{Core, ErrorPolicy};
use crate::error::{DriverError, DriverResult};
use crate::registry::Status;
use crate::task::{Datum, Tree};
use conduit::key::Key;
use conduit::support::WireError;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// Local proxy for a result running remotely. A handle carries only its key
/// and the shared driver core; every observation goes through the registry,
/// which owns the state. Cloning retains the key in cluster memory; dropping
/// the last clone releases it.
pub struct Handle {
    key: Key,
    core: Arc<Core>,
}

/// Nested structure of handles accepted by gather.
pub type HandleTree = Tree<Handle>;

impl Handle {
    pub(crate) fn new(key: Key, core: &Arc<Core>) -> Handle {
        core.registry.inc_ref(&key);
        core.registry.ensure(&key);

        Handle {
            key,
            core: core.clone(),
        }
    }

    #[inline]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[inline]
    pub(crate) fn wake(&self) -> Option<Arc<crate::wake::Wake>> {
        self.core.registry.wake_of(&self.key)
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.core.registry.status(&self.key)
    }

    /// Is the computation complete?
    #[inline]
    pub fn done(&self) -> bool {
        match self.core.registry.wake_of(&self.key) {
            Some(wake) => wake.is_set(),
            None => true,
        }
    }

    /// True once the handle's key is no longer tracked locally.
    #[inline]
    pub fn cancelled(&self) -> bool {
        !self.core.registry.contains(&self.key)
    }

    /// Concrete result type as reported by the scheduler, if known yet.
    #[inline]
    pub fn type_name(&self) -> Option<String> {
        self.core.registry.type_of(&self.key)
    }

    /// Wait until the computation settles and return the stored exception of
    /// a failed task, or `None` when it succeeded.
    pub fn exception(&self) -> DriverResult<Option<String>> {
        let wake = self
            .core
            .registry
            .wake_of(&self.key)
            .ok_or_else(|| DriverError::Cancelled(self.key.clone()))?;

        wake.wait();
        Ok(self.core.registry.exception_of(&self.key))
    }

    /// Wait until the computation settles and return the traceback of a
    /// failed task, if the scheduler captured one.
    pub fn traceback(&self) -> DriverResult<Option<String>> {
        let wake = self
            .core
            .registry
            .wake_of(&self.key)
            .ok_or_else(|| DriverError::Cancelled(self.key.clone()))?;

        wake.wait();
        Ok(self.core.registry.traceback_of(&self.key))
    }

    /// Wait until the computation completes, then pull the payload into the
    /// local process. A failed task resurfaces its stored fault; a cancelled
    /// handle errs accordingly.
    pub fn result(&self) -> DriverResult<Vec<u8>> {
        let wake = self
            .core
            .registry
            .wake_of(&self.key)
            .ok_or_else(|| DriverError::Cancelled(self.key.clone()))?;

        wake.wait();

        match self.core.registry.status(&self.key) {
            Status::Error => Err(DriverError::Task {
                exception: self
                    .core
                    .registry
                    .exception_of(&self.key)
                    .unwrap_or_default(),
                traceback: self.core.registry.traceback_of(&self.key),
            }),
            Status::Cancelled => Err(DriverError::Cancelled(self.key.clone())),
            _ => {
                let (mut data, _) = self
                    .core
                    .gather_flat(std::slice::from_ref(&self.key), ErrorPolicy::Raise)?;

                data.remove(&self.key)
                    .ok_or_else(|| DriverError::Rpc("gather returned no payload".to_string()))
            }
        }
    }

    /// `result` decoded with the default codec.
    pub fn result_as<T: DeserializeOwned>(&self) -> DriverResult<T> {
        let bytes = self.result()?;
        Ok(bincode::deserialize(&bytes).map_err(WireError::from)?)
    }

    /// Ask the scheduler to cancel this computation and erase it locally.
    pub fn cancel(&self) -> DriverResult<()> {
        self.core.cancel_keys(vec![self.key.clone()], false)
    }
}

impl Clone for Handle {
    fn clone(&self) -> Handle {
        Handle::new(self.key.clone(), &self.core)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.core.registry.dec_ref(&self.key) {
            self.core.release_key(&self.key);
        }
    }
}

impl From<&Handle> for Datum {
    /// A handle used as a task argument is a remote reference to its key.
    #[inline]
    fn from(handle: &Handle) -> Datum {
        Datum::Remote(handle.key.clone())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.type_name() {
            Some(type_name) => write!(
                f,
                "<Handle: status: {}, type: {}, key: {}>",
                self.status(),
                type_name,
                self.key
            ),
            None => write!(f, "<Handle: status: {}, key: {}>", self.status(), self.key),
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
