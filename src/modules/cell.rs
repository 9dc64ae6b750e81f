// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! One-time, lazily triggered module loading shared by every adapter.
//!
//! The compiled module is loaded once per process. The first adapter to ask
//! for it starts the load; adapters asking while the load is running are
//! registered as waiters. Every waiter receives exactly one
//! [`PortEvent::ModuleLoaded`] or [`PortEvent::ModuleFailed`] on its port when
//! the load settles. A failure is final.

use super::{LoadError, ModuleFactory, ModuleLoader};
use crate::message::{Message, PortEvent, PortSender};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::thread;
use tracing::{debug, error, info};

/// Process-wide module cell.
static GLOBAL_CELL: OnceLock<Arc<ModuleCell>> = OnceLock::new();

/// Snapshot of a cell's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unstarted,
    Pending,
    Ready,
    Failed,
}

/// Outcome of [`ModuleCell::claim`].
pub enum Claim {
    /// The caller moved the cell to `Pending` and must start the load.
    Start,
    /// Someone else is loading; the caller will be notified.
    Pending,
    /// The module is available.
    Ready(Arc<dyn ModuleFactory>),
    /// The module failed to load earlier.
    Failed(Arc<LoadError>),
}

enum Phase {
    Unstarted,
    Pending,
    Ready(Arc<dyn ModuleFactory>),
    Failed(Arc<LoadError>),
}

struct Inner {
    phase: Phase,
    waiters: Vec<PortSender>,
}

pub struct ModuleCell {
    inner: Mutex<Inner>,
}

impl ModuleCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Unstarted,
                waiters: Vec::new(),
            }),
        }
    }

    /// Get the process-wide cell.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_CELL.get_or_init(|| Arc::new(Self::new())))
    }

    pub fn state(&self) -> ModuleState {
        match self.inner.lock().phase {
            Phase::Unstarted => ModuleState::Unstarted,
            Phase::Pending => ModuleState::Pending,
            Phase::Ready(_) => ModuleState::Ready,
            Phase::Failed(_) => ModuleState::Failed,
        }
    }

    /// The loaded module, if ready.
    pub fn module(&self) -> Option<Arc<dyn ModuleFactory>> {
        match &self.inner.lock().phase {
            Phase::Ready(module) => Some(Arc::clone(module)),
            _ => None,
        }
    }

    /// The load failure, if the load failed.
    pub fn failure(&self) -> Option<Arc<LoadError>> {
        match &self.inner.lock().phase {
            Phase::Failed(err) => Some(Arc::clone(err)),
            _ => None,
        }
    }

    /// Atomically inspect the cell and, if nothing is loaded yet, either take
    /// responsibility for the load or register `waiter` for its outcome.
    pub fn claim(&self, waiter: &PortSender) -> Claim {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let starting = match &inner.phase {
            Phase::Ready(module) => return Claim::Ready(Arc::clone(module)),
            Phase::Failed(err) => return Claim::Failed(Arc::clone(err)),
            Phase::Pending => false,
            Phase::Unstarted => true,
        };

        if starting {
            inner.phase = Phase::Pending;
            inner.waiters.push(waiter.clone());
            Claim::Start
        } else {
            if !inner.waiters.iter().any(|w| w.same_channel(waiter)) {
                inner.waiters.push(waiter.clone());
            }
            Claim::Pending
        }
    }

    /// Run `loader` on a dedicated thread and settle the cell with its result.
    ///
    /// Must only be called after [`claim`](Self::claim) returned
    /// [`Claim::Start`]. Returns immediately.
    pub fn spawn_load(self: &Arc<Self>, loader: Arc<dyn ModuleLoader>, source: Message) {
        let cell = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("procwrap-loader".to_string())
            .spawn(move || {
                debug!("Loading module from {} byte source", source.len());
                let result = loader.load(&source);
                cell.settle(result);
            });

        if let Err(e) = spawned {
            error!("Failed to spawn module loader thread: {}", e);
            self.settle(Err(LoadError::Io(e)));
        }
    }

    /// Record the load outcome and notify every waiter.
    fn settle(&self, result: Result<Arc<dyn ModuleFactory>, LoadError>) {
        let (event, waiters) = {
            let mut inner = self.inner.lock();
            let event = match result {
                Ok(module) => {
                    info!("Module ready: {}", module.name());
                    inner.phase = Phase::Ready(module);
                    PortEvent::ModuleLoaded
                }
                Err(e) => {
                    error!("Module load failed: {}", e);
                    let err = Arc::new(e);
                    inner.phase = Phase::Failed(Arc::clone(&err));
                    PortEvent::ModuleFailed(err)
                }
            };
            (event, std::mem::take(&mut inner.waiters))
        };

        debug!("Notifying {} waiting adapters", waiters.len());
        for waiter in waiters {
            // A closed port means the adapter is gone; nothing to resume.
            let _ = waiter.send(event.clone());
        }
    }
}

impl Default for ModuleCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::port;
    use crate::modules::{InnerInstance, LoadResult};
    use procwrap_module_api::ActivationContext;

    struct Named;

    impl ModuleFactory for Named {
        fn name(&self) -> &str {
            "named"
        }

        fn instantiate(&self, _context: &ActivationContext) -> LoadResult<Box<dyn InnerInstance>> {
            Err(LoadError::Instantiation("not in this test".into()))
        }
    }

    struct Fixed(bool);

    impl ModuleLoader for Fixed {
        fn load(&self, _source: &Message) -> LoadResult<Arc<dyn ModuleFactory>> {
            if self.0 {
                Ok(Arc::new(Named))
            } else {
                Err(LoadError::EmptySource)
            }
        }
    }

    #[test]
    fn test_first_claim_starts_later_claims_wait() {
        let cell = ModuleCell::new();
        let (a, _ra) = port();
        let (b, _rb) = port();

        assert!(matches!(cell.claim(&a), Claim::Start));
        assert_eq!(cell.state(), ModuleState::Pending);
        assert!(matches!(cell.claim(&b), Claim::Pending));
        assert!(matches!(cell.claim(&b), Claim::Pending));
        assert_eq!(cell.inner.lock().waiters.len(), 2);
    }

    #[test]
    fn test_load_notifies_all_waiters_once() {
        let cell = Arc::new(ModuleCell::new());
        let (a, mut ra) = port();
        let (b, mut rb) = port();

        assert!(matches!(cell.claim(&a), Claim::Start));
        assert!(matches!(cell.claim(&b), Claim::Pending));
        cell.spawn_load(Arc::new(Fixed(true)), Message::new(b"x".to_vec()));

        assert!(matches!(ra.blocking_recv(), Some(PortEvent::ModuleLoaded)));
        assert!(matches!(rb.blocking_recv(), Some(PortEvent::ModuleLoaded)));
        assert!(ra.try_recv().is_err());
        assert_eq!(cell.state(), ModuleState::Ready);
        assert!(matches!(cell.claim(&a), Claim::Ready(_)));
        assert_eq!(cell.module().map(|m| m.name().to_string()), Some("named".into()));
    }

    #[test]
    fn test_failure_is_final() {
        let cell = Arc::new(ModuleCell::new());
        let (a, mut ra) = port();

        assert!(matches!(cell.claim(&a), Claim::Start));
        cell.spawn_load(Arc::new(Fixed(false)), Message::default());

        assert!(matches!(ra.blocking_recv(), Some(PortEvent::ModuleFailed(_))));
        assert_eq!(cell.state(), ModuleState::Failed);
        assert!(matches!(cell.claim(&a), Claim::Failed(_)));
        assert!(matches!(
            cell.failure().as_deref(),
            Some(LoadError::EmptySource)
        ));
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&ModuleCell::global(), &ModuleCell::global()));
    }
}
