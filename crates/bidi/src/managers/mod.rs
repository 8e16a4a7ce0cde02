//! Session manager system
//!
//! Each manager derives local state purely from the event/command/result
//! stream of one session: it registers Connection listeners on attach and
//! tears them down (not merely drops them) on detach. Managers never touch
//! transport internals; they only read frames and issue new commands.
//!
//! The registry is an explicit object owned by the session - no module-level
//! globals - so manager lifetime is tied 1:1 to the Connection.

pub mod context;
pub mod dialog;
pub mod network;
pub mod polyfill;
pub mod shadow;

pub use context::ContextManager;
pub use dialog::{DialogManager, PromptPolicy};
pub use network::{InterceptAction, InterceptRule, NetworkManager};
pub use polyfill::PolyfillManager;
pub use shadow::ShadowRootManager;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::transport::{Connection, SubscriptionId};

/// A per-session state tracker layered on the Connection's frame stream
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Register event listeners; called once per session start
    async fn attach(&self, conn: Arc<Connection>) -> Result<()>;

    /// Remove listeners and drop local state; called on session end
    async fn detach(&self, conn: Arc<Connection>) -> Result<()>;
}

/// Registry of managers for one session
pub struct ManagerRegistry {
    managers: Vec<Arc<dyn SessionManager>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self {
            managers: Vec::new(),
        }
    }

    pub fn register(&mut self, manager: Arc<dyn SessionManager>) {
        tracing::debug!("Registered session manager: {}", manager.name());
        self.managers.push(manager);
    }

    pub async fn attach_all(&self, conn: Arc<Connection>) -> Result<()> {
        for manager in &self.managers {
            manager.attach(conn.clone()).await?;
        }
        Ok(())
    }

    pub async fn detach_all(&self, conn: Arc<Connection>) -> Result<()> {
        for manager in &self.managers {
            manager.detach(conn.clone()).await?;
        }
        Ok(())
    }
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener bookkeeping shared by every manager: remembers (method, id) pairs
/// so detach can unsubscribe instead of leaking closures holding the socket
#[derive(Default)]
pub struct SubscriptionSet {
    entries: Mutex<Vec<(String, SubscriptionId)>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, method: &str, id: SubscriptionId) {
        self.entries.lock().unwrap().push((method.to_string(), id));
    }

    pub fn clear(&self, conn: &Connection) {
        for (method, id) in self.entries.lock().unwrap().drain(..) {
            conn.off(&method, id);
        }
    }
}
