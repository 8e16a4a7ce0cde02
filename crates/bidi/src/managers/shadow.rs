//! Shadow Root Manager - per-context shadow root handle table
//!
//! Shadow roots are discovered when element lookups come back carrying a
//! shadow root handle; they are only valid within the document that produced
//! them, so the table is flushed for a context on navigation and dropped
//! entirely when the context is destroyed.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::managers::{SessionManager, SubscriptionSet};
use crate::transport::Connection;

type SharedId = String;

pub struct ShadowRootManager {
    /// context id -> (host element shared id -> shadow root shared id)
    roots: Arc<DashMap<String, HashMap<SharedId, SharedId>>>,
    subs: SubscriptionSet,
}

impl ShadowRootManager {
    pub fn new() -> Self {
        Self {
            roots: Arc::new(DashMap::new()),
            subs: SubscriptionSet::new(),
        }
    }

    /// Remember the shadow root attached to `host` in `context`
    pub fn register(&self, context: &str, host: &str, shadow_root: &str) {
        self.roots
            .entry(context.to_string())
            .or_default()
            .insert(host.to_string(), shadow_root.to_string());
    }

    /// Shadow root handle for `host`, if one is known in `context`
    pub fn get(&self, context: &str, host: &str) -> Option<SharedId> {
        self.roots
            .get(context)
            .and_then(|hosts| hosts.get(host).cloned())
    }

    /// Forget one shadow root (its host was removed from the DOM)
    pub fn delete(&self, context: &str, host: &str) {
        if let Some(mut hosts) = self.roots.get_mut(context) {
            hosts.remove(host);
        }
    }

    /// Drop everything known for a context
    pub fn clear_context(&self, context: &str) {
        self.roots.remove(context);
    }

    pub fn known_count(&self, context: &str) -> usize {
        self.roots.get(context).map_or(0, |hosts| hosts.len())
    }
}

impl Default for ShadowRootManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionManager for ShadowRootManager {
    fn name(&self) -> &str {
        "ShadowRootManager"
    }

    async fn attach(&self, conn: Arc<Connection>) -> Result<()> {
        // Both a navigation and a context teardown invalidate every handle
        // minted in that context
        for method in [
            "browsingContext.navigationStarted",
            "browsingContext.contextDestroyed",
        ] {
            let roots = self.roots.clone();
            let id = conn.on(
                method,
                Arc::new(move |event| {
                    if let Some(context) = event.params.get("context").and_then(|c| c.as_str()) {
                        if roots.remove(context).is_some() {
                            tracing::debug!(
                                "[ShadowRootManager] Dropped shadow roots for {}",
                                context
                            );
                        }
                    }
                }),
            );
            self.subs.track(method, id);
        }

        tracing::info!("[ShadowRootManager] Attached");
        Ok(())
    }

    async fn detach(&self, conn: Arc<Connection>) -> Result<()> {
        self.subs.clear(&conn);
        self.roots.clear();
        tracing::info!("[ShadowRootManager] Detached");
        Ok(())
    }
}
