//! Context Manager - browsing-context tree derived from events
//!
//! The browser never answers "what contexts exist right now" synchronously;
//! the tree here is rebuilt from `browsingContext.contextCreated` /
//! `contextDestroyed` frames (plus on-demand `getTree` refreshes) as they
//! arrive. Effects are applied per frame - command resolution is never
//! blocked on tree consistency.
//!
//! Window-close races have two detection paths: the destroy event stream and
//! the close-command result path. Both funnel into the same removal logic,
//! and the "all window handles were removed" condition is announced once.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::commands::{BidiCommands, ContextInfo, GetTreeParams};
use crate::error::{BidiError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::managers::{SessionManager, SubscriptionSet};
use crate::transport::Connection;

struct ContextNode {
    url: String,
    parent: Option<String>,
    children: Vec<String>,
}

#[derive(Default)]
struct ContextTree {
    nodes: HashMap<String, ContextNode>,
    /// Top-level contexts in insertion order; drives deterministic fallback
    roots: Vec<String>,
    current: Option<String>,
}

struct Removal {
    removed: Vec<String>,
    reassigned: Option<String>,
    none_remaining: bool,
}

/// Shared tree state; event callbacks hold their own clone of the Arc
struct ContextState {
    tree: Mutex<ContextTree>,
    /// Guards the fatal "no windows left" announcement against double-firing
    fatal_raised: AtomicBool,
    bus: Arc<EventBus>,
}

pub struct ContextManager {
    state: Arc<ContextState>,
    subs: SubscriptionSet,
}

impl ContextManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            state: Arc::new(ContextState {
                tree: Mutex::new(ContextTree::default()),
                fatal_raised: AtomicBool::new(false),
                bus,
            }),
            subs: SubscriptionSet::new(),
        }
    }

    /// Insert a context (and any children the payload carries) into the tree
    pub fn insert_context(&self, info: &ContextInfo) {
        self.state.insert_context(info);
    }

    /// Remove a context and all its descendants. Returns the id of the new
    /// current context when the removal forced a reassignment.
    pub fn remove_context(&self, context: &str) -> Option<String> {
        self.state.remove_context(context)
    }

    /// Rebuild the tree from a `browsingContext.getTree` snapshot
    pub fn replace_tree(&self, contexts: &[ContextInfo]) {
        self.state.replace_tree(contexts);
    }

    /// Fetch the current tree from the remote and replace the local model
    pub async fn refresh(&self, conn: Arc<Connection>) -> Result<()> {
        let result = BidiCommands::new(conn)
            .browsing_context_get_tree(GetTreeParams::default())
            .await?;
        self.replace_tree(&result.contexts);
        Ok(())
    }

    /// Result-driven close detection: the window-close command path reports
    /// the surviving handles here, independent of the event stream
    pub fn handle_close_result(&self, remaining: &[String]) -> Result<()> {
        if remaining.is_empty() {
            self.state.raise_fatal();
            return Err(BidiError::NoWindowsRemaining);
        }
        Ok(())
    }

    /// Fails once the last browsing context is gone
    pub fn ensure_alive(&self) -> Result<()> {
        if self.state.fatal_raised.load(Ordering::SeqCst) {
            return Err(BidiError::NoWindowsRemaining);
        }
        Ok(())
    }

    pub fn current_context(&self) -> Option<String> {
        self.state.tree.lock().unwrap().current.clone()
    }

    pub fn set_current(&self, context: &str) -> Result<()> {
        let mut tree = self.state.tree.lock().unwrap();
        if !tree.nodes.contains_key(context) {
            return Err(BidiError::InvalidResponse {
                method: "browsingContext.activate".into(),
                reason: format!("unknown context {context}"),
            });
        }
        tree.current = Some(context.to_string());
        Ok(())
    }

    /// All live context ids (roots and descendants)
    pub fn context_ids(&self) -> Vec<String> {
        self.state.tree.lock().unwrap().nodes.keys().cloned().collect()
    }

    /// Top-level context ids in insertion order
    pub fn root_ids(&self) -> Vec<String> {
        self.state.tree.lock().unwrap().roots.clone()
    }

    pub fn url_of(&self, context: &str) -> Option<String> {
        self.state
            .tree
            .lock()
            .unwrap()
            .nodes
            .get(context)
            .map(|n| n.url.clone())
    }

    /// Every id must be reachable from a root and the current pointer must
    /// reference a live node (tree invariant check)
    pub fn is_consistent(&self) -> bool {
        let tree = self.state.tree.lock().unwrap();
        let mut reachable = 0usize;
        let mut stack: Vec<String> = tree.roots.clone();
        while let Some(id) = stack.pop() {
            match tree.nodes.get(&id) {
                Some(node) => {
                    reachable += 1;
                    stack.extend(node.children.iter().cloned());
                }
                None => return false,
            }
        }
        reachable == tree.nodes.len()
            && tree
                .current
                .as_ref()
                .map_or(true, |c| tree.nodes.contains_key(c))
    }
}

impl ContextState {
    fn insert_context(&self, info: &ContextInfo) {
        let mut tree = self.tree.lock().unwrap();
        Self::insert_locked(&mut tree, info, info.parent.clone());
        if tree.current.is_none() {
            tree.current = tree.roots.first().cloned();
        }
        drop(tree);
        self.bus.publish(SessionEvent::ContextCreated {
            context: info.context.clone(),
            url: info.url.clone(),
        });
    }

    fn insert_locked(tree: &mut ContextTree, info: &ContextInfo, parent: Option<String>) {
        // A parent we have not seen (subscription started mid-stream) makes
        // the node a root so it stays reachable
        let parent = parent.filter(|id| tree.nodes.contains_key(id));
        if let Some(parent_id) = &parent {
            if let Some(parent_node) = tree.nodes.get_mut(parent_id) {
                if !parent_node.children.contains(&info.context) {
                    parent_node.children.push(info.context.clone());
                }
            }
        } else if !tree.roots.contains(&info.context) {
            tree.roots.push(info.context.clone());
        }

        tree.nodes.insert(
            info.context.clone(),
            ContextNode {
                url: info.url.clone(),
                parent,
                children: Vec::new(),
            },
        );

        for child in info.children.as_deref().unwrap_or_default() {
            Self::insert_locked(tree, child, Some(info.context.clone()));
        }
    }

    fn remove_context(&self, context: &str) -> Option<String> {
        let removal = {
            let mut tree = self.tree.lock().unwrap();
            Self::remove_locked(&mut tree, context)
        }?;

        for removed in &removal.removed {
            self.bus.publish(SessionEvent::ContextDestroyed {
                context: removed.clone(),
            });
        }
        if let Some(context) = &removal.reassigned {
            self.bus.publish(SessionEvent::CurrentContextChanged {
                context: context.clone(),
            });
        }
        if removal.none_remaining {
            self.raise_fatal();
        }
        removal.reassigned
    }

    fn remove_locked(tree: &mut ContextTree, context: &str) -> Option<Removal> {
        if !tree.nodes.contains_key(context) {
            return None;
        }

        // Collect the whole subtree before touching anything
        let mut removed = Vec::new();
        let mut stack = vec![context.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(node) = tree.nodes.get(&id) {
                stack.extend(node.children.iter().cloned());
            }
            removed.push(id);
        }

        let parent = tree.nodes.get(context).and_then(|n| n.parent.clone());
        for id in &removed {
            tree.nodes.remove(id);
        }
        tree.roots.retain(|r| !removed.contains(r));
        if let Some(parent_id) = parent {
            if let Some(parent_node) = tree.nodes.get_mut(&parent_id) {
                parent_node.children.retain(|c| c != context);
            }
        }

        let mut reassigned = None;
        if tree
            .current
            .as_ref()
            .is_some_and(|current| removed.contains(current))
        {
            // Deterministic fallback: first surviving root
            tree.current = tree.roots.first().cloned();
            reassigned = tree.current.clone();
        }

        Some(Removal {
            removed,
            reassigned,
            none_remaining: tree.nodes.is_empty(),
        })
    }

    fn replace_tree(&self, contexts: &[ContextInfo]) {
        let mut tree = self.tree.lock().unwrap();
        let previous_current = tree.current.take();
        tree.nodes.clear();
        tree.roots.clear();
        for info in contexts {
            Self::insert_locked(&mut tree, info, None);
        }
        tree.current = previous_current
            .filter(|c| tree.nodes.contains_key(c))
            .or_else(|| tree.roots.first().cloned());
    }

    fn navigation_started(&self, context: &str, url: &str) {
        let mut tree = self.tree.lock().unwrap();
        if let Some(node) = tree.nodes.get_mut(context) {
            node.url = url.to_string();
        }
        drop(tree);
        self.bus.publish(SessionEvent::NavigationStarted {
            context: context.to_string(),
            url: url.to_string(),
        });
    }

    fn raise_fatal(&self) {
        if self.fatal_raised.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!("[ContextManager] all window handles were removed");
        self.bus.publish(SessionEvent::AllWindowsRemoved);
    }
}

#[async_trait]
impl SessionManager for ContextManager {
    fn name(&self) -> &str {
        "ContextManager"
    }

    async fn attach(&self, conn: Arc<Connection>) -> Result<()> {
        let state = self.state.clone();
        let id = conn.on(
            "browsingContext.contextCreated",
            Arc::new(move |event| {
                match serde_json::from_value::<ContextInfo>(event.params.clone()) {
                    Ok(info) => state.insert_context(&info),
                    Err(e) => tracing::warn!("[ContextManager] Bad contextCreated payload: {}", e),
                }
            }),
        );
        self.subs.track("browsingContext.contextCreated", id);

        let state = self.state.clone();
        let command_conn = conn.clone();
        let id = conn.on(
            "browsingContext.contextDestroyed",
            Arc::new(move |event| {
                let info = match serde_json::from_value::<ContextInfo>(event.params.clone()) {
                    Ok(info) => info,
                    Err(e) => {
                        tracing::warn!("[ContextManager] Bad contextDestroyed payload: {}", e);
                        return;
                    }
                };
                if let Some(fallback) = state.remove_context(&info.context) {
                    // The old current died mid-flight; activate the survivor
                    let conn = command_conn.clone();
                    tokio::spawn(async move {
                        if let Err(e) = activate_fallback(conn, &fallback).await {
                            tracing::warn!(
                                "[ContextManager] Failed to activate {}: {}",
                                fallback,
                                e
                            );
                        }
                    });
                }
            }),
        );
        self.subs.track("browsingContext.contextDestroyed", id);

        let state = self.state.clone();
        let id = conn.on(
            "browsingContext.navigationStarted",
            Arc::new(move |event| {
                let context = event.params.get("context").and_then(|c| c.as_str());
                let url = event.params.get("url").and_then(|u| u.as_str());
                if let (Some(context), Some(url)) = (context, url) {
                    state.navigation_started(context, url);
                }
            }),
        );
        self.subs.track("browsingContext.navigationStarted", id);

        tracing::info!("[ContextManager] Attached");
        Ok(())
    }

    async fn detach(&self, conn: Arc<Connection>) -> Result<()> {
        self.subs.clear(&conn);
        tracing::info!("[ContextManager] Detached");
        Ok(())
    }
}

/// Switch browser focus to the fallback context. Shared by the event-driven
/// destroy path and the close-command result path so both issue the same
/// activate with the same race handling.
pub(crate) async fn activate_fallback(conn: Arc<Connection>, fallback: &str) -> Result<()> {
    match BidiCommands::new(conn)
        .browsing_context_activate(fallback)
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if is_benign_destroyed_race(&e) => {
            tracing::debug!(
                "[ContextManager] Fallback context already gone: {}",
                fallback
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// The fallback context can itself be destroyed before the activate lands
fn is_benign_destroyed_race(error: &BidiError) -> bool {
    matches!(
        error,
        BidiError::Remote { error, .. }
            if error == "no such frame" || error == "no such window"
    )
}
