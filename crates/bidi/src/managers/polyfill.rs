//! Polyfill Manager - keeping injected scripts alive across realms
//!
//! Preload scripts only run in realms created after registration, and some
//! browsers drop them for realms spawned from workers. The manager keeps the
//! source of every registered script and re-applies it whenever a new window
//! realm appears, so injected helpers survive navigations and new tabs.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::commands::{AddPreloadScriptParams, BidiCommands, CallFunctionParams, RealmInfo, Target};
use crate::error::Result;
use crate::managers::{SessionManager, SubscriptionSet};
use crate::transport::Connection;

#[derive(Debug, Clone)]
struct PolyfillScript {
    /// Function declaration as sent to `script.addPreloadScript`
    source: String,
    /// Preload script id handed back by the remote
    preload_id: String,
}

pub struct PolyfillManager {
    scripts: Arc<Mutex<Vec<PolyfillScript>>>,
    subs: SubscriptionSet,
}

impl PolyfillManager {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(Vec::new())),
            subs: SubscriptionSet::new(),
        }
    }

    /// Register a polyfill: installed as a preload script for future realms
    /// and recorded so realm events can re-apply it
    pub async fn register(&self, conn: Arc<Connection>, source: &str) -> Result<String> {
        let result = BidiCommands::new(conn)
            .script_add_preload_script(AddPreloadScriptParams {
                function_declaration: source.to_string(),
                contexts: None,
            })
            .await?;

        self.scripts.lock().unwrap().push(PolyfillScript {
            source: source.to_string(),
            preload_id: result.script.clone(),
        });
        tracing::debug!("[PolyfillManager] Registered preload script {}", result.script);
        Ok(result.script)
    }

    /// Remove a registered polyfill remotely and locally
    pub async fn unregister(&self, conn: Arc<Connection>, preload_id: &str) -> Result<()> {
        BidiCommands::new(conn)
            .script_remove_preload_script(preload_id)
            .await?;
        self.scripts
            .lock()
            .unwrap()
            .retain(|script| script.preload_id != preload_id);
        Ok(())
    }

    pub fn registered_count(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

impl Default for PolyfillManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionManager for PolyfillManager {
    fn name(&self) -> &str {
        "PolyfillManager"
    }

    async fn attach(&self, conn: Arc<Connection>) -> Result<()> {
        let scripts = self.scripts.clone();
        let command_conn = conn.clone();
        let id = conn.on(
            "script.realmCreated",
            Arc::new(move |event| {
                let realm = match serde_json::from_value::<RealmInfo>(event.params.clone()) {
                    Ok(realm) => realm,
                    Err(e) => {
                        tracing::warn!("[PolyfillManager] Bad realmCreated payload: {}", e);
                        return;
                    }
                };
                if realm.realm_type != "window" {
                    return;
                }

                let pending: Vec<PolyfillScript> = scripts.lock().unwrap().clone();
                if pending.is_empty() {
                    return;
                }

                tracing::debug!(
                    "[PolyfillManager] Re-applying {} scripts in realm {}",
                    pending.len(),
                    realm.realm
                );
                let conn = command_conn.clone();
                tokio::spawn(async move {
                    let commands = BidiCommands::new(conn);
                    for script in pending {
                        let result = commands
                            .script_call_function(CallFunctionParams {
                                function_declaration: script.source.clone(),
                                target: Target::Realm {
                                    realm: realm.realm.clone(),
                                },
                                await_promise: false,
                                arguments: Vec::new(),
                            })
                            .await;
                        if let Err(e) = result {
                            tracing::warn!(
                                "[PolyfillManager] Re-apply of {} failed in {}: {}",
                                script.preload_id,
                                realm.realm,
                                e
                            );
                        }
                    }
                });
            }),
        );
        self.subs.track("script.realmCreated", id);

        tracing::info!("[PolyfillManager] Attached");
        Ok(())
    }

    async fn detach(&self, conn: Arc<Connection>) -> Result<()> {
        self.subs.clear(&conn);
        // Best effort: drop the preload scripts remotely too
        let scripts: Vec<PolyfillScript> = self.scripts.lock().unwrap().drain(..).collect();
        let commands = BidiCommands::new(conn);
        for script in scripts {
            if let Err(e) = commands
                .script_remove_preload_script(&script.preload_id)
                .await
            {
                tracing::warn!(
                    "[PolyfillManager] Failed to remove preload script {}: {}",
                    script.preload_id,
                    e
                );
            }
        }
        tracing::info!("[PolyfillManager] Detached");
        Ok(())
    }
}
