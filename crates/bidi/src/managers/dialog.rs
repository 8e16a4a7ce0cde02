//! Dialog Manager - user prompt tracking and auto-handling
//!
//! At most one prompt is open per top-level context: None -> Open on
//! `userPromptOpened`, back to None once handled or closed. When the policy
//! says so, an open prompt is answered immediately with
//! `browsingContext.handleUserPrompt`.
//!
//! The dismiss can race a user- or navigation-initiated close; the remote
//! then answers "no such alert". That race is benign and swallowed. Every
//! other error from the same call path is surfaced unchanged.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::commands::{BidiCommands, HandleUserPromptParams, UserPromptOpenedParams};
use crate::error::Result;
use crate::events::{EventBus, SessionEvent};
use crate::managers::{SessionManager, SubscriptionSet};
use crate::transport::Connection;

/// What to do when the browser opens a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptPolicy {
    /// Answer every prompt with accept
    Accept,
    /// Answer every prompt with dismiss
    Dismiss,
    /// Leave prompts open; callers handle them explicitly
    Ignore,
}

#[derive(Debug, Clone)]
pub struct OpenPrompt {
    pub prompt_type: String,
    pub message: String,
}

struct DialogState {
    /// Open prompt per context id
    open: DashMap<String, OpenPrompt>,
    bus: Arc<EventBus>,
}

pub struct DialogManager {
    policy: PromptPolicy,
    state: Arc<DialogState>,
    subs: SubscriptionSet,
}

impl DialogManager {
    pub fn new(policy: PromptPolicy, bus: Arc<EventBus>) -> Self {
        Self {
            policy,
            state: Arc::new(DialogState {
                open: DashMap::new(),
                bus,
            }),
            subs: SubscriptionSet::new(),
        }
    }

    pub fn policy(&self) -> PromptPolicy {
        self.policy
    }

    /// The prompt currently open in `context`, if any
    pub fn open_prompt(&self, context: &str) -> Option<OpenPrompt> {
        self.state.open.get(context).map(|entry| entry.clone())
    }

    /// Answer the prompt in `context`. The "no such alert" race (prompt gone
    /// before the command landed) is treated as already-resolved; any other
    /// remote error propagates unchanged.
    pub async fn handle_prompt(
        &self,
        conn: Arc<Connection>,
        context: &str,
        accept: bool,
        user_text: Option<String>,
    ) -> Result<()> {
        Self::handle_prompt_inner(&self.state, conn, context, accept, user_text).await
    }

    async fn handle_prompt_inner(
        state: &Arc<DialogState>,
        conn: Arc<Connection>,
        context: &str,
        accept: bool,
        user_text: Option<String>,
    ) -> Result<()> {
        let result = BidiCommands::new(conn)
            .browsing_context_handle_user_prompt(HandleUserPromptParams {
                context: context.to_string(),
                accept: Some(accept),
                user_text,
            })
            .await;

        match result {
            Ok(_) => {
                state.open.remove(context);
                state.bus.publish(SessionEvent::PromptHandled {
                    context: context.to_string(),
                    accepted: accept,
                });
                Ok(())
            }
            Err(e) if e.is_no_such_alert() => {
                tracing::debug!("[DialogManager] Prompt already gone in {}", context);
                state.open.remove(context);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionManager for DialogManager {
    fn name(&self) -> &str {
        "DialogManager"
    }

    async fn attach(&self, conn: Arc<Connection>) -> Result<()> {
        let state = self.state.clone();
        let policy = self.policy;
        let command_conn = conn.clone();
        let id = conn.on(
            "browsingContext.userPromptOpened",
            Arc::new(move |event| {
                let params =
                    match serde_json::from_value::<UserPromptOpenedParams>(event.params.clone()) {
                        Ok(params) => params,
                        Err(e) => {
                            tracing::warn!("[DialogManager] Bad userPromptOpened payload: {}", e);
                            return;
                        }
                    };

                state.open.insert(
                    params.context.clone(),
                    OpenPrompt {
                        prompt_type: params.prompt_type.clone(),
                        message: params.message.clone(),
                    },
                );
                state.bus.publish(SessionEvent::PromptOpened {
                    context: params.context.clone(),
                    message: params.message.clone(),
                });

                let accept = match policy {
                    PromptPolicy::Accept => true,
                    PromptPolicy::Dismiss => false,
                    PromptPolicy::Ignore => return,
                };
                tracing::debug!(
                    "[DialogManager] Auto-handling {} prompt in {} (accept: {})",
                    params.prompt_type,
                    params.context,
                    accept
                );
                let state = state.clone();
                let conn = command_conn.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        DialogManager::handle_prompt_inner(&state, conn, &params.context, accept, None)
                            .await
                    {
                        tracing::error!(
                            "[DialogManager] Failed to handle prompt in {}: {}",
                            params.context,
                            e
                        );
                    }
                });
            }),
        );
        self.subs.track("browsingContext.userPromptOpened", id);

        let state = self.state.clone();
        let id = conn.on(
            "browsingContext.userPromptClosed",
            Arc::new(move |event| {
                if let Some(context) = event.params.get("context").and_then(|c| c.as_str()) {
                    state.open.remove(context);
                }
            }),
        );
        self.subs.track("browsingContext.userPromptClosed", id);

        tracing::info!("[DialogManager] Attached (policy: {:?})", self.policy);
        Ok(())
    }

    async fn detach(&self, conn: Arc<Connection>) -> Result<()> {
        self.subs.clear(&conn);
        self.state.open.clear();
        tracing::info!("[DialogManager] Detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BidiError;
    use crate::transport::{ConnectionConfig, Outbound};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn setup() -> (
        DialogManager,
        Arc<Connection>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            tx,
            ConnectionConfig {
                command_timeout: Duration::from_secs(5),
            },
        );
        let bus = Arc::new(EventBus::new());
        (DialogManager::new(PromptPolicy::Dismiss, bus), conn, rx)
    }

    fn open_event(context: &str) -> String {
        json!({
            "type": "event",
            "method": "browsingContext.userPromptOpened",
            "params": { "context": context, "type": "alert", "message": "hi" },
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_prompt_state_transitions() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx, ConnectionConfig::default());
        let ignoring = DialogManager::new(PromptPolicy::Ignore, Arc::new(EventBus::new()));
        ignoring.attach(conn.clone()).await.unwrap();

        assert!(ignoring.open_prompt("c1").is_none());
        conn.handle_frame(&open_event("c1"));
        let prompt = ignoring.open_prompt("c1").expect("prompt open");
        assert_eq!(prompt.message, "hi");

        conn.handle_frame(
            &json!({
                "type": "event",
                "method": "browsingContext.userPromptClosed",
                "params": { "context": "c1", "accepted": false },
            })
            .to_string(),
        );
        assert!(ignoring.open_prompt("c1").is_none());
    }

    #[tokio::test]
    async fn test_auto_dismiss_sends_handle_command() {
        let (manager, conn, mut rx) = setup();
        manager.attach(conn.clone()).await.unwrap();

        conn.handle_frame(&open_event("c1"));

        // The spawned auto-handler must emit browsingContext.handleUserPrompt
        let envelope = match rx.recv().await.unwrap() {
            Outbound::Text(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        };
        assert_eq!(envelope["method"], "browsingContext.handleUserPrompt");
        assert_eq!(envelope["params"], json!({ "context": "c1", "accept": false }));

        // Remote confirms; prompt state clears
        conn.handle_frame(
            &json!({ "type": "success", "id": envelope["id"], "result": {} }).to_string(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.open_prompt("c1").is_none());
    }

    #[tokio::test]
    async fn test_no_such_alert_race_is_swallowed() {
        let (manager, conn, mut rx) = setup();

        let pending = tokio::spawn({
            let manager_state = manager.state.clone();
            let conn = conn.clone();
            async move {
                DialogManager::handle_prompt_inner(&manager_state, conn, "c1", false, None).await
            }
        });

        let envelope = match rx.recv().await.unwrap() {
            Outbound::Text(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        };
        conn.handle_frame(
            &json!({
                "type": "error",
                "id": envelope["id"],
                "error": "no such alert",
                "message": "User prompt was already closed",
            })
            .to_string(),
        );

        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_other_errors_propagate_unchanged() {
        let (manager, conn, mut rx) = setup();

        let pending = tokio::spawn({
            let state = manager.state.clone();
            let conn = conn.clone();
            async move { DialogManager::handle_prompt_inner(&state, conn, "c1", true, None).await }
        });

        let envelope = match rx.recv().await.unwrap() {
            Outbound::Text(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        };
        conn.handle_frame(
            &json!({
                "type": "error",
                "id": envelope["id"],
                "error": "unknown error",
                "message": "renderer gone",
            })
            .to_string(),
        );

        match pending.await.unwrap() {
            Err(BidiError::Remote { error, message }) => {
                assert_eq!(error, "unknown error");
                assert_eq!(message, "renderer gone");
            }
            other => panic!("Expected remote error, got {other:?}"),
        }
    }
}
