//! Session lifecycle
//!
//! `BidiSession` owns one Connection, the manager registry, and the event
//! bus. Start order matters: the socket is connected first, then
//! `session.new`, then the event subscriptions, then the managers attach and
//! the context tree is primed with a `getTree` snapshot. End runs the same
//! sequence in reverse.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::commands::{
    BidiCommands, CallFunctionParams, ContextType, CreateContextParams, NavigateParams,
    NewSessionParams, ReadinessState, ScriptResult, SubscriptionRequest, Target,
};
use crate::error::{BidiError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::managers::context::activate_fallback;
use crate::managers::{
    ContextManager, DialogManager, InterceptRule, ManagerRegistry, NetworkManager,
    PolyfillManager, PromptPolicy, ShadowRootManager,
};
use crate::stacktrace::{rewrite_exception, ScriptTemplate};
use crate::transport::{self, Connection, ConnectionConfig};

/// Events the session subscribes to at start; the managers feed on these
const SUBSCRIBED_EVENTS: &[&str] = &[
    "browsingContext.contextCreated",
    "browsingContext.contextDestroyed",
    "browsingContext.navigationStarted",
    "browsingContext.userPromptOpened",
    "browsingContext.userPromptClosed",
    "script.realmCreated",
    "network.beforeRequestSent",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier (local, for logging)
    #[serde(default = "generate_id")]
    pub id: String,
    /// Bidi websocket endpoint
    pub ws_url: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_prompt_policy")]
    pub prompt_policy: PromptPolicy,
    /// Per-receiver buffer of the session event bus
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_prompt_policy() -> PromptPolicy {
    PromptPolicy::Dismiss
}

fn default_event_buffer() -> usize {
    crate::events::DEFAULT_EVENT_CAPACITY
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: generate_id(),
            ws_url: "ws://127.0.0.1:9222/session".to_string(),
            command_timeout_ms: default_command_timeout_ms(),
            prompt_policy: default_prompt_policy(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SessionConfig {
    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
        }
    }
}

/// One Bidi session: socket, managers, and the state they derive
pub struct BidiSession {
    config: SessionConfig,
    bus: Arc<EventBus>,
    conn: Mutex<Option<Arc<Connection>>>,
    remote_session_id: Mutex<Option<String>>,
    registry: ManagerRegistry,
    pub contexts: Arc<ContextManager>,
    pub dialogs: Arc<DialogManager>,
    pub shadow_roots: Arc<ShadowRootManager>,
    pub network: Arc<NetworkManager>,
    pub polyfills: Arc<PolyfillManager>,
}

impl BidiSession {
    pub fn new(config: SessionConfig) -> Self {
        let bus = Arc::new(EventBus::with_capacity(config.event_buffer));
        let contexts = Arc::new(ContextManager::new(bus.clone()));
        let dialogs = Arc::new(DialogManager::new(config.prompt_policy, bus.clone()));
        let shadow_roots = Arc::new(ShadowRootManager::new());
        let network = Arc::new(NetworkManager::new());
        let polyfills = Arc::new(PolyfillManager::new());

        let mut registry = ManagerRegistry::new();
        registry.register(contexts.clone());
        registry.register(dialogs.clone());
        registry.register(shadow_roots.clone());
        registry.register(network.clone());
        registry.register(polyfills.clone());

        Self {
            config,
            bus,
            conn: Mutex::new(None),
            remote_session_id: Mutex::new(None),
            registry,
            contexts,
            dialogs,
            shadow_roots,
            network,
            polyfills,
        }
    }

    /// Connect the socket and run the start handshake
    pub async fn start(&self) -> Result<()> {
        let conn =
            transport::connect(&self.config.ws_url, self.config.connection_config()).await?;
        self.bootstrap(conn).await
    }

    async fn bootstrap(&self, conn: Arc<Connection>) -> Result<()> {
        let commands = BidiCommands::new(conn.clone());

        let result = commands
            .session_new(NewSessionParams {
                capabilities: json!({}),
            })
            .await?;
        tracing::info!(
            "[BidiSession] Session {} established (remote id {})",
            self.config.id,
            result.session_id
        );
        *self.remote_session_id.lock().unwrap() = Some(result.session_id);

        commands
            .session_subscribe(SubscriptionRequest {
                events: SUBSCRIBED_EVENTS.iter().map(|e| e.to_string()).collect(),
                contexts: None,
            })
            .await?;

        self.registry.attach_all(conn.clone()).await?;
        self.contexts.refresh(conn.clone()).await?;

        *self.conn.lock().unwrap() = Some(conn);
        self.bus.publish(SessionEvent::Started);
        Ok(())
    }

    /// Detach the managers, end the remote session, and close the socket
    pub async fn end(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().unwrap().take() else {
            return Err(BidiError::NotConnected);
        };

        self.registry.detach_all(conn.clone()).await?;
        // Best effort: the remote may already be gone
        if let Err(e) = BidiCommands::new(conn.clone()).session_end().await {
            tracing::warn!("[BidiSession] session.end failed: {}", e);
        }
        conn.close();
        *self.remote_session_id.lock().unwrap() = None;
        self.bus.publish(SessionEvent::Ended);
        tracing::info!("[BidiSession] Session {} ended", self.config.id);
        Ok(())
    }

    pub fn conn(&self) -> Result<Arc<Connection>> {
        self.conn
            .lock()
            .unwrap()
            .clone()
            .ok_or(BidiError::NotConnected)
    }

    pub fn session_id(&self) -> Option<String> {
        self.remote_session_id.lock().unwrap().clone()
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn current_context(&self) -> Option<String> {
        self.contexts.current_context()
    }

    /// Open a new top-level context. The tree picks it up via the
    /// `contextCreated` event; the id is returned for immediate use.
    pub async fn new_context(&self, context_type: ContextType) -> Result<String> {
        self.contexts.ensure_alive()?;
        let result = BidiCommands::new(self.conn()?)
            .browsing_context_create(CreateContextParams {
                context_type,
                reference_context: None,
            })
            .await?;
        Ok(result.context)
    }

    pub async fn navigate(&self, context: &str, url: &str) -> Result<()> {
        self.contexts.ensure_alive()?;
        BidiCommands::new(self.conn()?)
            .browsing_context_navigate(NavigateParams {
                context: context.to_string(),
                url: url.to_string(),
                wait: Some(ReadinessState::Complete),
            })
            .await?;
        Ok(())
    }

    /// Close a context. This is the result-driven detection path for the
    /// window-close race: the surviving roots are inspected here regardless
    /// of whether the `contextDestroyed` event has arrived yet. When the
    /// closed context was current, focus moves to the fallback immediately
    /// instead of waiting for the event stream.
    pub async fn close_context(&self, context: &str) -> Result<()> {
        self.contexts.ensure_alive()?;
        let conn = self.conn()?;
        BidiCommands::new(conn.clone())
            .browsing_context_close(context)
            .await?;
        if let Some(fallback) = self.contexts.remove_context(context) {
            // The close itself succeeded; a failed focus switch is logged,
            // not surfaced
            if let Err(e) = activate_fallback(conn, &fallback).await {
                tracing::warn!("[BidiSession] Failed to activate {}: {}", fallback, e);
            }
        }
        let remaining = self.contexts.root_ids();
        self.contexts.handle_close_result(&remaining)
    }

    /// Run user script in a context. Arguments go through the value codec
    /// (cycles collapse to the sentinel); the result comes back decoded, with
    /// node references as handle records. A thrown exception surfaces as
    /// `ScriptException` with its stack rewritten against the original source.
    pub async fn execute_script(
        &self,
        context: &str,
        source: &str,
        args: Vec<values::ValueRef>,
    ) -> Result<values::RemoteValue> {
        self.contexts.ensure_alive()?;
        let arguments = args
            .iter()
            .map(values::serialize)
            .collect::<values::Result<Vec<_>>>()?;
        let template = ScriptTemplate::wrap(source);
        let result = BidiCommands::new(self.conn()?)
            .script_call_function(CallFunctionParams {
                function_declaration: template.source().to_string(),
                target: Target::Context {
                    context: context.to_string(),
                    sandbox: None,
                },
                await_promise: true,
                arguments,
            })
            .await?;

        match result {
            ScriptResult::Success { result, .. } => Ok(values::deserialize(&result)?),
            ScriptResult::Exception {
                exception_details, ..
            } => Err(BidiError::ScriptException(rewrite_exception(
                &exception_details,
                &template,
                source,
            ))),
        }
    }

    /// Answer the open prompt in `context` explicitly
    pub async fn handle_prompt(
        &self,
        context: &str,
        accept: bool,
        user_text: Option<String>,
    ) -> Result<()> {
        self.dialogs
            .handle_prompt(self.conn()?, context, accept, user_text)
            .await
    }

    pub async fn add_polyfill(&self, source: &str) -> Result<String> {
        self.polyfills.register(self.conn()?, source).await
    }

    pub async fn add_intercept(&self, rule: InterceptRule) -> Result<String> {
        self.network.add_intercept(self.conn()?, rule).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::SessionManager;
    use crate::transport::Outbound;
    use tokio::sync::mpsc;

    fn session() -> Arc<BidiSession> {
        Arc::new(BidiSession::new(SessionConfig {
            command_timeout_ms: 5_000,
            ..SessionConfig::default()
        }))
    }

    fn channel_conn(session: &BidiSession) -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(tx, session.config.connection_config());
        (conn, rx)
    }

    async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> serde_json::Value {
        match rx.recv().await.expect("writer channel closed") {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Close => panic!("unexpected close"),
        }
    }

    fn answer(conn: &Connection, env: &serde_json::Value, result: serde_json::Value) {
        conn.handle_frame(
            &json!({ "type": "success", "id": env["id"], "result": result }).to_string(),
        );
    }

    #[tokio::test]
    async fn test_start_handshake_order() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        let mut events = session.events();

        let pending = tokio::spawn({
            let session = session.clone();
            let conn = conn.clone();
            async move { session.bootstrap(conn).await }
        });

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "session.new");
        answer(&conn, &env, json!({ "sessionId": "remote-1" }));

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "session.subscribe");
        let events_list = env["params"]["events"].as_array().unwrap();
        assert!(events_list.contains(&json!("browsingContext.contextCreated")));
        answer(&conn, &env, json!({}));

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "browsingContext.getTree");
        answer(
            &conn,
            &env,
            json!({ "contexts": [{ "context": "top", "url": "about:blank" }] }),
        );

        pending.await.unwrap().unwrap();
        assert_eq!(session.session_id().as_deref(), Some("remote-1"));
        assert_eq!(session.current_context().as_deref(), Some("top"));
        assert!(matches!(events.recv().await, Ok(SessionEvent::Started)));
    }

    #[tokio::test]
    async fn test_end_closes_socket_and_clears_state() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        *session.conn.lock().unwrap() = Some(conn.clone());
        *session.remote_session_id.lock().unwrap() = Some("remote-1".into());
        let mut events = session.events();

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.end().await }
        });

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "session.end");
        answer(&conn, &env, json!({}));

        pending.await.unwrap().unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close)
        ));
        assert!(conn.is_closed());
        assert!(session.session_id().is_none());
        assert!(matches!(events.recv().await, Ok(SessionEvent::Ended)));
        assert!(matches!(session.conn(), Err(BidiError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_last_context_is_fatal() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        *session.conn.lock().unwrap() = Some(conn.clone());
        session.contexts.insert_context(
            &serde_json::from_value(json!({ "context": "only", "url": "about:blank" })).unwrap(),
        );

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.close_context("only").await }
        });

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "browsingContext.close");
        answer(&conn, &env, json!({}));

        assert!(matches!(
            pending.await.unwrap(),
            Err(BidiError::NoWindowsRemaining)
        ));
        // Every later operation fails the liveness check
        assert!(matches!(
            session.navigate("x", "https://example.com").await,
            Err(BidiError::NoWindowsRemaining)
        ));
    }

    #[tokio::test]
    async fn test_close_current_context_activates_survivor() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        *session.conn.lock().unwrap() = Some(conn.clone());
        session.contexts.attach(conn.clone()).await.unwrap();
        session.contexts.insert_context(
            &serde_json::from_value(json!({ "context": "A", "url": "about:blank" })).unwrap(),
        );
        session.contexts.insert_context(
            &serde_json::from_value(json!({ "context": "B", "url": "about:blank" })).unwrap(),
        );
        session.contexts.set_current("A").unwrap();

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.close_context("A").await }
        });

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "browsingContext.close");
        answer(&conn, &env, json!({}));

        // Focus must move to the surviving root right away, not wait for the
        // contextDestroyed event
        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "browsingContext.activate");
        assert_eq!(env["params"]["context"], "B");
        answer(&conn, &env, json!({}));

        pending.await.unwrap().unwrap();
        assert_eq!(session.current_context().as_deref(), Some("B"));

        // The event arriving afterwards finds the id already removed and
        // issues nothing further
        conn.handle_frame(
            &json!({
                "type": "event",
                "method": "browsingContext.contextDestroyed",
                "params": { "context": "A", "url": "about:blank" },
            })
            .to_string(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(session.current_context().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_execute_script_success() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        *session.conn.lock().unwrap() = Some(conn.clone());
        session.contexts.insert_context(
            &serde_json::from_value(json!({ "context": "c1", "url": "about:blank" })).unwrap(),
        );

        let pending = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .execute_script("c1", "return 41 + 1;", Vec::new())
                    .await
            }
        });

        let env = next_envelope(&mut rx).await;
        assert_eq!(env["method"], "script.callFunction");
        let declaration = env["params"]["functionDeclaration"].as_str().unwrap();
        assert!(declaration.contains("return 41 + 1;"));
        answer(
            &conn,
            &env,
            json!({ "type": "success", "result": { "type": "number", "value": 42 }, "realm": "r1" }),
        );

        let value = pending.await.unwrap().unwrap();
        assert_eq!(value, values::RemoteValue::Number(42.0));
    }

    #[tokio::test]
    async fn test_execute_script_encodes_args_and_decodes_node_result() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        *session.conn.lock().unwrap() = Some(conn.clone());
        session.contexts.insert_context(
            &serde_json::from_value(json!({ "context": "c1", "url": "about:blank" })).unwrap(),
        );

        let pending = tokio::spawn({
            let session = session.clone();
            async move {
                let args = vec![values::local(values::LocalValue::String("query".into()))];
                session
                    .execute_script("c1", "return find(arguments[0]);", args)
                    .await
            }
        });

        let env = next_envelope(&mut rx).await;
        assert_eq!(
            env["params"]["arguments"],
            json!([{ "type": "string", "value": "query" }])
        );
        answer(
            &conn,
            &env,
            json!({ "type": "success", "result": { "type": "node", "sharedId": "n-7" }, "realm": "r1" }),
        );

        // Node references decode to handle records, never live objects
        assert_eq!(
            pending.await.unwrap().unwrap(),
            values::RemoteValue::Node {
                shared_id: "n-7".into()
            }
        );
    }

    #[tokio::test]
    async fn test_execute_script_exception_is_rewritten() {
        let session = session();
        let (conn, mut rx) = channel_conn(&session);
        *session.conn.lock().unwrap() = Some(conn.clone());
        session.contexts.insert_context(
            &serde_json::from_value(json!({ "context": "c1", "url": "about:blank" })).unwrap(),
        );

        let pending = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .execute_script("c1", "const a = 1;\nboom();", Vec::new())
                    .await
            }
        });

        let env = next_envelope(&mut rx).await;
        // User line 2 sits at wrapper line 3 (0-based)
        answer(
            &conn,
            &env,
            json!({
                "type": "exception",
                "realm": "r1",
                "exceptionDetails": {
                    "text": "ReferenceError: boom is not defined",
                    "lineNumber": 3,
                    "columnNumber": 0,
                    "exception": { "type": "error" },
                    "stackTrace": { "callFrames": [
                        { "lineNumber": 3, "columnNumber": 0, "functionName": "anonymous", "url": "" }
                    ] },
                },
            }),
        );

        match pending.await.unwrap() {
            Err(BidiError::ScriptException(message)) => {
                assert!(message.starts_with("ReferenceError: boom is not defined"));
                assert!(message.contains("> 2 | boom();"));
            }
            other => panic!("Expected ScriptException, got {other:?}"),
        }
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: SessionConfig =
            serde_json::from_value(json!({ "ws_url": "ws://localhost:9515/session" })).unwrap();
        assert_eq!(config.ws_url, "ws://localhost:9515/session");
        assert_eq!(config.command_timeout_ms, 30_000);
        assert_eq!(config.prompt_policy, PromptPolicy::Dismiss);
        assert_eq!(config.event_buffer, crate::events::DEFAULT_EVENT_CAPACITY);
        assert!(!config.id.is_empty());
    }
}
