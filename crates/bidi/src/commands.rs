//! Generated command layer
//!
//! Mechanical mapping: one async method per Bidi command. Build the params
//! struct, send through the Connection, decode the result against its typed
//! shape. Method strings and field names follow the WebDriver-Bidi
//! specification bit-for-bit; there is no business logic here.
//!
//! Decoded frames are validated against the expected result schema at the
//! deserialization boundary - a shape mismatch surfaces as `InvalidResponse`
//! instead of silently producing garbage.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{BidiError, Result};
use crate::transport::Connection;

/// Typed async method per Bidi command, all going through one Connection
#[derive(Clone)]
pub struct BidiCommands {
    conn: Arc<Connection>,
}

impl BidiCommands {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.conn.send(method, Some(params)).await?;
        serde_json::from_value(result).map_err(|e| BidiError::InvalidResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    // session.*

    pub async fn session_new(&self, params: NewSessionParams) -> Result<NewSessionResult> {
        self.call("session.new", params).await
    }

    pub async fn session_end(&self) -> Result<EmptyResult> {
        self.call("session.end", EmptyParams {}).await
    }

    pub async fn session_subscribe(&self, params: SubscriptionRequest) -> Result<EmptyResult> {
        self.call("session.subscribe", params).await
    }

    pub async fn session_unsubscribe(&self, params: SubscriptionRequest) -> Result<EmptyResult> {
        self.call("session.unsubscribe", params).await
    }

    // browsingContext.*

    pub async fn browsing_context_get_tree(&self, params: GetTreeParams) -> Result<GetTreeResult> {
        self.call("browsingContext.getTree", params).await
    }

    pub async fn browsing_context_create(
        &self,
        params: CreateContextParams,
    ) -> Result<CreateContextResult> {
        self.call("browsingContext.create", params).await
    }

    pub async fn browsing_context_navigate(&self, params: NavigateParams) -> Result<NavigateResult> {
        self.call("browsingContext.navigate", params).await
    }

    pub async fn browsing_context_activate(&self, context: &str) -> Result<EmptyResult> {
        self.call(
            "browsingContext.activate",
            ContextParams {
                context: context.to_string(),
            },
        )
        .await
    }

    pub async fn browsing_context_close(&self, context: &str) -> Result<EmptyResult> {
        self.call(
            "browsingContext.close",
            ContextParams {
                context: context.to_string(),
            },
        )
        .await
    }

    pub async fn browsing_context_handle_user_prompt(
        &self,
        params: HandleUserPromptParams,
    ) -> Result<EmptyResult> {
        self.call("browsingContext.handleUserPrompt", params).await
    }

    // script.*

    pub async fn script_evaluate(&self, params: EvaluateParams) -> Result<ScriptResult> {
        self.call("script.evaluate", params).await
    }

    pub async fn script_call_function(&self, params: CallFunctionParams) -> Result<ScriptResult> {
        self.call("script.callFunction", params).await
    }

    pub async fn script_add_preload_script(
        &self,
        params: AddPreloadScriptParams,
    ) -> Result<AddPreloadScriptResult> {
        self.call("script.addPreloadScript", params).await
    }

    pub async fn script_remove_preload_script(&self, script: &str) -> Result<EmptyResult> {
        self.call(
            "script.removePreloadScript",
            RemovePreloadScriptParams {
                script: script.to_string(),
            },
        )
        .await
    }

    // network.*

    pub async fn network_add_intercept(
        &self,
        params: AddInterceptParams,
    ) -> Result<AddInterceptResult> {
        self.call("network.addIntercept", params).await
    }

    pub async fn network_remove_intercept(&self, intercept: &str) -> Result<EmptyResult> {
        self.call(
            "network.removeIntercept",
            RemoveInterceptParams {
                intercept: intercept.to_string(),
            },
        )
        .await
    }

    pub async fn network_continue_request(&self, request: &str) -> Result<EmptyResult> {
        self.call(
            "network.continueRequest",
            RequestParams {
                request: request.to_string(),
            },
        )
        .await
    }

    pub async fn network_fail_request(&self, request: &str) -> Result<EmptyResult> {
        self.call(
            "network.failRequest",
            RequestParams {
                request: request.to_string(),
            },
        )
        .await
    }

    pub async fn network_provide_response(
        &self,
        params: ProvideResponseParams,
    ) -> Result<EmptyResult> {
        self.call("network.provideResponse", params).await
    }
}

// Shared param/result shapes

#[derive(Debug, Clone, Serialize)]
pub struct EmptyParams {}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmptyResult {}

#[derive(Debug, Clone, Serialize)]
struct ContextParams {
    context: String,
}

#[derive(Debug, Clone, Serialize)]
struct RemovePreloadScriptParams {
    script: String,
}

#[derive(Debug, Clone, Serialize)]
struct RemoveInterceptParams {
    intercept: String,
}

#[derive(Debug, Clone, Serialize)]
struct RequestParams {
    request: String,
}

// session.*

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    pub capabilities: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    pub session_id: String,
    #[serde(default)]
    pub capabilities: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
}

// browsingContext.*

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTreeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTreeResult {
    pub contexts: Vec<ContextInfo>,
}

/// Browsing context description; also the payload of
/// `browsingContext.contextCreated` / `contextDestroyed` events
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub context: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub children: Option<Vec<ContextInfo>>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub user_context: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Tab,
    Window,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContextParams {
    #[serde(rename = "type")]
    pub context_type: ContextType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContextResult {
    pub context: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadinessState {
    None,
    Interactive,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    pub context: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<ReadinessState>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    #[serde(default)]
    pub navigation: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleUserPromptParams {
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_text: Option<String>,
}

/// Payload of `browsingContext.userPromptOpened`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPromptOpenedParams {
    pub context: String,
    #[serde(rename = "type", default)]
    pub prompt_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub default_value: Option<String>,
}

// script.*

/// Where a script runs: a browsing context (with optional sandbox) or a realm
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Target {
    Context {
        context: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sandbox: Option<String>,
    },
    Realm {
        realm: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    pub expression: String,
    pub target: Target,
    pub await_promise: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFunctionParams {
    pub function_declaration: String,
    pub target: Target,
    pub await_promise: bool,
    /// Serialized values produced by the `values` crate
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScriptResult {
    #[serde(rename_all = "camelCase")]
    Success {
        result: Value,
        #[serde(default)]
        realm: String,
    },
    #[serde(rename_all = "camelCase")]
    Exception {
        exception_details: ExceptionDetails,
        #[serde(default)]
        realm: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub column_number: u64,
    #[serde(default)]
    pub line_number: u64,
    #[serde(default)]
    pub exception: Value,
    #[serde(default)]
    pub stack_trace: StackTrace,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub column_number: u64,
    #[serde(default)]
    pub line_number: u64,
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPreloadScriptParams {
    pub function_declaration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddPreloadScriptResult {
    pub script: String,
}

/// Payload of `script.realmCreated`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealmInfo {
    pub realm: String,
    #[serde(rename = "type", default)]
    pub realm_type: String,
    #[serde(default)]
    pub context: Option<String>,
}

// network.*

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterceptPhase {
    BeforeRequestSent,
    ResponseStarted,
    AuthRequired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UrlPattern {
    String { pattern: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInterceptParams {
    pub phases: Vec<InterceptPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_patterns: Option<Vec<UrlPattern>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddInterceptResult {
    pub intercept: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvideResponseParams {
    pub request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Payload of `network.beforeRequestSent`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeRequestSentParams {
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub intercepts: Option<Vec<String>>,
    pub request: RequestData,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Request id assigned by the browser
    pub request: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
}
