//! Network Manager - interception rules over the event stream
//!
//! Rules are installed remotely with `network.addIntercept` and mirrored in a
//! local table keyed by intercept id. When a blocked `beforeRequestSent`
//! event arrives, the matching rule's action decides whether the request is
//! continued, failed, or answered locally. URL patterns support the usual
//! `*.example.com` / prefix-suffix wildcard shapes.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::commands::{
    AddInterceptParams, BeforeRequestSentParams, BidiCommands, InterceptPhase,
    ProvideResponseParams, UrlPattern,
};
use crate::error::Result;
use crate::managers::{SessionManager, SubscriptionSet};
use crate::transport::Connection;

/// What to do with a request a rule has caught
#[derive(Debug, Clone)]
pub enum InterceptAction {
    /// Let the request through untouched
    Continue,
    /// Abort the request with a network error
    Fail,
    /// Answer locally without hitting the network
    Fulfill {
        status_code: u16,
        body: Option<Value>,
    },
}

#[derive(Debug, Clone)]
pub struct InterceptRule {
    pub phases: Vec<InterceptPhase>,
    pub url_patterns: Vec<String>,
    pub action: InterceptAction,
}

pub struct NetworkManager {
    /// intercept id -> rule, mirrors what the remote has installed
    rules: Arc<DashMap<String, InterceptRule>>,
    subs: SubscriptionSet,
}

impl NetworkManager {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            subs: SubscriptionSet::new(),
        }
    }

    /// Install an interception rule remotely and mirror it locally
    pub async fn add_intercept(&self, conn: Arc<Connection>, rule: InterceptRule) -> Result<String> {
        let result = BidiCommands::new(conn)
            .network_add_intercept(AddInterceptParams {
                phases: rule.phases.clone(),
                url_patterns: if rule.url_patterns.is_empty() {
                    None
                } else {
                    Some(
                        rule.url_patterns
                            .iter()
                            .map(|pattern| UrlPattern::String {
                                pattern: pattern.clone(),
                            })
                            .collect(),
                    )
                },
            })
            .await?;

        tracing::debug!("[NetworkManager] Intercept {} installed", result.intercept);
        self.rules.insert(result.intercept.clone(), rule);
        Ok(result.intercept)
    }

    /// Remove a rule remotely and locally
    pub async fn remove_intercept(&self, conn: Arc<Connection>, intercept: &str) -> Result<()> {
        BidiCommands::new(conn)
            .network_remove_intercept(intercept)
            .await?;
        self.rules.remove(intercept);
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Rule responsible for a blocked request: prefer the intercept ids the
    /// event names, fall back to URL pattern matching
    fn matching_rule(
        rules: &DashMap<String, InterceptRule>,
        params: &BeforeRequestSentParams,
    ) -> Option<InterceptRule> {
        if let Some(ids) = &params.intercepts {
            for id in ids {
                if let Some(rule) = rules.get(id) {
                    return Some(rule.clone());
                }
            }
        }
        rules
            .iter()
            .find(|entry| {
                entry
                    .value()
                    .url_patterns
                    .iter()
                    .any(|pattern| url_matches(&params.request.url, pattern))
            })
            .map(|entry| entry.value().clone())
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionManager for NetworkManager {
    fn name(&self) -> &str {
        "NetworkManager"
    }

    async fn attach(&self, conn: Arc<Connection>) -> Result<()> {
        let rules = self.rules.clone();
        let command_conn = conn.clone();
        let id = conn.on(
            "network.beforeRequestSent",
            Arc::new(move |event| {
                let params = match serde_json::from_value::<BeforeRequestSentParams>(
                    event.params.clone(),
                ) {
                    Ok(params) => params,
                    Err(e) => {
                        tracing::warn!("[NetworkManager] Bad beforeRequestSent payload: {}", e);
                        return;
                    }
                };
                if !params.is_blocked {
                    return;
                }

                let action = NetworkManager::matching_rule(&rules, &params)
                    .map(|rule| rule.action)
                    // A blocked request with no local rule must not hang the page
                    .unwrap_or(InterceptAction::Continue);

                let request_id = params.request.request.clone();
                let url = params.request.url.clone();
                let conn = command_conn.clone();
                tokio::spawn(async move {
                    let commands = BidiCommands::new(conn);
                    let outcome = match action {
                        InterceptAction::Continue => {
                            commands.network_continue_request(&request_id).await
                        }
                        InterceptAction::Fail => commands.network_fail_request(&request_id).await,
                        InterceptAction::Fulfill { status_code, body } => {
                            commands
                                .network_provide_response(ProvideResponseParams {
                                    request: request_id.clone(),
                                    status_code: Some(status_code),
                                    body,
                                })
                                .await
                        }
                    };
                    if let Err(e) = outcome {
                        tracing::error!(
                            "[NetworkManager] Failed to resolve blocked request {} ({}): {}",
                            request_id,
                            url,
                            e
                        );
                    }
                });
            }),
        );
        self.subs.track("network.beforeRequestSent", id);

        tracing::info!("[NetworkManager] Attached");
        Ok(())
    }

    async fn detach(&self, conn: Arc<Connection>) -> Result<()> {
        self.subs.clear(&conn);
        // Best effort: uninstall the remote intercepts as well
        let ids: Vec<String> = self.rules.iter().map(|entry| entry.key().clone()).collect();
        let commands = BidiCommands::new(conn);
        for id in ids {
            if let Err(e) = commands.network_remove_intercept(&id).await {
                tracing::warn!("[NetworkManager] Failed to remove intercept {}: {}", id, e);
            }
        }
        self.rules.clear();
        tracing::info!("[NetworkManager] Detached");
        Ok(())
    }
}

/// Match a request URL against a rule pattern. Patterns are either a full
/// URL prefix ending in `*`, a `*.domain` host wildcard, or an exact URL.
fn url_matches(request_url: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return request_url == pattern;
    }

    // Host wildcard: *.example.com matches any subdomain (and the apex)
    if let Some(domain) = pattern.strip_prefix("*.") {
        if let Ok(parsed) = url::Url::parse(request_url) {
            if let Some(host) = parsed.host_str() {
                return host == domain || host.ends_with(&format!(".{domain}"));
            }
        }
        return false;
    }

    // Prefix/suffix wildcard: https://example.com/api/*
    let parts: Vec<&str> = pattern.splitn(2, '*').collect();
    if parts.len() == 2 {
        return request_url.starts_with(parts[0]) && request_url.ends_with(parts[1]);
    }
    false
}
