//! WebDriver-Bidi session core
//!
//! Bidirectional message-correlated RPC over one websocket, plus the session
//! state that has to be derived from the event stream: the browsing-context
//! tree, open user prompts, shadow root handles, network intercepts, and
//! re-applied polyfill scripts.
//!
//! # Architecture
//!
//! 1. **Strict id correlation**: responses match commands by id, never by
//!    send order; events fan out to subscribers
//! 2. **Event-derived state**: managers rebuild their model from frames as
//!    they arrive; nothing blocks command resolution
//! 3. **Fail fast**: no retries, no queuing after close. Let the caller decide.

pub mod commands;
pub mod error;
pub mod events;
pub mod managers;
pub mod session;
pub mod stacktrace;
pub mod transport;

pub use commands::BidiCommands;
pub use error::{BidiError, Result};
pub use events::{EventBus, SessionEvent, DEFAULT_EVENT_CAPACITY};
pub use managers::{
    ContextManager, DialogManager, InterceptAction, InterceptRule, ManagerRegistry,
    NetworkManager, PolyfillManager, PromptPolicy, SessionManager, ShadowRootManager,
};
pub use session::{BidiSession, SessionConfig};
pub use stacktrace::ScriptTemplate;
pub use transport::{Connection, ConnectionConfig};
