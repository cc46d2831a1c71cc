//! Reconciliation and session protocol engine.
//!
//! Application code renders a [`view::View`] from its state; the engine turns
//! it into an immutable tree, diffs it against what the browser last applied,
//! frames the patch for the wire and routes browser events back to the
//! handlers that produced them. Each session runs as its own task.

pub mod access;
pub mod app;
pub mod boundary;
pub mod codec;
pub mod config;
pub mod delay;
pub mod diff;
pub mod live;
pub mod outbox;
pub mod report;
pub mod router;
pub mod session;
pub mod view;

pub use access::{transition, Access, Transition, TransitionApplier};
pub use app::App;
pub use boundary::{EnvironmentConfigurator, StateRouter, Subscription};
pub use codec::{decode_client, encode_client, encode_server, ClientMessage, ServerFrame, ServerMessage};
pub use config::EngineConfig;
pub use delay::DelayKey;
pub use diff::{diff, diff_at};
pub use live::LiveTree;
pub use outbox::{Transport, TransportKind};
pub use report::{report, SessionScope};
pub use router::{HandlerKey, HandlerTable};
pub use session::{spawn_session, Phase, SessionHandle, SessionStatus};
pub use view::{el, handler, render, text, void, ElementView, Handler, Rendered, View};
