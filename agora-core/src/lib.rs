//! agora-core
//!
//! Contracts and building blocks shared by the Agora runtime and venue adapters.
//!
//! - `connector`: the `VenueConnector` trait, its capability provider traits and
//!   the `Features` block.
//! - `dispatch`: the typed `Dispatcher<T>` bus and its `Pipe<T>` subscriptions.
//! - `orderbook`: pure snapshot/delta merge rules.
//! - `script`: the `ScriptRuntime`/`CompiledScript` pair driven by the VM pool.
//! - `stream`: `StreamHandle` and `release_worker`, its non-blocking release path.
//!
//! Async runtime (Tokio)
//! ---------------------
//! `StreamHandle` wraps `tokio::task::JoinHandle<()>`, the dispatcher spawns its
//! workers with `tokio::spawn`, and `StreamProvider::connect` returns a
//! `tokio::sync::mpsc::Receiver`. Everything here must run under a Tokio 1.x
//! runtime.
#![warn(missing_docs)]

/// Venue capability traits and the primary `VenueConnector` interface.
pub mod connector;
/// Typed publish/subscribe bus.
pub mod dispatch;
pub mod orderbook;
/// Script runtime contract used by the VM pool.
pub mod script;
/// Task handles with cooperative shutdown.
pub mod stream;
pub mod sync;

pub use agora_types::*;
pub use connector::{
    AccountProvider, Channel, ChannelKind, DepositProvider, Features, OrderProvider,
    OrderbookProvider, StreamEvent, StreamProvider, TickerProvider, VenueConnector,
};
pub use dispatch::{Dispatcher, Pipe};
pub use script::{CompileValidator, CompiledScript, ScriptContext, ScriptRuntime, ScriptValidator};
pub use stream::StreamHandle;
