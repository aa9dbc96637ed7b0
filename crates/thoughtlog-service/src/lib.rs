//! Async runtime pieces for thoughtlog: the HTTP remote event source, the
//! reconciliation engine, detector poll loops and the in-memory remote API.

pub mod api;
pub mod logging;
pub mod remote_source;
pub mod sync_engine;
pub mod watcher;

pub use remote_source::{HttpEventSource, RemoteError, RemoteEventSource};
pub use sync_engine::SyncEngine;
pub use watcher::{Watcher, WatcherSettings};
