//! Core domain types for thoughtlog: the event model, the append-only log,
//! the graph projection, change detectors and remote reconciliation.

pub mod config;
pub mod detect;
pub mod event_log;
pub mod events;
pub mod git;
pub mod project_files;
pub mod projection;
pub mod remote;
pub mod sync;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}


#[cfg(test)]
mod tests {
    use super::version;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
