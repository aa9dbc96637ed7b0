use serde_json::{json, Value};

pub const PACKAGE: &str = env!("CARGO_PKG_VERSION");
pub const GIT_SHA: &str = env!("THOUGHTLOG_GIT_SHA");
pub const GIT_COUNT: &str = env!("THOUGHTLOG_GIT_COUNT");
const GIT_DIRTY: &str = env!("THOUGHTLOG_GIT_DIRTY");

pub fn is_dirty() -> bool {
    GIT_DIRTY == "true"
}

/// `0.1.0+git.42.abc1234`, with `.dirty` appended for uncommitted builds.
pub fn full() -> String {
    let mut text = format!("{}+git.{}.{}", PACKAGE, GIT_COUNT, GIT_SHA);
    if is_dirty() {
        text.push_str(".dirty");
    }
    text
}

pub fn as_json() -> Value {
    json!({
        "version": PACKAGE,
        "git_sha": GIT_SHA,
        "git_count": GIT_COUNT,
        "dirty": is_dirty(),
        "full": full(),
    })
}
