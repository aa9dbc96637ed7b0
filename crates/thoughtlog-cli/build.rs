use std::path::PathBuf;
use std::process::Command;

struct GitInfo {
    sha: String,
    count: String,
    dirty: bool,
}

fn git_stdout(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn read_git_info() -> Option<GitInfo> {
    let sha = git_stdout(&["rev-parse", "--short", "HEAD"])?;
    let count = git_stdout(&["rev-list", "--count", "HEAD"]).unwrap_or_else(|| "0".to_string());
    let dirty = git_stdout(&["status", "--porcelain", "--untracked-files=no"])
        .map(|status| !status.is_empty())
        .unwrap_or(false);
    Some(GitInfo { sha, count, dirty })
}

fn main() {
    if let Some(git_dir) = git_stdout(&["rev-parse", "--absolute-git-dir"]) {
        let git_dir = PathBuf::from(git_dir);
        println!("cargo:rerun-if-changed={}", git_dir.join("HEAD").display());
        println!("cargo:rerun-if-changed={}", git_dir.join("index").display());
    }

    let info = read_git_info().unwrap_or(GitInfo {
        sha: "nogit".to_string(),
        count: "0".to_string(),
        dirty: false,
    });
    println!("cargo:rustc-env=THOUGHTLOG_GIT_SHA={}", info.sha);
    println!("cargo:rustc-env=THOUGHTLOG_GIT_COUNT={}", info.count);
    println!(
        "cargo:rustc-env=THOUGHTLOG_GIT_DIRTY={}",
        if info.dirty { "true" } else { "false" }
    );
}
