use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::events::DiffStats;

/// Branch reported when the current branch cannot be determined.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git executable not found: {0}")]
    MissingGit(#[from] which::Error),
    #[error("failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {args} failed: {stderr}")]
    Failed { args: String, stderr: String },
}

/// Runs a version-control query and returns its raw stdout.
pub trait VcsQuery: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, VcsError>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
    git: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Result<Self, VcsError> {
        let git = which::which("git")?;
        Ok(Self {
            repo_root: repo_root.into(),
            git,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

impl VcsQuery for GitCli {
    fn run(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = Command::new(&self.git)
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(|source| VcsError::Spawn {
                args: args.join(" "),
                source,
            })?;
        if !output.status.success() {
            return Err(VcsError::Failed {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitBranch {
    pub name: String,
    pub is_current: bool,
    pub commit: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitCommit {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: String,
    pub files: Vec<String>,
}

pub fn current_branch(vcs: &dyn VcsQuery) -> Result<Option<String>, VcsError> {
    let name = vcs.run(&["branch", "--show-current"])?;
    let name = name.trim();
    Ok((!name.is_empty()).then(|| name.to_string()))
}

/// Current branch, falling back to `main` when git cannot answer or HEAD is
/// detached.
pub fn current_branch_or_default(vcs: &dyn VcsQuery) -> String {
    match current_branch(vcs) {
        Ok(Some(name)) => name,
        Ok(None) => DEFAULT_BRANCH.to_string(),
        Err(err) => {
            debug!(error = %err, "current branch unavailable, using default");
            DEFAULT_BRANCH.to_string()
        }
    }
}

pub fn list_branches(vcs: &dyn VcsQuery) -> Result<Vec<GitBranch>, VcsError> {
    Ok(parse_branch_list(&vcs.run(&["branch", "-v", "--no-color"])?))
}

pub fn recent_commits(vcs: &dyn VcsQuery, limit: usize) -> Result<Vec<GitCommit>, VcsError> {
    let limit = format!("-n{}", limit.max(1));
    let output = vcs.run(&["log", "--format=%H|%s|%an|%ai", &limit, "--name-only"])?;
    Ok(parse_commit_log(&output))
}

pub fn file_diff(vcs: &dyn VcsQuery, path: &str) -> Result<String, VcsError> {
    vcs.run(&["diff", "--no-color", "--", path])
}

/// Parses `git branch -v`. Detached-HEAD lines are skipped.
pub fn parse_branch_list(output: &str) -> Vec<GitBranch> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let line_re = LINE.get_or_init(|| {
        Regex::new(r"^(\*)?\s*(\S+)\s+([0-9a-fA-F]+)\s?(.*)$").expect("branch line regex")
    });

    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let trimmed = line.trim_end();
            if trimmed.trim_start_matches('*').trim_start().starts_with('(') {
                return None;
            }
            let caps = line_re.captures(trimmed)?;
            Some(GitBranch {
                name: caps[2].to_string(),
                is_current: caps.get(1).is_some(),
                commit: caps[3].to_string(),
                message: caps[4].trim().to_string(),
            })
        })
        .collect()
}

/// Parses `git log --format=%H|%s|%an|%ai --name-only`. Each header line is
/// followed by zero or more file names until the next header. Subjects may
/// themselves contain `|`.
pub fn parse_commit_log(output: &str) -> Vec<GitCommit> {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    let header_re = HEADER.get_or_init(|| {
        Regex::new(r"^([0-9a-fA-F]{7,64})\|(.*)\|([^|]*)\|([^|]*)$").expect("commit header regex")
    });

    let mut commits = Vec::new();
    let mut current: Option<GitCommit> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(caps) = header_re.captures(trimmed) {
            if let Some(done) = current.take() {
                commits.push(done);
            }
            current = Some(GitCommit {
                hash: caps[1].to_string(),
                message: caps[2].trim().to_string(),
                author: caps[3].trim().to_string(),
                date: caps[4].trim().to_string(),
                files: Vec::new(),
            });
        } else if let Some(commit) = current.as_mut() {
            commit.files.push(trimmed.to_string());
        }
    }

    if let Some(done) = current {
        commits.push(done);
    }
    commits
}

/// Counts added and removed lines in a unified diff, ignoring file headers.
pub fn count_diff_stats(diff: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            stats.added += 1;
        } else if line.starts_with('-') {
            stats.removed += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_branch_list_with_current_marker() {
        let output = "* main       1a2b3c4 Initial commit\n  feature/x  5d6e7f8 Add x | y\n  (HEAD detached at 1a2b3c4) 1a2b3c4 Initial\n";
        let branches = parse_branch_list(output);
        assert_eq!(
            branches,
            vec![
                GitBranch {
                    name: "main".to_string(),
                    is_current: true,
                    commit: "1a2b3c4".to_string(),
                    message: "Initial commit".to_string(),
                },
                GitBranch {
                    name: "feature/x".to_string(),
                    is_current: false,
                    commit: "5d6e7f8".to_string(),
                    message: "Add x | y".to_string(),
                },
            ]
        );
    }

    #[test]
    fn parses_commit_log_headers_and_files() {
        let output = "\
aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa|Fix parser|Ada|2026-01-02 10:00:00 +0000

src/parser.rs
tests/parser.rs
bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb|Merge a|b pipes|Grace|2026-01-01 09:00:00 +0000
cccccccccccccccccccccccccccccccccccccccc|Initial|Ada|2025-12-31 08:00:00 +0000

README.md
";
        let commits = parse_commit_log(output);
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].message, "Fix parser");
        assert_eq!(commits[0].files, vec!["src/parser.rs", "tests/parser.rs"]);
        assert_eq!(commits[1].message, "Merge a|b pipes");
        assert_eq!(commits[1].author, "Grace");
        assert!(commits[1].files.is_empty());
        assert_eq!(commits[2].date, "2025-12-31 08:00:00 +0000");
        assert_eq!(commits[2].files, vec!["README.md"]);
    }

    #[test]
    fn file_names_containing_pipes_stay_files() {
        let output = "aaaaaaa|Subject|Ada|2026-01-01\nweird|name.txt\n";
        let commits = parse_commit_log(output);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].files, vec!["weird|name.txt"]);
    }

    #[test]
    fn diff_stats_skip_headers() {
        let diff = "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1,2 +1,3 @@\n-old\n+new\n+more\n same\n";
        assert_eq!(count_diff_stats(diff), DiffStats { added: 2, removed: 1 });
    }

    struct Failing;

    impl VcsQuery for Failing {
        fn run(&self, args: &[&str]) -> Result<String, VcsError> {
            Err(VcsError::Failed {
                args: args.join(" "),
                stderr: "not a git repository".to_string(),
            })
        }
    }

    #[test]
    fn current_branch_falls_back_to_main() {
        assert_eq!(current_branch_or_default(&Failing), DEFAULT_BRANCH);
    }
}
