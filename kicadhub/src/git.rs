//! Git over the command line.
//!
//! The client shells out to `git` through a [`CommandRunner`] so tests can
//! substitute canned output. Only the porcelain formats are parsed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::tools::{ExternalTool, ToolError, ToolKind, ToolOutput};

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with `args` in `cwd`; a non-zero exit is an error.
    async fn run(&self, args: &[String], cwd: &Path) -> Result<ToolOutput, ToolError>;
}

#[async_trait]
impl CommandRunner for ExternalTool {
    async fn run(&self, args: &[String], cwd: &Path) -> Result<ToolOutput, ToolError> {
        self.run_checked(args, Some(cwd)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Changed,
    Renamed,
    Unmerged,
    Untracked,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Two-letter `XY` code, `..` padding for unchanged sides.
    pub xy: String,
    pub orig_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GitStatus {
    /// `None` for a detached head.
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub entries: Vec<StatusEntry>,
}

impl GitStatus {
    pub fn is_clean(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.kind == EntryKind::Ignored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub subject: String,
}

/// Parse `git status --porcelain=2 --branch`.
pub fn parse_porcelain_v2(text: &str) -> GitStatus {
    let mut status = GitStatus::default();
    for line in text.lines() {
        if let Some(header) = line.strip_prefix("# ") {
            let (key, value) = header.split_once(' ').unwrap_or((header, ""));
            match key {
                "branch.head" if value != "(detached)" => status.branch = Some(value.to_string()),
                "branch.upstream" => status.upstream = Some(value.to_string()),
                "branch.ab" => {
                    for part in value.split_whitespace() {
                        if let Some(n) = part.strip_prefix('+') {
                            status.ahead = n.parse().unwrap_or(0);
                        } else if let Some(n) = part.strip_prefix('-') {
                            status.behind = n.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        let entry = match line.split_once(' ') {
            Some(("1", rest)) => rest.splitn(8, ' ').collect::<Vec<_>>().split_last().map(|(path, fields)| StatusEntry {
                path: path.to_string(),
                kind: EntryKind::Changed,
                xy: fields.first().unwrap_or(&"..").to_string(),
                orig_path: None,
            }),
            Some(("2", rest)) => rest.splitn(9, ' ').collect::<Vec<_>>().split_last().map(|(paths, fields)| {
                let (path, orig) = paths.split_once('\t').unwrap_or((paths, ""));
                StatusEntry {
                    path: path.to_string(),
                    kind: EntryKind::Renamed,
                    xy: fields.first().unwrap_or(&"..").to_string(),
                    orig_path: Some(orig.to_string()).filter(|o| !o.is_empty()),
                }
            }),
            Some(("u", rest)) => rest.splitn(10, ' ').collect::<Vec<_>>().split_last().map(|(path, fields)| StatusEntry {
                path: path.to_string(),
                kind: EntryKind::Unmerged,
                xy: fields.first().unwrap_or(&"..").to_string(),
                orig_path: None,
            }),
            Some(("?", path)) => Some(StatusEntry {
                path: path.to_string(),
                kind: EntryKind::Untracked,
                xy: "??".into(),
                orig_path: None,
            }),
            Some(("!", path)) => Some(StatusEntry {
                path: path.to_string(),
                kind: EntryKind::Ignored,
                xy: "!!".into(),
                orig_path: None,
            }),
            _ => None,
        };
        status.entries.extend(entry);
    }
    status
}

const LOG_SEP: char = '\u{1f}';

fn parse_log(text: &str) -> Vec<Commit> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, LOG_SEP);
            Some(Commit {
                hash: fields.next()?.to_string(),
                author: fields.next()?.to_string(),
                date: fields.next()?.to_string(),
                subject: fields.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

pub struct GitClient<R: CommandRunner = ExternalTool> {
    runner: R,
}

impl GitClient<ExternalTool> {
    /// `git` from `PATH`, with a 120 s timeout per command.
    pub fn system() -> Self {
        let program = ToolKind::Git.discover().unwrap_or_else(|| PathBuf::from("git"));
        Self::with_runner(ExternalTool::new(program).with_timeout(Duration::from_secs(120)))
    }
}

impl<R: CommandRunner> GitClient<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Result<ToolOutput, ToolError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(&args, repo).await
    }

    pub async fn status(&self, repo: &Path) -> Result<GitStatus, ToolError> {
        let out = self.git(repo, &["status", "--porcelain=2", "--branch"]).await?;
        Ok(parse_porcelain_v2(&out.stdout))
    }

    pub async fn current_branch(&self, repo: &Path) -> Result<Option<String>, ToolError> {
        let out = self.git(repo, &["branch", "--show-current"]).await?;
        let name = out.stdout.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    pub async fn log(&self, repo: &Path, limit: usize) -> Result<Vec<Commit>, ToolError> {
        let limit = format!("-n{}", limit);
        let out = self
            .git(
                repo,
                &[
                    "log",
                    "--all",
                    "--date-order",
                    "--date=iso",
                    "--pretty=format:%H%x1f%an%x1f%ad%x1f%s",
                    &limit,
                ],
            )
            .await?;
        Ok(parse_log(&out.stdout))
    }

    pub async fn add(&self, repo: &Path, paths: &[&str]) -> Result<ToolOutput, ToolError> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.git(repo, &args).await
    }

    pub async fn reset(&self, repo: &Path, paths: &[&str]) -> Result<ToolOutput, ToolError> {
        let mut args = vec!["reset", "--"];
        args.extend_from_slice(paths);
        self.git(repo, &args).await
    }

    pub async fn commit(&self, repo: &Path, message: &str, signoff: bool) -> Result<ToolOutput, ToolError> {
        let mut args = vec!["commit"];
        if signoff {
            args.push("-s");
        }
        args.extend(["-m", message]);
        self.git(repo, &args).await
    }

    pub async fn pull(&self, repo: &Path) -> Result<ToolOutput, ToolError> {
        self.git(repo, &["pull"]).await
    }

    pub async fn push(&self, repo: &Path) -> Result<ToolOutput, ToolError> {
        self.git(repo, &["push"]).await
    }

    pub async fn init(&self, repo: &Path) -> Result<ToolOutput, ToolError> {
        self.git(repo, &["init"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every invocation and answers with fixed stdout.
    struct FakeGit {
        stdout: String,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeGit {
        fn new(stdout: &str) -> Self {
            Self {
                stdout: stdout.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for FakeGit {
        async fn run(&self, args: &[String], _cwd: &Path) -> Result<ToolOutput, ToolError> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(ToolOutput {
                exit_code: Some(0),
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    const STATUS: &str = "# branch.oid 1234abcd\n# branch.head main\n# branch.upstream origin/main\n# branch.ab +2 -1\n1 .M N... 100644 100644 100644 aaa bbb libs/Device.kicad_sym\n2 R. N... 100644 100644 100644 aaa bbb R100 libs/New name.kicad_sym\tlibs/Old.kicad_sym\nu UU N... 100644 100644 100644 100644 a b c conflict.kicad_sch\n? notes.txt\n! build/out.zip\n";

    #[test]
    fn test_parse_porcelain_v2() {
        let status = parse_porcelain_v2(STATUS);
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(status.upstream.as_deref(), Some("origin/main"));
        assert_eq!((status.ahead, status.behind), (2, 1));
        assert_eq!(status.entries.len(), 5);

        assert_eq!(status.entries[0].path, "libs/Device.kicad_sym");
        assert_eq!(status.entries[0].xy, ".M");
        assert_eq!(status.entries[1].kind, EntryKind::Renamed);
        assert_eq!(status.entries[1].path, "libs/New name.kicad_sym");
        assert_eq!(status.entries[1].orig_path.as_deref(), Some("libs/Old.kicad_sym"));
        assert_eq!(status.entries[2].kind, EntryKind::Unmerged);
        assert_eq!(status.entries[2].path, "conflict.kicad_sch");
        assert_eq!(status.entries[3].kind, EntryKind::Untracked);
        assert!(!status.is_clean());
    }

    #[test]
    fn test_detached_head_and_clean_tree() {
        let status = parse_porcelain_v2("# branch.oid abc\n# branch.head (detached)\n! target/\n");
        assert_eq!(status.branch, None);
        assert!(status.is_clean());
    }

    #[tokio::test]
    async fn test_commands_and_log_parsing() {
        let log = "abc\u{1f}Ada\u{1f}2025-01-01 10:00:00 +0000\u{1f}Add R0603\ndef\u{1f}Bob\u{1f}2024-12-31 09:00:00 +0000\u{1f}Init\n";
        let client = GitClient::with_runner(FakeGit::new(log));
        let repo = Path::new("/repo");

        let commits = client.log(repo, 50).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject, "Add R0603");
        assert_eq!(commits[1].author, "Bob");

        client.commit(repo, "Update footprints", true).await.unwrap();
        client.add(repo, &["a.kicad_sym"]).await.unwrap();
        let calls = client.runner.calls.lock().unwrap();
        assert_eq!(calls[0][0], "log");
        assert!(calls[0].contains(&"-n50".to_string()));
        assert_eq!(calls[1], vec!["commit", "-s", "-m", "Update footprints"]);
        assert_eq!(calls[2], vec!["add", "--", "a.kicad_sym"]);
    }
}
