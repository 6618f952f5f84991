//! External extraction tool.
//!
//! The tool is invoked as `<tool> <source_url> <output_dir>` and is expected
//! to write `text/page-<n>.txt` and `jpeg/page-<n>.jpg` under the output dir.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

static TEXT_PAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^page-(\d+)\.txt$").unwrap());
static IMAGE_PAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^page-(\d+)\.jpg$").unwrap());

/// Longest stderr excerpt kept in a failure reason.
const MAX_REASON_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("extraction tool {tool:?} not found: {source}")]
    NotFound {
        tool: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a tool run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Succeeded,
    Failed(String),
}

/// One numbered output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    pub number: u32,
    pub path: PathBuf,
}

/// Files produced by a successful run, each list in page order.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub text_pages: Vec<PageFile>,
    pub images: Vec<PageFile>,
}

#[derive(Debug, Clone)]
pub struct ExtractionTool {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl ExtractionTool {
    /// Locate the tool. Bare names are looked up on PATH.
    pub fn resolve(tool: &str, timeout: Option<Duration>) -> Result<Self, ToolError> {
        let program = which::which(tool).map_err(|source| ToolError::NotFound {
            tool: tool.to_string(),
            source,
        })?;
        debug!("Using extraction tool {}", program.display());
        Ok(Self { program, timeout })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the tool against `source_url`, writing into `output_dir`.
    ///
    /// A non-zero exit or a timeout is a `Failed` status, not an error; only
    /// failing to start the process is.
    pub async fn run(&self, source_url: &str, output_dir: &Path) -> Result<ToolStatus, ToolError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(source_url)
            .arg(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |source| ToolError::Spawn {
            tool: self.program.display().to_string(),
            source,
        };

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result.map_err(spawn_error)?,
                // Dropping the future kills the child
                Err(_) => {
                    return Ok(ToolStatus::Failed(format!(
                        "timed out after {}s",
                        limit.as_secs()
                    )))
                }
            },
            None => cmd.output().await.map_err(spawn_error)?,
        };

        if output.status.success() {
            return Ok(ToolStatus::Succeeded);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut reason = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let excerpt = stderr.trim();
        if !excerpt.is_empty() {
            let excerpt: String = excerpt.chars().take(MAX_REASON_LEN).collect();
            reason = format!("{}: {}", reason, excerpt);
        }
        Ok(ToolStatus::Failed(reason))
    }
}

/// Numbered files in `dir` matching `pattern`, sorted by page number.
/// A missing directory yields no files.
async fn numbered_files(dir: &Path, pattern: &Regex) -> std::io::Result<Vec<PageFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let number = pattern
            .captures(&name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        match number {
            Some(number) => files.push(PageFile {
                number,
                path: entry.path(),
            }),
            None => warn!("Cannot extract page number from filename {}", entry.path().display()),
        }
    }

    files.sort_by_key(|f| f.number);
    Ok(files)
}

/// Collect the page files a successful run left in `output_dir`.
pub async fn collect_outputs(output_dir: &Path) -> std::io::Result<ToolOutput> {
    Ok(ToolOutput {
        text_pages: numbered_files(&output_dir.join("text"), &TEXT_PAGE).await?,
        images: numbered_files(&output_dir.join("jpeg"), &IMAGE_PAGE).await?,
    })
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script and return its path.
    pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_missing_tool() {
        let result = ExtractionTool::resolve("/nonexistent/filingtext-extract", None);
        assert!(matches!(result, Err(ToolError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_run_collects_pages_in_numeric_order() {
        let bin = TempDir::new().unwrap();
        let script = write_script(
            bin.path(),
            "extract",
            r#"mkdir -p "$2/text" "$2/jpeg"
printf 'ten' > "$2/text/page-10.txt"
printf 'two' > "$2/text/page-2.txt"
printf 'x' > "$2/text/notes.txt"
printf 'img' > "$2/jpeg/page-2.jpg""#,
        );
        let tool = ExtractionTool::resolve(script.to_str().unwrap(), None).unwrap();

        let out = TempDir::new().unwrap();
        let status = tool.run("http://x/1.pdf", out.path()).await.unwrap();
        assert_eq!(status, ToolStatus::Succeeded);

        let outputs = collect_outputs(out.path()).await.unwrap();
        let numbers: Vec<u32> = outputs.text_pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![2, 10]);
        assert_eq!(outputs.images.len(), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let bin = TempDir::new().unwrap();
        let script = write_script(bin.path(), "extract", "echo 'bad pdf' >&2\nexit 3");
        let tool = ExtractionTool::resolve(script.to_str().unwrap(), None).unwrap();

        let out = TempDir::new().unwrap();
        let status = tool.run("http://x/1.pdf", out.path()).await.unwrap();
        assert_eq!(status, ToolStatus::Failed("exit code 3: bad pdf".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let bin = TempDir::new().unwrap();
        let script = write_script(bin.path(), "extract", "sleep 5");
        let tool =
            ExtractionTool::resolve(script.to_str().unwrap(), Some(Duration::from_millis(100)))
                .unwrap();

        let out = TempDir::new().unwrap();
        let status = tool.run("http://x/1.pdf", out.path()).await.unwrap();
        assert!(matches!(status, ToolStatus::Failed(reason) if reason.starts_with("timed out")));
    }

    #[tokio::test]
    async fn test_no_output_dirs() {
        let out = TempDir::new().unwrap();
        let outputs = collect_outputs(out.path()).await.unwrap();
        assert!(outputs.text_pages.is_empty());
        assert!(outputs.images.is_empty());
    }
}
