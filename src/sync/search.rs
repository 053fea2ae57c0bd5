//! Host-side code search over a project tree using `grep`.

use crate::error::{Result, VagrantMcpError};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RESULTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Semantic,
    Exact,
    Fuzzy,
}

impl FromStr for SearchKind {
    type Err = VagrantMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "semantic" => Ok(SearchKind::Semantic),
            "exact" => Ok(SearchKind::Exact),
            "fuzzy" => Ok(SearchKind::Fuzzy),
            other => Err(VagrantMcpError::InvalidInput(format!(
                "unknown search type: {} (expected semantic, exact or fuzzy)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub line: u64,
    pub content: String,
    pub match_type: SearchKind,
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub root: &'a Path,
    pub query: &'a str,
    pub case_sensitive: bool,
    pub max_results: usize,
    pub exclude_dirs: &'a [String],
}

impl SearchRequest<'_> {
    fn limit(&self) -> usize {
        if self.max_results == 0 {
            DEFAULT_MAX_RESULTS
        } else {
            self.max_results
        }
    }
}

pub async fn run(kind: SearchKind, request: &SearchRequest<'_>, cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
    if request.query.trim().is_empty() {
        return Err(VagrantMcpError::InvalidInput("search query is empty".to_string()));
    }
    match kind {
        SearchKind::Exact => grep(request, request.query, request.case_sensitive, kind, cancel).await,
        // Loose matching: case never matters.
        SearchKind::Semantic => grep(request, request.query, false, kind, cancel).await,
        SearchKind::Fuzzy => fuzzy(request, cancel).await,
    }
}

async fn fuzzy(request: &SearchRequest<'_>, cancel: &CancellationToken) -> Result<Vec<SearchResult>> {
    let limit = request.limit();
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for word in request.query.split_whitespace().filter(|w| w.chars().count() >= 3) {
        let matches = grep(request, word, request.case_sensitive, SearchKind::Fuzzy, cancel).await?;
        for found in matches {
            if seen.insert((found.path.clone(), found.line)) {
                results.push(found);
                if results.len() >= limit {
                    return Ok(results);
                }
            }
        }
    }
    Ok(results)
}

async fn grep(
    request: &SearchRequest<'_>,
    pattern: &str,
    case_sensitive: bool,
    kind: SearchKind,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>> {
    let mut cmd = Command::new("grep");
    cmd.args(["-r", "-n", "-I", "--null"]);
    if !case_sensitive {
        cmd.arg("-i");
    }
    for dir in request.exclude_dirs {
        cmd.arg(format!("--exclude-dir={}", dir));
    }
    cmd.arg("-e").arg(pattern).arg("--").arg(request.root);

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VagrantMcpError::DependencyMissing("grep".to_string())
            } else {
                VagrantMcpError::failed("search", e)
            }
        })?;

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|e| VagrantMcpError::failed("search", e))?,
        _ = cancel.cancelled() => return Err(VagrantMcpError::Cancelled),
    };

    match output.status.code() {
        Some(0) => {}
        Some(1) => return Ok(Vec::new()),
        _ => {
            return Err(VagrantMcpError::failed(
                "search",
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter_map(|line| parse_line(line, kind))
        .take(request.limit())
        .collect())
}

/// `path\0line:content`, as printed by `grep -n --null`.
fn parse_line(line: &str, kind: SearchKind) -> Option<SearchResult> {
    let (path, rest) = line.split_once('\0')?;
    let (number, content) = rest.split_once(':')?;
    Some(SearchResult {
        path: path.to_string(),
        line: number.parse().ok()?,
        content: content.to_string(),
        match_type: kind,
    })
}
