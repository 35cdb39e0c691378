// Issue extraction and deduplication
// Turns raw hook output into canonical issues keyed by
// (file path, line number, normalized message).

use crate::error::{ParseError, QualgateError, Result};
use crate::hook::{HookResult, HookStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Lenient mapping of the severity words tools print.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" | "e" | "high" | "critical" => Severity::Error,
            "warning" | "warn" | "w" | "medium" => Severity::Warning,
            "info" | "information" | "note" | "help" | "low" | "i" => Severity::Info,
            _ => Severity::Error,
        }
    }
}

/// What kind of fix an issue needs. Fix agents declare the categories they
/// handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Formatting,
    Lint,
    Type,
    Security,
    Complexity,
    Spelling,
    Other,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::Formatting => "formatting",
            IssueCategory::Lint => "lint",
            IssueCategory::Type => "type",
            IssueCategory::Security => "security",
            IssueCategory::Complexity => "complexity",
            IssueCategory::Spelling => "spelling",
            IssueCategory::Other => "other",
        }
    }

    /// Whether fixes in this category rewrite source files.
    pub fn modifies_files(&self) -> bool {
        !matches!(self, IssueCategory::Other)
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-derived identity of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IssueKey {
    pub file_path: String,
    pub line_number: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub file_path: String,
    pub line_number: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    pub code: Option<String>,
    pub severity: Severity,
    pub source_tool: String,
    pub category: IssueCategory,
}

impl Issue {
    pub fn new(
        file_path: impl Into<String>,
        line_number: Option<u32>,
        message: impl Into<String>,
        source_tool: impl Into<String>,
    ) -> Self {
        Self {
            file_path: normalize_path(&file_path.into()),
            line_number,
            column: None,
            message: message.into().trim().to_string(),
            code: None,
            severity: Severity::Error,
            source_tool: source_tool.into(),
            category: IssueCategory::Other,
        }
    }

    pub fn with_column(mut self, column: Option<u32>) -> Self {
        self.column = column;
        self
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_category(mut self, category: IssueCategory) -> Self {
        self.category = category;
        self
    }

    pub fn key(&self) -> IssueKey {
        IssueKey {
            file_path: self.file_path.clone(),
            line_number: self.line_number,
            message: normalize_message(&self.message),
        }
    }
}

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Canonical message text: no color codes, single spaces, no trailing period,
/// lower case.
pub fn normalize_message(message: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(message, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");
    collapsed.trim_end_matches('.').to_lowercase()
}

fn normalize_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    path.strip_prefix("./").map(str::to_string).unwrap_or(path)
}

/// Drop repeated issues by key; the first occurrence wins and order is kept.
pub fn deduplicate<I>(issues: I) -> Vec<Issue>
where
    I: IntoIterator<Item = Issue>,
{
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| seen.insert(issue.key()))
        .collect()
}

/// Turns one tool's raw output into issues.
///
/// Blank output parses to no issues. Output with no recognizable finding is a
/// [`ParseError::UnrecognizedOutput`].
pub trait OutputParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn parse(&self, tool: &str, output: &str) -> Result<Vec<Issue>>;
}

fn unrecognized(tool: &str, output: &str) -> QualgateError {
    ParseError::UnrecognizedOutput {
        tool: tool.to_string(),
        sample: output.trim().chars().take(200).collect(),
    }
    .into()
}

fn is_continuation(severity: Option<&str>) -> bool {
    matches!(severity, Some("note" | "help"))
}

static LINE_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<path>[^\s:][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?(?::|\s+-)\s*(?:(?P<sev>error|warning|information|info|note|help)\s*:\s*)?(?P<msg>.+?)\s*$",
    )
    .expect("valid line diagnostic regex")
});

static LEADING_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<code>[A-Z]+[0-9]+)\s+(?P<rest>.+)$").expect("valid code regex"));

/// `path:line[:col]: message` lines, also `path:line:col - severity: message`.
///
/// `note`/`help` lines continue the previous diagnostic and are folded into it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineParser;

impl OutputParser for LineParser {
    fn name(&self) -> &'static str {
        "line"
    }

    fn parse(&self, tool: &str, output: &str) -> Result<Vec<Issue>> {
        if output.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut issues = Vec::new();
        let mut matched_any = false;
        for line in output.lines() {
            let line = ANSI_ESCAPE.replace_all(line, "");
            let Some(caps) = LINE_DIAGNOSTIC.captures(&line) else {
                continue;
            };
            matched_any = true;
            let severity = caps.name("sev").map(|m| m.as_str());
            if is_continuation(severity) {
                continue;
            }

            let (code, message) = match LEADING_CODE.captures(&caps["msg"]) {
                Some(found) => (Some(found["code"].to_string()), found["rest"].to_string()),
                None => (None, caps["msg"].to_string()),
            };
            issues.push(
                Issue::new(&caps["path"], caps["line"].parse().ok(), message, tool)
                    .with_column(caps.name("col").and_then(|m| m.as_str().parse().ok()))
                    .with_code(code)
                    .with_severity(severity.map_or(Severity::Error, Severity::from_label)),
            );
        }

        if !matched_any {
            return Err(unrecognized(tool, output));
        }
        Ok(issues)
    }
}

static BLOCK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<sev>error|warning|note|help)(?:\[(?P<code>[^\]]+)\])?:\s*(?P<msg>.+?)\s*$")
        .expect("valid block header regex")
});

static BLOCK_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-->\s*(?P<path>[^:]+):(?P<line>\d+)(?::(?P<col>\d+))?")
        .expect("valid block location regex")
});

/// rustc/clippy style blocks: a `severity[code]: message` header followed by
/// a `--> path:line:col` location. `note:`/`help:` sub-diagnostics and their
/// locations belong to the enclosing block. Headers without a location
/// (summaries such as "aborting due to ...") are not issues.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustcBlockParser;

impl OutputParser for RustcBlockParser {
    fn name(&self) -> &'static str {
        "rustc_block"
    }

    fn parse(&self, tool: &str, output: &str) -> Result<Vec<Issue>> {
        if output.trim().is_empty() {
            return Ok(Vec::new());
        }

        struct Pending {
            severity: Severity,
            code: Option<String>,
            message: String,
            location: Option<(String, u32, Option<u32>)>,
        }

        fn flush(pending: Option<Pending>, tool: &str, issues: &mut Vec<Issue>) {
            if let Some(Pending {
                severity,
                code,
                message,
                location: Some((path, line, col)),
            }) = pending
            {
                issues.push(
                    Issue::new(path, Some(line), message, tool)
                        .with_column(col)
                        .with_code(code)
                        .with_severity(severity),
                );
            }
        }

        let mut issues = Vec::new();
        let mut pending: Option<Pending> = None;
        let mut saw_header = false;

        for raw in output.lines() {
            let line = ANSI_ESCAPE.replace_all(raw, "");
            if let Some(caps) = BLOCK_HEADER.captures(&line) {
                saw_header = true;
                if is_continuation(Some(&caps["sev"])) {
                    continue;
                }
                flush(pending.take(), tool, &mut issues);
                pending = Some(Pending {
                    severity: Severity::from_label(&caps["sev"]),
                    code: caps.name("code").map(|m| m.as_str().to_string()),
                    message: caps["msg"].to_string(),
                    location: None,
                });
            } else if let Some(caps) = BLOCK_LOCATION.captures(&line) {
                if let Some(ref mut diag) = pending {
                    if diag.location.is_none() {
                        diag.location = caps["line"].parse().ok().map(|n| {
                            (
                                caps["path"].trim().to_string(),
                                n,
                                caps.name("col").and_then(|m| m.as_str().parse().ok()),
                            )
                        });
                    }
                }
            }
        }
        flush(pending, tool, &mut issues);

        if !saw_header {
            return Err(unrecognized(tool, output));
        }
        Ok(issues)
    }
}

/// JSON findings: a top-level array, or an object holding the array under
/// `results`, `issues`, `diagnostics` or `findings`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

const JSON_LIST_KEYS: &[&str] = &["results", "issues", "diagnostics", "findings"];
const JSON_PATH_KEYS: &[&str] = &["filename", "file", "file_path", "path"];
const JSON_LINE_KEYS: &[&str] = &["line_number", "line", "row"];
const JSON_COLUMN_KEYS: &[&str] = &["col_offset", "column", "col"];
const JSON_MESSAGE_KEYS: &[&str] = &["issue_text", "message", "msg", "text"];
const JSON_SEVERITY_KEYS: &[&str] = &["issue_severity", "severity", "level"];
const JSON_CODE_KEYS: &[&str] = &["test_id", "code", "rule", "check_name"];

fn json_field<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| entry.get(*k)).or_else(|| {
        entry
            .get("location")
            .and_then(|loc| keys.iter().find_map(|k| loc.get(*k)))
    })
}

fn json_u32(value: Option<&Value>) -> Option<u32> {
    value.and_then(Value::as_u64).map(|n| n as u32)
}

fn json_str(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

impl OutputParser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, tool: &str, output: &str) -> Result<Vec<Issue>> {
        if output.trim().is_empty() {
            return Ok(Vec::new());
        }
        let invalid = |message: String| -> QualgateError {
            ParseError::InvalidJson {
                tool: tool.to_string(),
                message,
            }
            .into()
        };

        let document: Value =
            serde_json::from_str(output.trim()).map_err(|e| invalid(e.to_string()))?;
        let entries = match &document {
            Value::Array(entries) => entries,
            Value::Object(map) => JSON_LIST_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
                .ok_or_else(|| invalid("no findings array in document".to_string()))?,
            _ => return Err(invalid("expected an array or object".to_string())),
        };

        entries
            .iter()
            .enumerate()
            .map(|(i, entry)| -> Result<Issue> {
                let path = json_str(json_field(entry, JSON_PATH_KEYS))
                    .ok_or_else(|| invalid(format!("finding {i} has no file path")))?;
                let message = json_str(json_field(entry, JSON_MESSAGE_KEYS))
                    .ok_or_else(|| invalid(format!("finding {i} has no message")))?;
                let severity = json_str(json_field(entry, JSON_SEVERITY_KEYS))
                    .map_or(Severity::Error, |s| Severity::from_label(&s));
                Ok(
                    Issue::new(path, json_u32(json_field(entry, JSON_LINE_KEYS)), message, tool)
                        .with_column(json_u32(json_field(entry, JSON_COLUMN_KEYS)))
                        .with_code(json_str(json_field(entry, JSON_CODE_KEYS)))
                        .with_severity(severity),
                )
            })
            .collect()
    }
}

static COMPLEXITY_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?P<path>[^\s:]+)(?::(?P<line>\d+))?\s+(?P<function>[A-Za-z_][\w.<>]*)\s+(?P<score>\d+)\s*$")
        .expect("valid complexity row regex")
});

/// `<path>[:line] <function> <complexity>` rows. Only functions above the
/// threshold become issues, the same population a fixer is asked to reduce.
#[derive(Debug, Clone, Copy)]
pub struct ComplexityParser {
    pub threshold: u32,
}

impl ComplexityParser {
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl OutputParser for ComplexityParser {
    fn name(&self) -> &'static str {
        "complexity"
    }

    fn parse(&self, tool: &str, output: &str) -> Result<Vec<Issue>> {
        if output.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut issues = Vec::new();
        let mut rows = 0;
        for line in output.lines() {
            let Some(caps) = COMPLEXITY_ROW.captures(line) else {
                continue;
            };
            rows += 1;
            let Ok(score) = caps["score"].parse::<u32>() else {
                continue;
            };
            if score <= self.threshold {
                continue;
            }
            let message = format!(
                "{} has complexity {score} (threshold {})",
                &caps["function"], self.threshold
            );
            issues.push(
                Issue::new(
                    &caps["path"],
                    caps.name("line").and_then(|m| m.as_str().parse().ok()),
                    message,
                    tool,
                )
                .with_severity(Severity::Warning),
            );
        }

        if rows == 0 {
            return Err(unrecognized(tool, output));
        }
        Ok(issues)
    }
}

/// How one hook's output is parsed and whether its count can drive the fix loop.
#[derive(Clone)]
pub struct ToolAdapter {
    pub parser: Arc<dyn OutputParser>,
    pub category: IssueCategory,
    /// Counts are reproducible from the same population fixers act on.
    pub countable: bool,
}

impl ToolAdapter {
    pub fn new(parser: Arc<dyn OutputParser>, category: IssueCategory) -> Self {
        Self {
            parser,
            category,
            countable: true,
        }
    }

    /// Findings are reported for manual review and excluded from the fix loop.
    pub fn manual_review_only(mut self) -> Self {
        self.countable = false;
        self
    }
}

impl fmt::Debug for ToolAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolAdapter")
            .field("parser", &self.parser.name())
            .field("category", &self.category)
            .field("countable", &self.countable)
            .finish()
    }
}

pub const DEFAULT_COMPLEXITY_THRESHOLD: u32 = 15;

/// Issues gathered from one set of hook results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueSnapshot {
    /// Deduplicated issues the fix loop acts on.
    pub issues: Vec<Issue>,
    /// Findings from hooks whose counts are not reproducible.
    pub manual_review: Vec<Issue>,
    /// Per-hook count; `None` when it is unknown.
    pub per_hook: BTreeMap<String, Option<usize>>,
    /// Hooks whose output could not be turned into a count, with the reason.
    pub unknown: BTreeMap<String, String>,
}

impl IssueSnapshot {
    pub fn count(&self) -> usize {
        self.issues.len()
    }

    /// The count is trustworthy only when every hook produced one.
    pub fn is_count_known(&self) -> bool {
        self.unknown.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.is_count_known() && self.issues.is_empty()
    }

    pub fn unknown_hooks(&self) -> Vec<String> {
        self.unknown.keys().cloned().collect()
    }

    pub fn keys(&self) -> HashSet<IssueKey> {
        self.issues.iter().map(Issue::key).collect()
    }
}

/// Parses hook results into an [`IssueSnapshot`].
#[derive(Debug, Clone)]
pub struct IssueCollector {
    adapters: BTreeMap<String, ToolAdapter>,
    fallback: ToolAdapter,
}

impl Default for IssueCollector {
    fn default() -> Self {
        Self {
            adapters: BTreeMap::new(),
            fallback: ToolAdapter::new(Arc::new(LineParser), IssueCategory::Other),
        }
    }
}

impl IssueCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapters for the hooks of the built-in tool registry.
    pub fn with_builtin_adapters() -> Self {
        let line: Arc<dyn OutputParser> = Arc::new(LineParser);
        let mut collector = Self::new();
        collector
            .register("ruff-check", ToolAdapter::new(line.clone(), IssueCategory::Lint))
            .register("ruff-format", ToolAdapter::new(line.clone(), IssueCategory::Formatting))
            .register("pyright", ToolAdapter::new(line.clone(), IssueCategory::Type))
            .register("codespell", ToolAdapter::new(line, IssueCategory::Spelling))
            .register(
                "bandit",
                ToolAdapter::new(Arc::new(JsonParser), IssueCategory::Security),
            )
            .register(
                "complexipy",
                ToolAdapter::new(
                    Arc::new(ComplexityParser::new(DEFAULT_COMPLEXITY_THRESHOLD)),
                    IssueCategory::Complexity,
                ),
            )
            .register(
                "cargo-clippy",
                ToolAdapter::new(Arc::new(RustcBlockParser), IssueCategory::Lint),
            );
        collector
    }

    pub fn register(&mut self, hook: impl Into<String>, adapter: ToolAdapter) -> &mut Self {
        self.adapters.insert(hook.into(), adapter);
        self
    }

    pub fn adapter(&self, hook: &str) -> &ToolAdapter {
        self.adapters.get(hook).unwrap_or(&self.fallback)
    }

    /// Whether `hook`'s count can drive the fix loop.
    pub fn is_countable(&self, hook: &str) -> bool {
        self.adapter(hook).countable
    }

    /// Parse one hook result. A pass is zero issues; a hook that did not finish
    /// or whose failure yields no recognizable finding has an unknown count.
    pub fn parse_result(&self, result: &HookResult) -> Result<Vec<Issue>> {
        match result.status {
            HookStatus::Passed => return Ok(Vec::new()),
            HookStatus::Failed => {}
            status => {
                return Err(ParseError::UnrecognizedOutput {
                    tool: result.hook.clone(),
                    sample: format!("hook ended {status}"),
                }
                .into())
            }
        }

        let adapter = self.adapter(&result.hook);
        let output = result.combined_output();
        let issues = adapter.parser.parse(&result.hook, &output)?;
        if issues.is_empty() {
            return Err(unrecognized(&result.hook, &output));
        }
        Ok(deduplicate(
            issues
                .into_iter()
                .map(|issue| issue.with_category(adapter.category)),
        ))
    }

    pub fn collect<'a, I>(&self, results: I) -> IssueSnapshot
    where
        I: IntoIterator<Item = &'a HookResult>,
    {
        let mut snapshot = IssueSnapshot::default();
        let mut countable = Vec::new();
        let mut manual = Vec::new();

        for result in results {
            match self.parse_result(result) {
                Ok(issues) => {
                    snapshot
                        .per_hook
                        .insert(result.hook.clone(), Some(issues.len()));
                    if self.is_countable(&result.hook) {
                        countable.extend(issues);
                    } else {
                        manual.extend(issues);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        hook = %result.hook,
                        status = %result.status,
                        error = %e,
                        "Issue count unknown, needs manual inspection"
                    );
                    snapshot.per_hook.insert(result.hook.clone(), None);
                    snapshot.unknown.insert(result.hook.clone(), e.to_string());
                }
            }
        }

        snapshot.issues = deduplicate(countable);
        snapshot.manual_review = deduplicate(manual);
        tracing::debug!(
            issues = snapshot.issues.len(),
            manual_review = snapshot.manual_review.len(),
            unknown = snapshot.unknown.len(),
            "Collected issues"
        );
        snapshot
    }
}
