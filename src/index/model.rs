//! Index document schema and entry triage.
//!
//! The index is writer-owned and forward-compatible: unknown fields are
//! ignored, and a malformed entry never poisons its neighbors. Each item is
//! deserialized independently so triage can count skips per entry.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::{Iso8601, Rfc3339};

/// Top-level index document. `items` stays raw so per-entry triage can skip
/// malformed elements without failing the whole document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawIndex {
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    files: Vec<Value>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default)]
    preset_id: Option<String>,
    #[serde(default)]
    elapsed_seconds: Option<f64>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    favorite: Option<bool>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    size_bytes: Option<u64>,
}

/// Artifact kind. Input is lowercased before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Image,
    Video,
}

impl JobKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "image" => Some(JobKind::Image),
            "video" => Some(JobKind::Video),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Image => "image",
            JobKind::Video => "video",
        }
    }
}

/// One displayable generation job, projected from a valid index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub job_id: String,
    pub created_at: OffsetDateTime,
    pub kind: JobKind,
    /// Valid file references only; never empty.
    pub files: Vec<FileRef>,
    pub seed: i64,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub preset_id: String,
    pub elapsed_seconds: Option<f64>,
    pub tags: Vec<String>,
    pub favorite: bool,
    pub notes: String,
}

/// A produced artifact file, relative to the workspace outputs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub relative_path: String,
    /// 64 hex chars, stored lowercase.
    pub sha256: String,
    pub content_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: Option<u64>,
}

/// `schema_version` parsed from its `"major.minor"` string form.
///
/// Missing or unparseable components default to `(0, 1)`: major 0 is the
/// best-effort era and minor 1 the first cut of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self { major: 0, minor: 1 };
        };
        let mut parts = raw.splitn(2, '.');
        let major = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(1);
        Self { major, minor }
    }

    /// Major 0 is best-effort; anything newer requires a viewer upgrade.
    pub fn is_supported(self) -> bool {
        self.major < 1
    }
}

/// Result of per-entry triage, in file (append) order.
#[derive(Debug, Default)]
pub struct ParsedItems {
    pub valid: Vec<JobRow>,
    pub skipped: usize,
}

/// Validate every raw item. Invalid entries are skipped and counted, valid
/// ones keep their file order.
pub fn parse_items(items: &[Value]) -> ParsedItems {
    let mut out = ParsedItems::default();
    for item in items {
        match parse_item(item) {
            Some(row) => out.valid.push(row),
            None => out.skipped += 1,
        }
    }
    out
}

fn parse_item(item: &Value) -> Option<JobRow> {
    let raw: RawItem = serde_json::from_value(item.clone()).ok()?;

    let job_id = raw.job_id.filter(|id| !id.is_empty())?;
    let created_at = parse_timestamp(raw.created_at.as_deref()?)?;
    let kind = JobKind::parse(raw.kind.as_deref()?)?;
    let seed = raw.seed?;

    let files: Vec<FileRef> = raw
        .files
        .iter()
        .filter_map(parse_file)
        .collect();
    if files.is_empty() {
        return None;
    }

    Some(JobRow {
        job_id,
        created_at,
        kind,
        files,
        seed,
        prompt: raw.prompt.unwrap_or_else(|| "(no prompt)".to_string()),
        negative_prompt: raw.negative_prompt,
        preset_id: raw.preset_id.unwrap_or_else(|| "unknown".to_string()),
        elapsed_seconds: raw.elapsed_seconds,
        tags: raw.tags.unwrap_or_default(),
        favorite: raw.favorite.unwrap_or(false),
        notes: raw.notes.unwrap_or_default(),
    })
}

fn parse_file(file: &Value) -> Option<FileRef> {
    let raw: RawFile = serde_json::from_value(file.clone()).ok()?;
    let path = raw.path.filter(|p| is_safe_relative_path(p))?;
    let sha = raw.sha256.filter(|s| is_sha256_hex(s))?;
    Some(FileRef {
        relative_path: path,
        sha256: sha.to_ascii_lowercase(),
        content_type: raw.content_type,
        width: raw.width,
        height: raw.height,
        size_bytes: raw.size_bytes,
    })
}

/// Non-empty, not rooted, and free of `..` segments in either separator
/// convention.
fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return false;
    }
    let mut chars = path.chars();
    if let (Some(letter), Some(':')) = (chars.next(), chars.next())
        && letter.is_ascii_alphabetic()
    {
        return false;
    }
    path.split(['/', '\\']).all(|segment| segment != "..")
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Accepts RFC 3339 first (the writer's format), then general ISO 8601.
pub(crate) fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, &Iso8601::DEFAULT))
        .ok()
}
