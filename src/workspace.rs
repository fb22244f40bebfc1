//! Workspace identity: path normalization and key derivation.
//!
//! The canon form and the derived key are a cross-process, cross-language
//! contract. Two invocations pointing at the same directory must land on the
//! same 32-hex-char key regardless of separator direction, ASCII case,
//! trailing slashes, or Unicode composition of the input.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkspacePathError {
    #[error("invalid workspace path: empty or whitespace-only")]
    EmptyInput,

    #[error("invalid workspace path: contains a null byte")]
    NullByte,

    #[error("invalid workspace path: cannot resolve relative path: {0}")]
    Unresolvable(String),
}

/// Normalized workspace path.
///
/// Invariants: lowercase, forward slashes only, NFC, drive roots carry a
/// trailing `/` (`c:/`), UNC share roots and all other paths do not.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonPath(String);

impl CanonPath {
    /// Run the normalization pipeline. Idempotent: normalizing a canon path
    /// returns it unchanged.
    pub fn normalize(input: &str) -> Result<Self, WorkspacePathError> {
        if input.trim().is_empty() {
            return Err(WorkspacePathError::EmptyInput);
        }
        if input.contains('\0') {
            return Err(WorkspacePathError::NullByte);
        }

        let absolute = absolutize(input)?;
        let slashed = absolute.replace('\\', "/");
        let clamped = clamp_leading_separators(&slashed);
        let composed: String = clamped.nfc().collect();
        let lowered = composed.to_lowercase();
        Ok(Self(apply_trailing_rules(lowered)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CanonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanonPath({:?})", self.0)
    }
}

impl fmt::Display for CanonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workspace instance identity: first 32 hex chars of
/// `sha256(utf8(canon_path))`, lowercase.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceKey(String);

impl WorkspaceKey {
    pub const LEN: usize = 32;

    /// Normalize `path` and derive its key.
    pub fn compute(path: &str) -> Result<Self, WorkspacePathError> {
        Ok(Self::from_canon(&CanonPath::normalize(path)?))
    }

    pub fn from_canon(canon: &CanonPath) -> Self {
        let digest = Sha256::digest(canon.as_str().as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(Self::LEN);
        Self(hex)
    }

    /// Accept an externally supplied key, enforcing the `[a-f0-9]{32}` shape.
    pub fn parse(s: &str) -> Option<Self> {
        if is_valid_key(s) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkspaceKey({})", self.0)
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase-hex key shape shared with the envelope validator.
pub fn is_valid_key(s: &str) -> bool {
    s.len() == WorkspaceKey::LEN
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// =============================================================================
// Normalization pipeline internals
// =============================================================================

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Drive-letter prefix: ASCII letter followed by `:`.
fn drive_prefix(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => Some(letter),
        _ => None,
    }
}

fn starts_with_two_separators(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(a), Some(b)) if is_separator(a) && is_separator(b)
    )
}

/// Resolve to an absolute path. Windows-style inputs (drive letters, UNC)
/// are recognized lexically so keys stay byte-stable across hosts; `.` and
/// `..` segments are removed, `..` never pops past the root.
fn absolutize(input: &str) -> Result<String, WorkspacePathError> {
    let (root, rest) = if starts_with_two_separators(input) {
        ("//".to_string(), &input[2..])
    } else if let Some(letter) = drive_prefix(input) {
        (format!("{letter}:"), &input[2..])
    } else if input.starts_with(is_separator) {
        ("/".to_string(), &input[1..])
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| WorkspacePathError::Unresolvable(e.to_string()))?;
        let cwd = cwd.to_string_lossy().into_owned();
        let joined = format!("{cwd}/{input}");
        return absolutize(&joined);
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split(is_separator) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = root;
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 || !out.ends_with(is_separator) {
            out.push('/');
        }
        out.push_str(segment);
    }
    Ok(out)
}

/// A leading run of 3 or more separators collapses to exactly `//`. Guards
/// UNC edge cases where the resolver may emit extra leading separators.
fn clamp_leading_separators(s: &str) -> String {
    let leading = s.chars().take_while(|c| *c == '/').count();
    if leading >= 3 {
        format!("//{}", &s[leading..])
    } else {
        s.to_string()
    }
}

/// UNC share root: begins with `//` and the remainder splits into exactly
/// two non-empty segments.
fn is_unc_share_root(s: &str) -> bool {
    let Some(rest) = s.strip_prefix("//") else {
        return false;
    };
    let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
    parts.len() == 2 && parts.iter().all(|p| !p.is_empty())
}

fn apply_trailing_rules(mut s: String) -> String {
    if is_unc_share_root(&s) {
        while s.len() > 2 && s.ends_with('/') {
            s.pop();
        }
        return s;
    }
    if s.len() == 2 && s.ends_with(':') {
        s.push('/');
        return s;
    }
    if s.len() > 3 && s.ends_with('/') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(input: &str) -> String {
        CanonPath::normalize(input).expect("normalize").0
    }

    fn key(input: &str) -> String {
        WorkspaceKey::compute(input).expect("key").0
    }

    #[test]
    fn rejects_empty_and_whitespace_and_null() {
        assert_eq!(
            CanonPath::normalize(""),
            Err(WorkspacePathError::EmptyInput)
        );
        assert_eq!(
            CanonPath::normalize("   "),
            Err(WorkspacePathError::EmptyInput)
        );
        assert_eq!(
            CanonPath::normalize("/tmp/a\0b"),
            Err(WorkspacePathError::NullByte)
        );
    }

    #[test]
    fn windows_path_canon_form() {
        // W1
        assert_eq!(canon(r"C:\Projects\MyApp"), "c:/projects/myapp");
    }

    #[test]
    fn key_is_stable_across_input_spellings() {
        // W1: all spellings of the same directory agree
        let expected = key(r"C:\Projects\MyApp");
        assert_eq!(key("c:/projects/myapp"), expected);
        assert_eq!(key("C:/Projects/MyApp/"), expected);
        assert_eq!(key(r"c:\projects\myapp\"), expected);
    }

    #[test]
    fn key_matches_sha256_of_canon() {
        let digest = Sha256::digest("c:/projects/myapp".as_bytes());
        let full = hex::encode(digest);
        assert_eq!(key(r"C:\Projects\MyApp"), full[..32]);
    }

    #[test]
    fn key_shape() {
        let k = key("/home/someone/art");
        assert_eq!(k.len(), 32);
        assert!(k.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert!(WorkspaceKey::parse(&k).is_some());
    }

    #[test]
    fn parse_rejects_uppercase_and_wrong_length() {
        assert!(WorkspaceKey::parse("88B49A59944589BD4779B7931D127ABC").is_none());
        assert!(WorkspaceKey::parse("88b49a59944589bd4779b7931d127ab").is_none());
        assert!(WorkspaceKey::parse("zz49a59944589bd4779b7931d127abcd").is_none());
    }

    #[test]
    fn normalize_is_idempotent() {
        // W2
        for input in [
            r"C:\Projects\MyApp",
            "/home/user/stuff/",
            r"\\Server\Share",
            "C:",
            "/home/user/Ünïcode",
        ] {
            let once = canon(input);
            assert_eq!(canon(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn drive_root_variants_agree() {
        // W3
        assert_eq!(canon("C:"), "c:/");
        assert_eq!(canon(r"C:\"), "c:/");
        assert_eq!(canon("C:/"), "c:/");
        assert_eq!(key("C:"), key(r"C:\"));
        assert_eq!(key("C:"), key("C:/"));
    }

    #[test]
    fn unc_share_root_has_no_trailing_slash() {
        // W4
        assert_eq!(canon(r"\\Server\Share"), "//server/share");
        assert_eq!(canon(r"\\Server\Share\"), "//server/share");
        assert_eq!(canon("//server/share/"), "//server/share");
        assert_eq!(key(r"\\SERVER\SHARE"), key("//server/share"));
    }

    #[test]
    fn unc_below_share_root_strips_trailing_slash() {
        assert_eq!(canon(r"\\server\share\sub\"), "//server/share/sub");
    }

    #[test]
    fn leading_separator_runs_clamp_to_two() {
        assert_eq!(canon(r"\\\\server\share"), "//server/share");
        assert_eq!(canon("////server/share"), "//server/share");
    }

    #[test]
    fn dot_and_dotdot_segments_resolve() {
        assert_eq!(canon(r"C:\a\.\b\..\c"), "c:/a/c");
        assert_eq!(canon("/a/b/../../c"), "/c");
        // `..` never escapes the root
        assert_eq!(canon("/../a"), "/a");
        assert_eq!(canon(r"C:\..\a"), "c:/a");
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let cwd = std::env::current_dir().expect("cwd");
        let expected = canon(&format!("{}/sub", cwd.to_string_lossy()));
        assert_eq!(canon("sub"), expected);
        assert_eq!(canon("./sub"), expected);
    }

    #[test]
    fn nfc_composition_applies_before_hashing() {
        // W5: decomposed e + combining acute vs precomposed é
        let decomposed = "/home/ve\u{0301}ro";
        let composed = "/home/v\u{e9}ro";
        assert_eq!(canon(decomposed), canon(composed));
        assert_eq!(key(decomposed), key(composed));
    }

    #[test]
    fn ascii_case_insensitive() {
        assert_eq!(key("/Home/User/ART"), key("/home/user/art"));
    }

    #[test]
    fn trailing_slash_insensitive_for_non_roots() {
        assert_eq!(key("/home/user/art/"), key("/home/user/art"));
        assert_eq!(key("C:/Projects/"), key("C:/Projects"));
    }

    #[test]
    fn slash_direction_insensitive() {
        assert_eq!(key(r"C:\a\b"), key("C:/a/b"));
    }

    #[test]
    fn unix_root_is_preserved() {
        assert_eq!(canon("/"), "/");
    }
}
