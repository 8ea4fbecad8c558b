//! Payload inspection helpers used by the soft checks.

use bastion_detect::locator::percent_decode;
use serde_json::Value;

/// Argument keys whose values are treated as file paths.
const FILE_KEYS: &[&str] = &[
    "path", "file", "filename", "file_name", "filepath", "file_path", "dir", "directory", "folder",
];

/// Argument keys whose values must be version strings.
const VERSION_KEYS: &[&str] = &["version"];

/// A string value inside structured arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf<'a> {
    /// Nearest object key, if the value sits under one.
    pub key: Option<&'a str>,
    /// Display path, e.g. `arguments.files[1]`.
    pub path: String,
    pub value: &'a str,
}

impl Leaf<'_> {
    /// Returns true if the key names a path or the value looks like one.
    pub fn is_file_like(&self) -> bool {
        let keyed = self
            .key
            .is_some_and(|k| FILE_KEYS.iter().any(|f| k.eq_ignore_ascii_case(f)));
        keyed || looks_like_path(self.value)
    }

    pub fn is_version(&self) -> bool {
        self.key
            .is_some_and(|k| VERSION_KEYS.iter().any(|f| k.eq_ignore_ascii_case(f)))
    }

    /// Returns true if the value is an http(s) locator.
    pub fn is_remote_locator(&self) -> bool {
        let lower = self.value.trim_start().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

/// Collects every string value under `root`, depth first.
pub fn string_leaves<'a>(root: &'a Value, prefix: &str) -> Vec<Leaf<'a>> {
    let mut leaves = Vec::new();
    walk(root, None, prefix.to_string(), &mut leaves);
    leaves
}

fn walk<'a>(value: &'a Value, key: Option<&'a str>, path: String, out: &mut Vec<Leaf<'a>>) {
    match value {
        Value::String(s) => out.push(Leaf { key, path, value: s }),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, key, format!("{}[{}]", path, i), out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                walk(v, Some(k.as_str()), format!("{}.{}", path, k), out);
            }
        }
        _ => {}
    }
}

/// Nesting depth of `value`; scalars are depth 0.
pub fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn looks_like_path(value: &str) -> bool {
    let v = value.trim();
    let bytes = v.as_bytes();
    let drive = bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && matches!(bytes[2], b'\\' | b'/');
    v.starts_with('/')
        || v.starts_with("./")
        || v.starts_with("../")
        || v.starts_with("~/")
        || v.starts_with(".\\")
        || v.starts_with("..\\")
        || v.to_ascii_lowercase().starts_with("file:")
        || drive
}

/// Describes why `raw` is unsafe as a path, or `None` when it is fine.
///
/// Decodes twice so that double-encoded dot segments are caught.
pub fn path_problem(raw: &str) -> Option<&'static str> {
    if raw.contains('\0') {
        return Some("NUL byte in path");
    }
    let decoded = percent_decode(&percent_decode(raw));
    if decoded.contains('\0') {
        return Some("encoded NUL byte in path");
    }
    let normalized = decoded.replace('\\', "/");
    if normalized.split('/').any(|segment| segment == "..") {
        return Some("dot segment escapes the path root");
    }
    None
}

/// Accepts `latest`, `1`, `1.2`, `1.2.3`, an optional `v` prefix and
/// semver pre-release/build suffixes.
pub fn is_valid_version(value: &str) -> bool {
    if value == "latest" {
        return true;
    }
    let v = value.strip_prefix('v').unwrap_or(value);
    let (core, build) = match v.split_once('+') {
        Some((core, build)) => (core, Some(build)),
        None => (v, None),
    };
    let (numbers, pre) = match core.split_once('-') {
        Some((numbers, pre)) => (numbers, Some(pre)),
        None => (core, None),
    };

    let parts: Vec<&str> = numbers.split('.').collect();
    let numeric = (1..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 10 && p.bytes().all(|b| b.is_ascii_digit()));
    let suffix_ok = |s: Option<&str>| {
        s.map_or(true, |s| {
            !s.is_empty()
                && s.split('.')
                    .all(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'))
        })
    };
    numeric && suffix_ok(pre) && suffix_ok(build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_leaves_paths() {
        let args = json!({"path": "a.txt", "opts": {"tags": ["x", 3, "y"]}});
        let leaves = string_leaves(&args, "arguments");
        let paths: Vec<&str> = leaves.iter().map(|l| l.path.as_str()).collect();
        assert!(paths.contains(&"arguments.path"));
        assert!(paths.contains(&"arguments.opts.tags[0]"));
        assert!(paths.contains(&"arguments.opts.tags[2]"));
        assert_eq!(leaves.len(), 3);
        let tag = leaves.iter().find(|l| l.value == "y").unwrap();
        assert_eq!(tag.key, Some("tags"));
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth(&json!("x")), 0);
        assert_eq!(depth(&json!({})), 1);
        assert_eq!(depth(&json!({"a": [{"b": 1}]})), 3);
    }

    #[test]
    fn test_file_like() {
        let leaf = |key: Option<&'static str>, value: &'static str| Leaf {
            key,
            path: String::new(),
            value,
        };
        assert!(leaf(Some("path"), "notes.txt").is_file_like());
        assert!(leaf(Some("FilePath"), "notes.txt").is_file_like());
        assert!(leaf(None, "/srv/data").is_file_like());
        assert!(leaf(None, "C:\\Users").is_file_like());
        assert!(leaf(None, "file:///tmp/x").is_file_like());
        assert!(!leaf(Some("query"), "hello world").is_file_like());
    }

    #[test]
    fn test_path_problems() {
        assert_eq!(path_problem("docs/readme.md"), None);
        assert_eq!(path_problem("my..file.txt"), None);
        assert!(path_problem("../etc/passwd").is_some());
        assert!(path_problem("a\\..\\b").is_some());
        assert!(path_problem("%2e%2e/secret").is_some());
        assert!(path_problem("%252e%252e%252fsecret").is_some());
        assert!(path_problem("a\0b").is_some());
        assert!(path_problem("a%00b").is_some());
    }

    #[test]
    fn test_versions() {
        for ok in ["latest", "1", "1.2", "1.2.3", "v2.0.0", "1.0.0-rc.1", "1.0.0+build.5"] {
            assert!(is_valid_version(ok), "{}", ok);
        }
        for bad in ["", "v", "1.2.3.4", "1..2", "x.y", "1.0; rm -rf /", "1.0.0-", "../1"] {
            assert!(!is_valid_version(bad), "{}", bad);
        }
    }
}
