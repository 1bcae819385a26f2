//! Filesystem primitives for the coordination contract: atomic rewrites via
//! `*.tmp` + rename, append-only JSONL, and tolerant JSONL reading.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Write `value` as pretty JSON atomically: stage to `<path>.tmp`, then
/// rename into place. Readers never observe a torn file.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    atomic_write_string(path, &json)
}

/// Atomically replace `path` with `contents`.
pub fn atomic_write_string(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Read a JSON file. Returns `None` when the file is missing or unparseable
/// (unparseable is logged — corrupt state is reported, not propagated).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unparseable json file");
            None
        }
    }
}

/// Append one record as a single JSONL line. The write is a single
/// line-buffered call so concurrent appenders interleave at line boundaries.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())
}

/// Read every parseable record from a JSONL file.
///
/// Empty and malformed lines are skipped with a warning; a partial trailing
/// line (a writer mid-append) parses as malformed and is skipped silently at
/// debug level on the last line.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = text.lines().collect();
    let last = lines.len().saturating_sub(1);
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(v) => out.push(v),
            Err(e) if i == last && !text.ends_with('\n') => {
                debug!(path = %path.display(), "ignoring partial trailing line: {e}");
            }
            Err(e) => {
                warn!(path = %path.display(), line = i + 1, error = %e, "skipping malformed jsonl line");
            }
        }
    }
    out
}

/// Rewrite a JSONL file atomically with the given records.
pub fn rewrite_jsonl<T: Serialize>(path: &Path, records: &[T]) -> std::io::Result<()> {
    let mut buf = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    atomic_write_string(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        n: u32,
        tag: String,
    }

    #[test]
    fn jsonl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        for n in 0..3 {
            append_jsonl(&path, &Rec { n, tag: format!("t{n}") }).unwrap();
        }
        let back: Vec<Rec> = read_jsonl(&path);
        assert_eq!(back.len(), 3);
        assert_eq!(back[2], Rec { n: 2, tag: "t2".into() });
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1,\"tag\":\"a\"}\nnot json\n\n{\"n\":2,\"tag\":\"b\"}\n").unwrap();
        let back: Vec<Rec> = read_jsonl(&path);
        assert_eq!(back.len(), 2);
    }

    #[test]
    fn partial_trailing_line_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"n\":1,\"tag\":\"a\"}\n{\"n\":2,\"ta").unwrap();
        let back: Vec<Rec> = read_jsonl(&path);
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn atomic_write_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        atomic_write_json(&path, &Rec { n: 7, tag: "x".into() }).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        let back: Rec = read_json(&path).unwrap();
        assert_eq!(back.n, 7);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_jsonl(&path, &Rec { n: 1, tag: "a".into() }).unwrap();
        append_jsonl(&path, &Rec { n: 2, tag: "b".into() }).unwrap();
        rewrite_jsonl(&path, &[Rec { n: 9, tag: "z".into() }]).unwrap();
        let back: Vec<Rec> = read_jsonl(&path);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].n, 9);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let back: Vec<Rec> = read_jsonl(&dir.path().join("nope.jsonl"));
        assert!(back.is_empty());
    }
}
