//! Filesystem corpus scan for the CLI.
//!
//! Walks `[corpus].root`, applies include/exclude globs and the size
//! ceiling, and yields `(id, content)` pairs ordered by id. Ids are paths
//! relative to the root with `/` separators, so they stay stable across
//! machines and runs.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::SourceDocument;

/// Outcome of a scan: documents to index plus files that were left out.
#[derive(Debug, Default)]
pub struct CorpusScan {
    pub documents: Vec<SourceDocument>,
    /// Files over `max_document_bytes`.
    pub oversize: Vec<String>,
    /// Files that are not valid UTF-8 or could not be read.
    pub unreadable: Vec<String>,
}

pub fn scan_corpus(corpus: &CorpusConfig, max_document_bytes: usize) -> Result<CorpusScan> {
    let root = &corpus.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut scan = CorpusScan::default();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&id) || !include_set.is_match(&id) {
            continue;
        }

        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if len > max_document_bytes as u64 {
            tracing::info!(id = %id, bytes = len, "file exceeds size ceiling, skipping");
            scan.oversize.push(id);
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => scan.documents.push(SourceDocument { id, content }),
            Err(e) => {
                tracing::debug!(id = %id, error = %e, "skipping unreadable file");
                scan.unreadable.push(id);
            }
        }
    }

    // Sort for deterministic ordering
    scan.documents.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(scan)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus_config(root: &std::path::Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.rs".to_string()],
            exclude_globs: vec!["**/skip/**".to_string()],
            follow_symlinks: false,
        }
    }

    #[test]
    fn scan_filters_and_orders() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn a() {}").unwrap();
        fs::write(root.join("README.md"), "# readme").unwrap();
        fs::write(root.join("notes.txt"), "not included").unwrap();
        fs::write(root.join("skip/x.md"), "excluded").unwrap();
        fs::write(root.join("target/y.rs"), "build output").unwrap();

        let scan = scan_corpus(&corpus_config(root), 1024).unwrap();
        let ids: Vec<&str> = scan.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["README.md", "src/lib.rs"]);
        assert_eq!(scan.documents[1].content, "pub fn a() {}");
    }

    #[test]
    fn oversize_and_binary_files_are_reported() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("big.md"), "x".repeat(100)).unwrap();
        fs::write(root.join("bin.md"), [0xffu8, 0xfe, 0x00]).unwrap();
        fs::write(root.join("ok.md"), "fine").unwrap();

        let scan = scan_corpus(&corpus_config(root), 50).unwrap();
        assert_eq!(scan.documents.len(), 1);
        assert_eq!(scan.oversize, vec!["big.md".to_string()]);
        assert_eq!(scan.unreadable, vec!["bin.md".to_string()]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = scan_corpus(&corpus_config(&tmp.path().join("nope")), 10).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
