//! Expands command-line selections (files and directories) into the list of
//! files to upload.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Files named directly are kept as given. Directories are walked
/// recursively, skipping hidden entries; when `includes` is non-empty only
/// files whose name or path matches one of the patterns are kept.
pub fn expand_paths(inputs: &[PathBuf], includes: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let include_set = build_globset(includes)?;
    let mut out = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            out.push(input.clone());
            continue;
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if includes.is_empty() || is_included(entry.path(), &include_set) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        tracing::debug!("{} file(s) selected under {}", found.len(), input.display());
        out.extend(found);
    }
    Ok(out)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_included(path: &Path, includes: &GlobSet) -> bool {
    includes.is_match(path)
        || path
            .file_name()
            .map(|n| includes.is_match(Path::new(n)))
            .unwrap_or(false)
}
