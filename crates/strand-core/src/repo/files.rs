//! Source-tree listing and the commit-time file reader.
//!
//! File order is the traversal order and defines the stream concatenation,
//! so listing is deterministic (sorted walk). Symlinks whose resolved target
//! escapes the source root are dropped at list time.

use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use walkdir::WalkDir;

/// One entry of a version's file list.
///
/// During listing `path` is absolute; it is rewritten root-relative with
/// forward slashes before being persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub path: String,
    pub size: i64,
    pub link: Option<String>,
}

/// Walk `root` in sorted order, producing regular files and cleaned
/// symlinks. Unreadable entries and out-of-root symlinks are warned about
/// and skipped.
pub fn list_files(root: &Path) -> Vec<File> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        if entry.path_is_symlink() {
            match clean_symlink(root, entry.path()) {
                Ok(file) => files.push(file),
                Err(reason) => warn!(path = %entry.path().display(), reason, "skipping symlink"),
            }
            continue;
        }
        let size = match entry.metadata() {
            Ok(meta) => meta.len() as i64,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unstatable file");
                continue;
            }
        };
        files.push(File {
            path: entry.path().to_string_lossy().into_owned(),
            size,
            link: None,
        });
    }
    files
}

/// Resolve a symlink against the source root.
///
/// Absolute targets must point inside the root and are rewritten
/// root-relative; relative targets are kept relative to the link's
/// directory. Escaping or empty targets are rejected.
fn clean_symlink(root: &Path, path: &Path) -> Result<File, &'static str> {
    let dir = path.parent().unwrap_or(root);
    let target = std::fs::read_link(path).map_err(|_| "unreadable link target")?;
    let is_abs = target.is_absolute();
    let resolved = if is_abs {
        normalize(&target)
    } else {
        normalize(&dir.join(&target))
    };
    if !resolved.starts_with(root) {
        return Err("target escapes the source root");
    }
    let link = if is_abs {
        resolved
            .strip_prefix(root)
            .map_err(|_| "target escapes the source root")?
            .to_path_buf()
    } else {
        relative_to(&normalize(dir), &resolved)
    };
    let link = slash_path(&link);
    if link.is_empty() {
        return Err("empty link target");
    }
    Ok(File {
        path: path.to_string_lossy().into_owned(),
        size: 0,
        link: Some(link),
    })
}

/// Lexical path cleaning, without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Path from `from` (a directory) to `to`, both lexically normalized.
fn relative_to(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push(Component::ParentDir);
    }
    for component in &to[common..] {
        out.push(component);
    }
    out
}

/// Persisted paths always use forward slashes.
fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

/// Strip the source prefix from every listed path, yielding the
/// forward-slash relative form stored in the repository.
pub(crate) fn unprefix_files(files: Vec<File>, root: &Path) -> Vec<File> {
    files
        .into_iter()
        .filter_map(|mut file| {
            let stripped = match Path::new(&file.path).strip_prefix(root) {
                Ok(relative) => slash_path(relative),
                Err(_) => {
                    warn!(path = %file.path, "path outside source root dropped from list");
                    return None;
                }
            };
            file.path = stripped;
            Some(file)
        })
        .collect()
}

/// Stream the content of every regular file into `stream`, in list order.
///
/// Files that fail to open are dropped from the returned list; short reads
/// keep the file with its actual size. A dead stream (the matcher bailed)
/// stops the walk early.
pub(crate) fn concat_files(files: Vec<File>, mut stream: impl Write) -> Vec<File> {
    let mut actual = Vec::with_capacity(files.len());
    let mut remaining = files.into_iter();
    let mut buf = vec![0u8; 64 * 1024];
    'outer: for mut file in remaining.by_ref() {
        if file.link.is_some() {
            actual.push(file);
            continue;
        }
        let mut source = match std::fs::File::open(&file.path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %file.path, error = %e, "dropping unreadable file");
                continue;
            }
        };
        let mut copied: i64 = 0;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(path = %file.path, copied, error = %e, "short read");
                    break;
                }
            };
            if let Err(e) = stream.write_all(&buf[..n]) {
                error!(error = %e, "stream closed mid-commit");
                actual.push(file);
                break 'outer;
            }
            copied += n as i64;
        }
        // The recorded size must match what actually entered the stream.
        file.size = copied;
        actual.push(file);
    }
    actual.extend(remaining);
    actual
}
