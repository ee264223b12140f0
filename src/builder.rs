//! Fold a design directory into a [`Document`].
//!
//! The walk mirrors the on-disk layout conventions: `views/`, `lists/`,
//! `shows/` and `filters/` hold named code fragments, `_attachments/` holds
//! base64-encoded assets, and everything else is carried as literal text
//! fields at the nested location given by its path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, warn};

use crate::document::{Attachment, DocValue, Document};
use crate::minify;

/// Names excluded from traversal and file collection, at any depth.
pub const IGNORED_NAMES: [&str; 5] = [".DS_Store", ".cvs", ".svn", ".hg", ".git"];

/// Directories whose direct and nested files are code fragments: their keys
/// drop a trailing `.js` suffix.
const FRAGMENT_DIRS: [&str; 4] = ["views", "lists", "shows", "filters"];

const ATTACHMENTS_SEGMENT: &str = "_attachments";

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Run the best-effort minifier over `application/javascript` attachments.
    pub minify: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Walk `design_root` depth-first and assemble the design document named by
/// `design_id` (e.g. `_design/myapp`).
pub fn build(
    design_id: &str,
    design_root: &Path,
    options: BuildOptions,
) -> Result<Document, BuildError> {
    let mut document = Document::new(design_id);
    visit_dir(design_root, design_root, &[], options, &mut document)?;
    Ok(document)
}

fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name)
}

fn visit_dir(
    dir: &Path,
    design_root: &Path,
    segments: &[String],
    options: BuildOptions,
    document: &mut Document,
) -> Result<(), BuildError> {
    let mut entries = BTreeMap::new();
    let in_attachments = segments.iter().any(|s| s == ATTACHMENTS_SEGMENT);

    let read_dir = std::fs::read_dir(dir).map_err(|source| BuildError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in read_dir {
        let entry = entry.map_err(|source| BuildError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored(&name) {
            debug!(path = %path.display(), "ignoring entry");
            continue;
        }

        if path.is_dir() {
            let mut child_segments = segments.to_vec();
            child_segments.push(name);
            visit_dir(&path, design_root, &child_segments, options, document)?;
        } else if in_attachments {
            let (key, attachment) = read_attachment(&path, &name, segments, options)?;
            document.insert_attachment(key, attachment);
        } else {
            let content = read_text(&path)?;
            let key = fragment_key(&name, segments);
            entries.insert(key, DocValue::Text(content));
        }
    }

    if !entries.is_empty() {
        document.merge_at(segments, entries);
    }
    Ok(())
}

/// Key for a plain file: inside `views`/`lists`/`shows`/`filters` the
/// trailing `.js` suffix is dropped, elsewhere the literal filename is kept.
fn fragment_key(name: &str, segments: &[String]) -> String {
    let is_fragment = segments
        .first()
        .is_some_and(|first| FRAGMENT_DIRS.contains(&first.as_str()));
    if is_fragment {
        name.strip_suffix(".js").unwrap_or(name).to_string()
    } else {
        name.to_string()
    }
}

/// Read one file under `_attachments`: the key is the `/`-joined relative
/// path with the `_attachments` segment itself stripped.
fn read_attachment(
    path: &Path,
    name: &str,
    segments: &[String],
    options: BuildOptions,
) -> Result<(String, Attachment), BuildError> {
    let mut key_segments: Vec<&str> = Vec::with_capacity(segments.len());
    let mut stripped = false;
    for segment in segments {
        if !stripped && segment == ATTACHMENTS_SEGMENT {
            stripped = true;
            continue;
        }
        key_segments.push(segment);
    }
    key_segments.push(name);
    let key = key_segments.join("/");

    let content_type = match mime_guess::from_path(path).first() {
        Some(mime) => mime.essence_str().to_string(),
        None => {
            warn!(file = name, "assuming text/plain mime type");
            "text/plain".to_string()
        }
    };

    let bytes = std::fs::read(path).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let data = if options.minify && content_type == "application/javascript" {
        match minify::minify_js(&String::from_utf8_lossy(&bytes)) {
            Ok(minified) => BASE64.encode(minified.as_bytes()),
            Err(error) => {
                debug!(file = name, %error, "could not minify, uploading expanded version");
                BASE64.encode(&bytes)
            }
        }
    } else {
        BASE64.encode(&bytes)
    };

    Ok((
        key,
        Attachment {
            data,
            content_type,
        },
    ))
}

/// Files outside `_attachments` are text by convention; bytes that are not
/// valid UTF-8 are decoded lossily rather than rejected.
fn read_text(path: &Path) -> Result<String, BuildError> {
    let bytes = std::fs::read(path).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
