//! File generators for new application pieces.
//!
//! Every generator works from immutable template constants and writes under
//! the application root, creating intermediate directories as needed. All of
//! them refuse to run when the root itself does not exist.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

const VIEW_MAP_TEMPLATE: &str = "function(doc){\n  emit(null, 1)\n}\n";
const VIEW_REDUCE_TEMPLATE: &str = "function(key, values, rereduce){\n\n}\n";
const FRAGMENT_TEMPLATE: &str = "function(doc, req){\n\n}\n";
const HTML_TEMPLATE: &str =
    "<html><head><title>REPLACE</title></head><body><h1>REPLACE</h1></body></html>\n";

#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    #[error("application directory {path} does not exist")]
    MissingRoot { path: PathBuf },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Built-in server-side reducers that replace the reduce.js template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BuiltinReduce {
    Sum,
    Count,
    Stats,
}

impl BuiltinReduce {
    fn as_reduce(&self) -> &'static str {
        match self {
            BuiltinReduce::Sum => "_sum",
            BuiltinReduce::Count => "_count",
            BuiltinReduce::Stats => "_stats",
        }
    }
}

/// Code fragment kinds that live in their own design subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    List,
    Show,
    Filter,
}

impl FragmentKind {
    fn dir_name(&self) -> &'static str {
        match self {
            FragmentKind::List => "lists",
            FragmentKind::Show => "shows",
            FragmentKind::Filter => "filters",
        }
    }
}

fn ensure_root(root: &Path) -> Result<(), ScaffoldError> {
    if root.exists() {
        Ok(())
    } else {
        Err(ScaffoldError::MissingRoot {
            path: root.to_path_buf(),
        })
    }
}

fn create_dir(path: &Path) -> Result<(), ScaffoldError> {
    debug!(path = %path.display(), "creating directory");
    std::fs::create_dir_all(path).map_err(|source| ScaffoldError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), ScaffoldError> {
    std::fs::write(path, content).map_err(|source| ScaffoldError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `views/{name}/map.js` and `reduce.js` for a design. A builtin
/// reducer writes its marker (`_sum` etc.) instead of the reduce template.
pub fn create_view(
    root: &Path,
    design: &str,
    name: &str,
    builtin: Option<BuiltinReduce>,
) -> Result<PathBuf, ScaffoldError> {
    ensure_root(root)?;
    let view_dir = root.join("_design").join(design).join("views").join(name);
    create_dir(&view_dir)?;
    write_file(&view_dir.join("map.js"), VIEW_MAP_TEMPLATE)?;
    match builtin {
        Some(reduce) => write_file(&view_dir.join("reduce.js"), reduce.as_reduce())?,
        None => write_file(&view_dir.join("reduce.js"), VIEW_REDUCE_TEMPLATE)?,
    }
    info!(path = %view_dir.display(), "created view");
    Ok(view_dir)
}

/// Create a named list/show/filter stub (`lists/{name}.js`, …).
pub fn create_fragment(
    root: &Path,
    design: &str,
    kind: FragmentKind,
    name: &str,
) -> Result<PathBuf, ScaffoldError> {
    ensure_root(root)?;
    let dir = root.join("_design").join(design).join(kind.dir_name());
    create_dir(&dir)?;
    let file = dir.join(format!("{name}.js"));
    write_file(&file, FRAGMENT_TEMPLATE)?;
    info!(path = %file.display(), "created {}", kind.dir_name());
    Ok(file)
}

/// Create the skeleton of a new design document directory.
pub fn create_design(root: &Path, name: &str) -> Result<PathBuf, ScaffoldError> {
    ensure_root(root)?;
    let design_dir = root.join("_design").join(name);
    create_dir(&design_dir.join("views"))?;
    create_dir(&design_dir.join("_attachments"))?;
    info!(path = %design_dir.display(), "created design");
    Ok(design_dir)
}

/// Create an empty document (just an `_id`) in `_docs`. Unnamed documents
/// get a fresh UUID as both filename and id.
pub fn create_document(root: &Path, name: Option<&str>) -> Result<PathBuf, ScaffoldError> {
    ensure_root(root)?;
    let docs_dir = root.join("_docs");
    create_dir(&docs_dir)?;
    let id = match name {
        Some(name) => name.to_string(),
        None => Uuid::new_v4().to_string(),
    };
    let file = docs_dir.join(format!("{id}.json"));
    let body = serde_json::json!({ "_id": id });
    write_file(&file, &body.to_string())?;
    info!(path = %file.display(), "created document");
    Ok(file)
}

/// Create an HTML page in a design's `_attachments`, titled after the name.
pub fn create_html(root: &Path, design: &str, name: &str) -> Result<PathBuf, ScaffoldError> {
    ensure_root(root)?;
    let dir = root.join("_design").join(design).join("_attachments");
    create_dir(&dir)?;
    let stem = name.split(".htm").next().unwrap_or(name);
    let file = dir.join(format!("{stem}.html"));
    write_file(&file, &HTML_TEMPLATE.replace("REPLACE", &title_case(stem)))?;
    info!(path = %file.display(), "created html page");
    Ok(file)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
