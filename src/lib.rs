pub mod archive;
pub mod builder;
pub mod document;
pub mod minify;
pub mod registry;
pub mod scaffold;
pub mod sync;
pub mod vendor;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use builder::BuildOptions;
use registry::{ServerEntry, ServerRegistry};
use scaffold::BuiltinReduce;
use sync::HttpStore;
use vendor::{HttpRepository, DEFAULT_REPOSITORY};

#[derive(Parser)]
#[clap(
    name = "docship",
    version,
    about = "Assemble design documents from a directory tree and deploy them to a document database"
)]
pub struct Cli {
    /// Application root directory
    #[clap(short, long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Push all designs (and _docs documents) to one or more servers
    Push {
        /// Server short-name from servers.json, or a raw URL (repeatable)
        #[clap(short, long = "server", required = true)]
        servers: Vec<String>,

        /// Target database name
        #[clap(short, long)]
        database: String,

        /// Push only the named design (repeatable; default is every design)
        #[clap(short = 'D', long = "design")]
        designs: Vec<String>,

        /// Minify javascript attachments before upload
        #[clap(short, long)]
        minify: bool,
    },

    /// Register a server short-name in servers.json
    AddServer {
        /// Short name to register the server under
        #[clap(short, long)]
        name: String,

        /// Server URL; embedded user:pass credentials are extracted
        #[clap(short, long)]
        url: String,

        /// Authenticate as this user (prompts for the password)
        #[clap(long)]
        username: Option<String>,
    },

    /// Install vendor packages into a design's vendor/ directory
    Vendor {
        /// Packages to install
        #[clap(required = true)]
        packages: Vec<String>,

        /// Design to install into
        #[clap(short = 'D', long = "design")]
        design: String,

        /// Package repository base URL
        #[clap(long, default_value = DEFAULT_REPOSITORY)]
        repository: String,
    },

    /// Scaffold files for a new view, list, show, filter, design, document or page
    #[clap(subcommand)]
    Create(CreateCommand),
}

#[derive(Subcommand)]
pub enum CreateCommand {
    /// Create map.js and reduce.js for a view
    View {
        name: String,
        #[clap(short = 'D', long = "design")]
        design: String,
        /// Use a built-in reduce instead of the template
        #[clap(long = "builtin-reduce", value_enum)]
        builtin_reduce: Option<BuiltinReduce>,
    },
    /// Create a list function stub
    List {
        name: String,
        #[clap(short = 'D', long = "design")]
        design: String,
    },
    /// Create a show function stub
    Show {
        name: String,
        #[clap(short = 'D', long = "design")]
        design: String,
    },
    /// Create a filter function stub
    Filter {
        name: String,
        #[clap(short = 'D', long = "design")]
        design: String,
    },
    /// Create a new design document directory
    Design { name: String },
    /// Create an empty json document in _docs
    Document {
        /// Name the document (default: a fresh uuid)
        #[clap(long)]
        name: Option<String>,
    },
    /// Create an html page in a design's _attachments
    Html {
        name: String,
        #[clap(short = 'D', long = "design")]
        design: String,
    },
}

/// Async CLI entrypoint, shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Push {
            servers,
            database,
            designs,
            minify,
        } => push(&cli.root, &servers, &database, &designs, minify).await,
        Commands::AddServer {
            name,
            url,
            username,
        } => add_server(&cli.root, &name, &url, username.as_deref()),
        Commands::Vendor {
            packages,
            design,
            repository,
        } => {
            let design_dir = cli.root.join("_design").join(&design);
            if !design_dir.exists() {
                bail!("design directory {} does not exist", design_dir.display());
            }
            let repo = HttpRepository::new(repository);
            vendor::install_packages(&repo, &packages, &design_dir).await?;
            println!(
                "Installed {} package(s) into {}",
                packages.len(),
                design_dir.display()
            );
            Ok(())
        }
        Commands::Create(command) => create(&cli.root, command),
    }
}

async fn push(
    root: &Path,
    server_args: &[String],
    database: &str,
    design_filter: &[String],
    minify: bool,
) -> Result<()> {
    let registry = ServerRegistry::load(root)?;
    let servers = resolve_servers(&registry, server_args)?;

    let mut documents = build_designs(root, design_filter, minify)?;
    documents.extend(load_docs(root)?);
    if documents.is_empty() {
        bail!(
            "nothing to push: no designs under {} and no _docs",
            root.join("_design").display()
        );
    }
    info!(count = documents.len(), database, "assembled document batch");

    let store = HttpStore::new();
    println!(
        "Pushing {} document(s) to {} server(s)...",
        documents.len(),
        servers.len()
    );
    let report = sync::push(&store, &documents, database, &servers).await;
    for outcome in &report.servers {
        match &outcome.result {
            Ok(response) => println!("{}: ok {}", outcome.server, response.trim_end()),
            Err(error) => println!("{}: failed ({error})", outcome.server),
        }
    }
    if report.all_failed() {
        bail!("push failed against every configured server");
    }
    Ok(())
}

/// Turn `--server` arguments into entries: registry names resolve from the
/// store, anything else is treated as an ad-hoc URL with optional embedded
/// credentials.
fn resolve_servers(
    registry: &ServerRegistry,
    server_args: &[String],
) -> Result<BTreeMap<String, ServerEntry>> {
    let mut servers = BTreeMap::new();
    for arg in server_args {
        if let Some(entry) = registry.get(arg) {
            servers.insert(arg.clone(), entry.clone());
            continue;
        }
        let parsed = registry::split_credentials(arg)?;
        let auth = match (parsed.username.as_deref(), parsed.password.as_deref()) {
            (Some(user), Some(pass)) => Some(registry::basic_auth(user, pass)),
            (Some(user), None) => Some(registry::basic_auth(user, &prompt_password(user)?)),
            _ => None,
        };
        // Key ad-hoc servers by the credential-free url so reports and logs
        // never carry an embedded password.
        servers.insert(
            parsed.url.clone(),
            ServerEntry {
                url: parsed.url,
                auth,
            },
        );
    }
    Ok(servers)
}

fn prompt_password(username: &str) -> Result<String> {
    inquire::Password::new(&format!("Password for {username}:"))
        .without_confirmation()
        .prompt()
        .context("failed to read password")
}

/// Build every design under `{root}/_design` (or the selected subset) into
/// upload-ready JSON documents.
fn build_designs(root: &Path, design_filter: &[String], minify: bool) -> Result<Vec<Value>> {
    let designs_dir = root.join("_design");
    if !designs_dir.exists() {
        warn!(path = %designs_dir.display(), "no _design directory");
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    if design_filter.is_empty() {
        for entry in std::fs::read_dir(&designs_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !builder::IGNORED_NAMES.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names.sort();
    } else {
        names.extend(design_filter.iter().cloned());
    }

    let options = BuildOptions { minify };
    let mut documents = Vec::with_capacity(names.len());
    for name in &names {
        let design_root = designs_dir.join(name);
        let design_id = format!("_design/{name}");
        info!(design = %design_id, path = %design_root.display(), "building design");
        let document = builder::build(&design_id, &design_root, options)
            .with_context(|| format!("failed to build design {name}"))?;
        documents.push(serde_json::to_value(&document)?);
    }
    Ok(documents)
}

/// Load loose documents from `{root}/_docs/*.json`. Unparsable files are
/// reported and skipped rather than aborting the push.
fn load_docs(root: &Path) -> Result<Vec<Value>> {
    let docs_dir = root.join("_docs");
    if !docs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut documents = Vec::new();
    for entry in std::fs::read_dir(&docs_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<Value>(&content) {
            Ok(document) => documents.push(document),
            Err(error) => warn!(path = %path.display(), %error, "skipping unparsable document"),
        }
    }
    Ok(documents)
}

fn add_server(root: &Path, name: &str, url: &str, username: Option<&str>) -> Result<()> {
    let parsed = registry::split_credentials(url)?;
    let auth = match (
        username.or(parsed.username.as_deref()),
        parsed.password.as_deref(),
    ) {
        (Some(user), Some(pass)) => Some(registry::basic_auth(user, pass)),
        (Some(user), None) => Some(registry::basic_auth(user, &prompt_password(user)?)),
        _ => None,
    };

    let mut registry = ServerRegistry::load(root)?;
    registry.insert(
        name,
        ServerEntry {
            url: parsed.url.clone(),
            auth,
        },
    );
    registry.save()?;
    println!("Registered {name} -> {}", parsed.url);
    Ok(())
}

fn create(root: &Path, command: CreateCommand) -> Result<()> {
    let path = match command {
        CreateCommand::View {
            name,
            design,
            builtin_reduce,
        } => scaffold::create_view(root, &design, &name, builtin_reduce)?,
        CreateCommand::List { name, design } => {
            scaffold::create_fragment(root, &design, scaffold::FragmentKind::List, &name)?
        }
        CreateCommand::Show { name, design } => {
            scaffold::create_fragment(root, &design, scaffold::FragmentKind::Show, &name)?
        }
        CreateCommand::Filter { name, design } => {
            scaffold::create_fragment(root, &design, scaffold::FragmentKind::Filter, &name)?
        }
        CreateCommand::Design { name } => scaffold::create_design(root, &name)?,
        CreateCommand::Document { name } => scaffold::create_document(root, name.as_deref())?,
        CreateCommand::Html { name, design } => scaffold::create_html(root, &design, &name)?,
    };
    println!("Created {}", path.display());
    Ok(())
}
