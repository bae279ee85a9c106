//! docrepo - command-line access to document repositories.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use docrepo::binary::BinaryError;
use docrepo::config::{ConfigError, RegistryConfig, RepositoryConfig};
use docrepo::model::{acl, PropertyType, PropertyValue, SchemaError, FILE_TYPE, FOLDER_TYPE};
use docrepo::pool::PoolError;
use docrepo::repository::DEFAULT_REPOSITORY_NAME;
use docrepo::storage::InvalidNameError;
use docrepo::{
    DocRef, DocumentModel, NodeId, RegistryError, Repository, RepositoryRegistry, Session, SessionError,
    StorageError,
};

const DEFAULT_PATH: &str = ".docrepo";

#[derive(Parser)]
#[command(name = "docrepo")]
#[command(about = "Hierarchical document repositories stored in git")]
#[command(version)]
struct Cli {
    /// Registry configuration file (TOML)
    #[arg(short, long, conflicts_with = "path")]
    config: Option<PathBuf>,

    /// Single repository at this path, used when no config is given
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Repository to use, the default one otherwise
    #[arg(short, long)]
    repository: Option<String>,

    /// Principal the session acts as
    #[arg(short, long, default_value = acl::SYSTEM)]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the configured repositories
    Init,
    /// List the children of a document
    Ls {
        #[arg(default_value = "/")]
        reference: String,
    },
    /// Show a document and its properties
    Show { reference: String },
    /// Create a folder
    Mkdir {
        path: String,
        /// Create missing parents as well
        #[arg(short, long)]
        parents: bool,
        #[arg(long = "type", default_value = FOLDER_TYPE)]
        doc_type: String,
    },
    /// Create or update a document
    Put {
        path: String,
        /// File to store as the document content
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(long = "type", default_value = FILE_TYPE)]
        doc_type: String,
        /// Property assignment, e.g. `--set dc:description=notes`
        #[arg(long = "set", value_parser = parse_assignment)]
        properties: Vec<(String, String)>,
    },
    /// Remove a document and everything below it
    Rm { reference: String },
    /// Move a document under another parent
    Mv {
        reference: String,
        parent: String,
        /// New name, the current one otherwise
        #[arg(long)]
        name: Option<String>,
    },
    /// Show repository statistics
    Stats,
    /// Show the commit history
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Store a file in the binary store and print its digest
    StoreBlob { file: PathBuf },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Usage(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let registry = RepositoryRegistry::from_config(&config)?;
    let result = execute(cli, &registry);
    registry.shutdown();
    result
}

/// The config file, or a single default repository at `--path`.
///
/// Only `init` creates repositories that do not exist yet.
fn load_config(cli: &Cli) -> Result<RegistryConfig, CliError> {
    let create = matches!(cli.command, Command::Init);
    let mut config = match (&cli.config, &cli.path) {
        (Some(file), _) => RegistryConfig::from_file(file)?,
        (None, path) => {
            let path = path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_PATH));
            RegistryConfig::new().repository(RepositoryConfig::new(DEFAULT_REPOSITORY_NAME, path).default(true))
        }
    };
    for repository in &mut config.repositories {
        repository.create = create;
    }
    debug!(repositories = config.repositories.len(), "configuration loaded");
    Ok(config)
}

fn execute(cli: &Cli, registry: &RepositoryRegistry) -> Result<(), CliError> {
    if let Command::Init = cli.command {
        for repo in registry.repositories() {
            println!("{}\t{}", repo.name(), repo.path().display());
        }
        return Ok(());
    }

    let repo = match &cli.repository {
        Some(name) => registry.get_repository(name)?,
        None => registry.get_default_repository()?,
    };

    match &cli.command {
        Command::Init => Ok(()),
        Command::Stats => print_stats(&repo),
        Command::History { limit } => print_history(&repo, *limit),
        Command::StoreBlob { file } => {
            let reader = File::open(file).map_err(|source| io_error(file, source))?;
            let binary = repo.binaries().store_reader(reader)?;
            println!("{}\t{} bytes", binary.digest.to_hex(), binary.length);
            Ok(())
        }
        Command::Ls { reference } => {
            let mut session = repo.open_session(&cli.user)?;
            for child in session.get_children(doc_ref(reference)?)? {
                let marker = if child.is_folder(repo.schemas()) { "/" } else { "" };
                println!("{:<10} {}{}", child.doc_type(), child.name(), marker);
            }
            Ok(())
        }
        Command::Show { reference } => {
            let mut session = repo.open_session(&cli.user)?;
            let doc = session.get_document(doc_ref(reference)?)?;
            print_document(&doc)
        }
        Command::Mkdir { path, parents, doc_type } => {
            let mut session = repo.open_session(&cli.user)?;
            let doc = make_folder(&mut session, path, doc_type, *parents)?;
            session.commit()?;
            println!("{}", doc.id());
            Ok(())
        }
        Command::Put {
            path,
            file,
            title,
            doc_type,
            properties,
        } => {
            let mut session = repo.open_session(&cli.user)?;
            let mut values = BTreeMap::new();
            if let Some(title) = title {
                values.insert("dc:title".to_string(), PropertyValue::from(title.as_str()));
            }
            for (xpath, raw) in properties {
                values.insert(xpath.clone(), parse_property(&repo, doc_type, xpath, raw)?);
            }
            if let Some(file) = file {
                let reader = File::open(file).map_err(|source| io_error(file, source))?;
                let mut binary = repo.binaries().store_reader(reader)?;
                if let Some(name) = file.file_name() {
                    binary = binary.with_filename(name.to_string_lossy());
                }
                values.insert("file:content".to_string(), PropertyValue::Binary(binary));
            }

            let doc = put_document(&mut session, path, doc_type, values)?;
            session.commit()?;
            println!("{}", doc.id());
            Ok(())
        }
        Command::Rm { reference } => {
            let mut session = repo.open_session(&cli.user)?;
            session.remove_document(doc_ref(reference)?)?;
            session.commit()?;
            Ok(())
        }
        Command::Mv { reference, parent, name } => {
            let mut session = repo.open_session(&cli.user)?;
            let doc = session.move_document(doc_ref(reference)?, doc_ref(parent)?, name.as_deref())?;
            session.commit()?;
            println!("{}", doc.path());
            Ok(())
        }
    }
}

fn print_stats(repo: &Arc<Repository>) -> Result<(), CliError> {
    let conn = repo.pool().acquire()?;
    let stats = conn.stats(conn.head()?)?;
    let pool = repo.pool_status();

    print!("{}", stats);
    println!("  Binary root: {}", repo.binaries().root().display());
    println!("  Pool: {} live, {} idle, max {}", pool.live, pool.idle, pool.max);
    Ok(())
}

fn print_history(repo: &Arc<Repository>, limit: usize) -> Result<(), CliError> {
    let conn = repo.pool().acquire()?;
    for info in conn.history(Some(limit))? {
        println!(
            "{} {} {:<12} {}",
            info.id.short(),
            info.timestamp.format("%Y-%m-%d %H:%M:%S"),
            info.author_name,
            info.message.lines().next().unwrap_or_default()
        );
    }
    Ok(())
}

fn print_document(doc: &DocumentModel) -> Result<(), CliError> {
    println!("id:        {}", doc.id());
    println!("path:      {}", doc.path());
    println!("type:      {}", doc.doc_type());
    println!("version:   {}", doc.change_token());
    println!("lifecycle: {}", doc.lifecycle_state());
    println!("modified:  {}", doc.modified_at().to_rfc3339());
    if let Some(source) = doc.source_id() {
        let kind = if doc.is_version() { "version of" } else { "proxy of" };
        println!("{:<10} {}", format!("{}:", kind), source);
    }
    if let Some(label) = doc.version_label() {
        println!("label:     {}", label);
    }

    let properties: serde_json::Map<String, Value> = doc
        .properties()
        .iter()
        .map(|(xpath, value)| (xpath.clone(), value.to_json()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&Value::Object(properties))?);
    Ok(())
}

fn make_folder(session: &mut Session, path: &str, doc_type: &str, parents: bool) -> Result<DocumentModel, CliError> {
    if !parents {
        let (parent, name) = split_path(path)?;
        return Ok(session.create_document(parent, name, doc_type, BTreeMap::new())?);
    }

    let mut current = String::new();
    let mut last = None;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let parent = if current.is_empty() { "/".to_string() } else { current.clone() };
        current.push('/');
        current.push_str(segment);
        let doc = match session.get_document(current.as_str()) {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => {
                session.create_document(parent.as_str(), segment, doc_type, BTreeMap::new())?
            }
            Err(e) => return Err(e.into()),
        };
        last = Some(doc);
    }
    last.ok_or_else(|| CliError::Usage("cannot create the root".to_string()))
}

/// Update the document at `path` if there is one, create it otherwise.
fn put_document(
    session: &mut Session,
    path: &str,
    doc_type: &str,
    values: BTreeMap<String, PropertyValue>,
) -> Result<DocumentModel, CliError> {
    match session.get_document(path) {
        Ok(mut doc) => {
            for (xpath, value) in values {
                doc.set_property(xpath, value);
            }
            Ok(session.save_document(&doc)?)
        }
        Err(e) if e.is_not_found() => {
            let (parent, name) = split_path(path)?;
            Ok(session.create_document(parent, name, doc_type, values)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Absolute paths name documents by path, anything else is an id.
fn doc_ref(reference: &str) -> Result<DocRef, CliError> {
    if reference.starts_with('/') {
        Ok(DocRef::Path(reference.to_string()))
    } else {
        Ok(DocRef::Id(NodeId::new(reference)?))
    }
}

fn split_path(path: &str) -> Result<(&str, &str), CliError> {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", name)) => Ok(("/", name)),
        Some((parent, name)) if parent.starts_with('/') => Ok((parent, name)),
        _ => Err(CliError::Usage(format!("expected an absolute document path, got {:?}", path))),
    }
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(xpath, value)| (xpath.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected XPATH=VALUE, got {:?}", raw))
}

/// Typed value for a command-line property; strings are taken as is.
fn parse_property(repo: &Repository, doc_type: &str, xpath: &str, raw: &str) -> Result<PropertyValue, CliError> {
    let field = repo.schemas().field_for(doc_type, xpath)?;
    if field.field_type == PropertyType::String {
        return Ok(PropertyValue::from(raw));
    }
    let json = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    PropertyValue::from_json(&json, &field.field_type)
        .ok_or_else(|| CliError::Usage(format!("{} expects a {} value, got {:?}", xpath, field.field_type, raw)))
}

fn io_error(path: &Path, source: std::io::Error) -> CliError {
    CliError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/a").unwrap(), ("/", "a"));
        assert_eq!(split_path("/a/b/").unwrap(), ("/a", "b"));
        assert!(split_path("/").is_err());
        assert!(split_path("a/b").is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("dc:description=a=b").unwrap(),
            ("dc:description".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("dc:title").is_err());
    }

    #[test]
    fn test_doc_ref() {
        assert_eq!(doc_ref("/a").unwrap(), DocRef::Path("/a".to_string()));
        assert_eq!(doc_ref(NodeId::ROOT).unwrap(), DocRef::root());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["docrepo", "--path", "/tmp/r", "put", "/a", "--set", "dc:description=x"]);
        assert!(matches!(cli.command, Command::Put { ref properties, .. } if properties.len() == 1));
        assert!(Cli::try_parse_from(["docrepo", "--config", "c.toml", "--path", "p", "stats"]).is_err());
    }
}
