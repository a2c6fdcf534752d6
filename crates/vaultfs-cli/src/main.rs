mod format;
mod signal;

use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use serde::Deserialize;

use vaultfs_core::{Backend, HashKind, VaultConfig, DEFAULT_CHUNK_SIZE};

use crate::format::format_bytes;

type AnyError = Box<dyn std::error::Error>;

#[derive(Parser)]
#[command(name = "vaultfs", version,
    about = "Store and fetch files in the Internet Archive Vault digital preservation service",
    after_help = "\
Configuration is merged from, in order of precedence:
  1. command-line flags
  2. the YAML file given with --config
  3. $VAULTFS_PASSWORD (password only)

A config file looks like:
  endpoint: https://vault.example.org/api
  username: alice
  password: secret

Uploads are spooled locally and deposited in one batch when the command
exits. An interrupted run can be continued with --resume-deposit-id.")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Service URL, expected to end in /api
    #[arg(long)]
    endpoint: Option<String>,

    /// Vault account name
    #[arg(long)]
    username: Option<String>,

    /// Vault password (falls back to $VAULTFS_PASSWORD, then a prompt)
    #[arg(long)]
    password: Option<String>,

    /// Upload chunk size in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Continue an interrupted deposit instead of registering a new one
    #[arg(long)]
    resume_deposit_id: Option<i64>,

    /// Show a byte progress bar while depositing
    #[arg(long)]
    progress: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Tabular listing with sizes and timestamps
        #[arg(short, long)]
        long: bool,
    },

    /// Show details of a single file
    Stat { path: String },

    /// Create a directory path; the first segment becomes a collection
    Mkdir { path: String },

    /// Remove an empty folder
    Rmdir { path: String },

    /// Remove a folder including everything below it
    Purge { path: String },

    /// Rename or move a file or folder
    Mv { src: String, dst: String },

    /// Delete a file
    Rm { path: String },

    /// Download a file
    Get {
        path: String,

        /// Local destination (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Queue local files for deposit into a Vault directory
    Put {
        /// Local files to upload
        #[arg(required = true)]
        files: Vec<String>,

        /// Destination directory in Vault, created on demand
        #[arg(long, default_value = "/")]
        dest: String,
    },

    /// Show quota and per-collection usage
    Info,

    /// Show the progress counters of a deposit
    DepositStatus {
        #[arg(long)]
        id: i64,
    },
}

/// Optional YAML file settings, all overridable by flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    chunk_size: Option<u64>,
    resume_deposit_id: Option<i64>,
    show_deposit_progress: Option<bool>,
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    signal::install_signal_handlers();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AnyError> {
    let config = resolve_config(&cli)?;

    // Uploads deposit into their destination directory; every other command
    // addresses absolute Vault paths.
    let root = match &cli.command {
        Commands::Put { dest, .. } => dest.clone(),
        _ => "/".to_string(),
    };
    let backend = Backend::open(&config, &root)?;

    let result = dispatch(&backend, &cli.command);

    if signal::interrupted() {
        let dropped = backend.clear_pending();
        if dropped > 0 {
            tracing::warn!("interrupted: abandoning {dropped} pending upload(s)");
        }
    }
    let closed = backend.close();
    result?;
    if let Some(summary) = closed? {
        eprintln!(
            "deposited {} file(s), {} (deposit {})",
            summary.files,
            format_bytes(summary.total_size),
            summary.deposit_id,
        );
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<VaultConfig, AnyError> {
    let file: FileConfig = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read config file '{path}': {e}"))?;
            serde_yaml::from_str(&raw).map_err(|e| format!("config file '{path}': {e}"))?
        }
        None => FileConfig::default(),
    };

    let endpoint = cli
        .endpoint
        .clone()
        .or(file.endpoint)
        .ok_or("no endpoint configured (use --endpoint or a config file)")?;
    let username = cli
        .username
        .clone()
        .or(file.username)
        .ok_or("no username configured (use --username or a config file)")?;
    let password = match cli.password.clone().or(file.password) {
        Some(p) => p,
        None => match std::env::var("VAULTFS_PASSWORD") {
            Ok(p) if !p.is_empty() => p,
            _ => rpassword::prompt_password(format!("Vault password for {username}: "))?,
        },
    };

    let config = VaultConfig {
        username,
        password,
        endpoint,
        chunk_size: cli
            .chunk_size
            .or(file.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE),
        resume_deposit_id: cli.resume_deposit_id.or(file.resume_deposit_id),
        show_deposit_progress: cli.progress || file.show_deposit_progress.unwrap_or(false),
    };
    Ok(config.validated()?)
}

fn dispatch(backend: &Backend, command: &Commands) -> Result<(), AnyError> {
    match command {
        Commands::Ls { path, long } => cmd_ls(backend, path, *long),
        Commands::Stat { path } => cmd_stat(backend, path),
        Commands::Mkdir { path } => Ok(backend.mkdir(path)?),
        Commands::Rmdir { path } => Ok(backend.rmdir(path)?),
        Commands::Purge { path } => Ok(backend.purge(path)?),
        Commands::Mv { src, dst } => Ok(backend.move_path(src, dst)?),
        Commands::Rm { path } => Ok(backend.remove_object(path)?),
        Commands::Get { path, output } => cmd_get(backend, path, output.as_deref()),
        Commands::Put { files, .. } => cmd_put(backend, files),
        Commands::Info => cmd_info(backend),
        Commands::DepositStatus { id } => cmd_deposit_status(backend, *id),
    }
}

fn cmd_ls(backend: &Backend, path: &str, long: bool) -> Result<(), AnyError> {
    let entries = backend.list(path)?;
    if !long {
        for entry in &entries {
            if entry.is_dir() {
                println!("{}/", entry.name());
            } else {
                println!("{}", entry.name());
            }
        }
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Type", "Size", "Modified", "Name"]);
    for entry in &entries {
        table.add_row(vec![
            if entry.is_dir() { "d" } else { "-" }.to_string(),
            format_bytes(entry.size()),
            entry.mod_time().format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.name().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_stat(backend: &Backend, path: &str) -> Result<(), AnyError> {
    let object = backend.new_object(path)?;
    println!("path:     {}", object.remote());
    println!("id:       {}", object.id());
    println!("size:     {}", format_bytes(object.size()));
    println!("modified: {}", object.mod_time().format("%Y-%m-%d %H:%M:%S UTC"));
    let mime = object.mime_type();
    println!("type:     {}", if mime.is_empty() { "-" } else { mime });
    for (label, kind) in [
        ("md5", HashKind::Md5),
        ("sha1", HashKind::Sha1),
        ("sha256", HashKind::Sha256),
    ] {
        let sum = object.hash(kind);
        println!("{label}:      {}", if sum.is_empty() { "-" } else { sum });
    }
    Ok(())
}

fn cmd_get(backend: &Backend, path: &str, output: Option<&str>) -> Result<(), AnyError> {
    let object = backend.new_object(path)?;
    let mut reader = backend.open_object(&object)?;
    match output {
        Some(dest) => {
            let mut file = File::create(dest)?;
            let n = io::copy(&mut reader, &mut file)?;
            eprintln!("wrote {} to {dest}", format_bytes(n));
        }
        None => {
            let stdout = io::stdout();
            io::copy(&mut reader, &mut stdout.lock())?;
        }
    }
    Ok(())
}

fn cmd_put(backend: &Backend, files: &[String]) -> Result<(), AnyError> {
    for local in files {
        if signal::interrupted() {
            break;
        }
        let path = Path::new(local);
        let name = path
            .file_name()
            .ok_or_else(|| format!("not a file path: '{local}'"))?
            .to_string_lossy()
            .to_string();
        let mut file = File::open(path).map_err(|e| format!("cannot open '{local}': {e}"))?;
        let mod_time: DateTime<Utc> = file
            .metadata()?
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        backend.put(&mut file, &name, mod_time)?;
        tracing::info!("queued {name} for deposit");
    }
    eprintln!("{} upload(s) queued; depositing on exit", backend.pending_uploads());
    Ok(())
}

fn cmd_info(backend: &Backend) -> Result<(), AnyError> {
    let usage = backend.about()?;
    let stats = backend.api().collection_stats()?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Collection", "Files", "Size"]);
    for collection in &stats.collections {
        table.add_row(vec![
            collection.id.to_string(),
            collection.file_count.to_string(),
            format_bytes(collection.total_size.max(0) as u64),
        ]);
    }
    println!("{table}");
    println!(
        "quota: {}, used: {} ({} files), free: {}",
        format_bytes(usage.total),
        format_bytes(usage.used),
        usage.files,
        format_bytes(usage.free),
    );
    Ok(())
}

fn cmd_deposit_status(backend: &Backend, id: i64) -> Result<(), AnyError> {
    let status = backend.api().deposit_status(id)?;
    println!("deposit {id}");
    println!("  total files:      {}", status.total_files);
    println!("  queued:           {}", status.file_queue);
    println!("  uploaded:         {}", status.uploaded_files);
    println!("  assembled:        {}", status.assembled_files);
    println!("  in storage:       {}", status.in_storage_files);
    println!("  errored:          {}", status.errored_files);
    Ok(())
}
