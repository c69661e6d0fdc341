//! Argument parsing and dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::{eyre, Context as _, Result};
use vaultbridge_core::{ClientConfig, JobKey, JobPaths, JobQueueStore, KeyEncoding};

use crate::jobs;

/// Inspect and edit an encrypted job queue.
#[derive(Parser)]
#[command(name = "vaultbridge", version, propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// Job directory. Defaults to the storage path from `--config`, or the
    /// platform data directory.
    #[arg(long, env = "VAULTBRIDGE_JOB_DIR", global = true)]
    pub dir: Option<PathBuf>,

    /// JSON client config to take the storage path and key encoding from.
    #[arg(long, env = "VAULTBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Queue key as the engine reports it (`hashedPassword`).
    #[arg(long, env = "VAULTBRIDGE_JOB_KEY", global = true, hide_env_values = true)]
    pub key: Option<String>,

    /// How `--key` is encoded.
    #[arg(long, value_enum, global = true)]
    pub encoding: Option<EncodingArg>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum EncodingArg {
    Hex,
    Base64,
    Auto,
}

impl From<EncodingArg> for KeyEncoding {
    fn from(arg: EncodingArg) -> Self {
        match arg {
            EncodingArg::Hex => Self::Hex,
            EncodingArg::Base64 => Self::Base64,
            EncodingArg::Auto => Self::Auto,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the plain header and on-disk state without decrypting.
    Inspect,
    /// Decrypt and print every job as JSON.
    List,
    /// Append a job whose payload is read from a JSON file.
    Append(jobs::AppendArgs),
    /// Store a file in the attachments folder and print its relative name.
    Attach(jobs::AttachArgs),
    /// Delete the job file and, unless told otherwise, the attachments.
    Clear {
        /// Leave the attachments folder in place.
        #[arg(long)]
        keep_attachments: bool,
    },
}

/// Resolved inputs shared by the command handlers.
pub struct Context {
    pub store: JobQueueStore,
    key: Option<String>,
    encoding: KeyEncoding,
}

impl Context {
    /// Decodes `--key`; every command that touches the ciphertext needs it.
    pub fn key(&self) -> Result<JobKey> {
        let encoded = self
            .key
            .as_deref()
            .ok_or_else(|| eyre!("a queue key is required (--key or VAULTBRIDGE_JOB_KEY)"))?;
        Ok(JobKey::from_encoded(encoded, self.encoding)?)
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let context = self.global.resolve()?;
        tracing::debug!(dir = %context.store.paths().base_dir().display(), "using job directory");
        match self.command {
            Command::Inspect => jobs::inspect(&context),
            Command::List => jobs::list(&context),
            Command::Append(args) => jobs::append(&context, &args),
            Command::Attach(args) => jobs::attach(&context, &args),
            Command::Clear { keep_attachments } => jobs::clear(&context, keep_attachments),
        }
    }
}

impl GlobalOptions {
    fn resolve(self) -> Result<Context> {
        let config = self
            .config
            .as_deref()
            .map(|path| {
                ClientConfig::load(path)
                    .wrap_err_with(|| format!("loading config {}", path.display()))
            })
            .transpose()?;

        let paths = match (self.dir, &config) {
            (Some(dir), _) => JobPaths::new(dir),
            (None, Some(config)) => JobPaths::under_root(&config.storage_path),
            (None, None) => {
                let data = dirs::data_local_dir()
                    .ok_or_else(|| eyre!("no data directory on this platform; pass --dir"))?;
                JobPaths::under_root(data.join("vaultbridge"))
            }
        };

        let encoding = self
            .encoding
            .map(KeyEncoding::from)
            .or_else(|| config.as_ref().map(|c| c.key_encoding))
            .unwrap_or_default();

        Ok(Context {
            store: JobQueueStore::new(paths),
            key: self.key,
            encoding,
        })
    }
}
