//! Job queue commands.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use eyre::{bail, eyre, Context as _, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use vaultbridge_core::jobs::{Job, JobType};

use crate::cli::Context;

#[derive(Args)]
pub struct AppendArgs {
    /// Vault the job targets.
    #[arg(long)]
    pub vault_id: String,

    /// Job type, `ADD_PASSKEY` or `UPDATE_PASSKEY`.
    #[arg(long = "type", value_parser = parse_job_type)]
    pub job_type: JobType,

    /// JSON object to use as the payload. Reads stdin for `-`.
    #[arg(long)]
    pub payload: PathBuf,
}

#[derive(Args)]
pub struct AttachArgs {
    /// File to store.
    #[arg(long)]
    pub file: PathBuf,

    /// Attachment id. A fresh UUID when omitted.
    #[arg(long)]
    pub id: Option<String>,
}

fn parse_job_type(value: &str) -> Result<JobType, String> {
    value
        .parse()
        .map_err(|_| format!("unknown job type '{value}'"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Inspection {
    job_file: PathBuf,
    exists: bool,
    version: Option<u16>,
    job_count: Option<u16>,
    attachments: usize,
}

pub fn inspect(context: &Context) -> Result<()> {
    let paths = context.store.paths();
    let header = context.store.header()?;
    let attachments = match fs::read_dir(paths.attachments_dir()) {
        Ok(entries) => entries.filter_map(Result::ok).count(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e).wrap_err("reading attachments folder"),
    };

    print_json(&Inspection {
        job_file: paths.job_file(),
        exists: header.is_some(),
        version: header.map(|h| h.version),
        job_count: header.map(|h| h.job_count),
        attachments,
    })
}

pub fn list(context: &Context) -> Result<()> {
    let jobs = context.store.read_jobs(&context.key()?)?;
    tracing::debug!(count = jobs.len(), "decrypted queue");
    print_json(&jobs)
}

pub fn append(context: &Context, args: &AppendArgs) -> Result<()> {
    let key = context.key()?;
    let payload = read_payload(&args.payload)?;
    let job = Job::new(args.job_type, args.vault_id.clone(), payload);
    let id = job.id.clone();
    context.store.append_job(job, &key)?;
    println!("{id}");
    Ok(())
}

pub fn attach(context: &Context, args: &AttachArgs) -> Result<()> {
    let bytes = fs::read(&args.file).wrap_err_with(|| format!("reading {}", args.file.display()))?;
    let name = args
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| eyre!("{} has no usable file name", args.file.display()))?;
    let id = args
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let relative = context.store.save_attachment(&bytes, &id, name)?;
    println!("{relative}");
    Ok(())
}

pub fn clear(context: &Context, keep_attachments: bool) -> Result<()> {
    let lock = context.store.lock()?;
    let _guard = lock.lock()?;
    context.store.delete_job_file()?;
    if !keep_attachments {
        context.store.delete_attachments_folder()?;
    }
    tracing::info!(keep_attachments, "cleared job queue");
    Ok(())
}

fn read_payload(path: &Path) -> Result<Map<String, Value>> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).wrap_err("reading payload from stdin")?
    } else {
        fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?
    };
    match serde_json::from_str(&text).wrap_err("parsing payload")? {
        Value::Object(map) => Ok(map),
        other => bail!("payload must be a JSON object, got {other}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
