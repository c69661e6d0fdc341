//! Encrypted, whole-file-replace persistence of the job list.
//!
//! # Atomic write pattern
//!
//! 1. Write the new file to `jobs.enc.tmp` in the same directory
//! 2. `fsync` the temp file
//! 3. Rename it over `jobs.enc`
//! 4. `fsync` the directory (unix)
//!
//! A reader therefore sees the old queue or the new one, never a partial
//! write. If the process dies before step 3 the stale temp file is simply
//! overwritten by the next write.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

use super::crypto::{self, secure_zero, JobKey};
use super::format::{JobFileHeader, HEADER_SIZE, MIN_FILE_SIZE};
use super::lock::{QueueLock, QueueLockGuard};
use super::paths::JobPaths;
use super::types::Job;

/// File-backed job queue.
///
/// Cheap to clone. All mutating calls that read before writing take the
/// [`QueueLock`] for the duration of the cycle.
#[derive(Debug, Clone)]
pub struct JobQueueStore {
    paths: JobPaths,
}

impl JobQueueStore {
    /// Store rooted at `paths`. Nothing is created until the first write.
    #[must_use]
    pub const fn new(paths: JobPaths) -> Self {
        Self { paths }
    }

    /// Store using `base_dir` as its job directory.
    #[must_use]
    pub fn at(base_dir: impl AsRef<Path>) -> Self {
        Self::new(JobPaths::new(base_dir))
    }

    /// Returns the paths this store works on.
    #[must_use]
    pub const fn paths(&self) -> &JobPaths {
        &self.paths
    }

    /// Returns `true` if a non-empty job file is present.
    #[must_use]
    pub fn job_file_exists(&self) -> bool {
        fs::metadata(self.paths.job_file()).is_ok_and(|meta| meta.len() > 0)
    }

    /// Opens the advisory lock for this queue.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the lock file cannot be opened.
    pub fn lock(&self) -> VaultResult<QueueLock> {
        QueueLock::open(&self.paths.lock_file())
    }

    fn read_raw(&self) -> VaultResult<Option<Vec<u8>>> {
        let path = self.paths.job_file();
        match fs::read(&path) {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::io(
                format!("Failed to read job file '{}'", path.display()),
                e,
            )),
        }
    }

    /// Reads the plain header without decrypting anything.
    ///
    /// Returns `None` when there is no queue.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CorruptFile`] if the header is invalid.
    pub fn header(&self) -> VaultResult<Option<JobFileHeader>> {
        self.read_raw()?
            .map(|data| JobFileHeader::decode(&data))
            .transpose()
    }

    /// Reads and decrypts the whole queue.
    ///
    /// An absent or empty file is an empty queue. Anything else that does
    /// not decode is an error; the store never drops or repairs a queue.
    ///
    /// # Errors
    ///
    /// - [`VaultError::CorruptFile`] for a short file, bad magic, unsupported
    ///   version or malformed JSON.
    /// - [`VaultError::AuthenticationFailed`] if decryption fails.
    /// - [`VaultError::IoFailure`] if the file cannot be read.
    pub fn read_jobs(&self, key: &JobKey) -> VaultResult<Vec<Job>> {
        let Some(data) = self.read_raw()? else {
            return Ok(Vec::new());
        };
        if data.len() < MIN_FILE_SIZE {
            return Err(VaultError::CorruptFile(format!(
                "job file is {} bytes, need at least {MIN_FILE_SIZE}",
                data.len()
            )));
        }
        JobFileHeader::decode(&data)?;

        let plaintext = Zeroizing::new(crypto::decrypt(&data[HEADER_SIZE..], key.as_bytes())?);
        let mut jobs: Vec<Job> = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::CorruptFile(format!("job list does not parse: {e}")))?;
        for job in &mut jobs {
            job.normalize();
        }
        tracing::debug!(count = jobs.len(), "read job queue");
        Ok(jobs)
    }

    /// Replaces the queue with `jobs`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if any filesystem step fails, or a
    /// crypto error if `key` is unusable.
    pub fn write_jobs(&self, jobs: &[Job], key: &JobKey) -> VaultResult<()> {
        let staged = self.stage_jobs(jobs, key)?;
        self.commit(&staged)?;
        tracing::debug!(count = jobs.len(), "wrote job queue");
        Ok(())
    }

    /// Appends `job` under the queue lock.
    ///
    /// This is a full read-modify-write of the file.
    ///
    /// # Errors
    ///
    /// Propagates every error from [`Self::read_jobs`] and
    /// [`Self::write_jobs`]; an unreadable queue is never overwritten.
    pub fn append_job(&self, job: Job, key: &JobKey) -> VaultResult<()> {
        let lock = self.lock()?;
        let _guard = lock.lock()?;
        self.append_job_locked(job, key)
    }

    /// [`Self::append_job`] for a caller that already holds the queue lock.
    pub(crate) fn append_job_locked(&self, job: Job, key: &JobKey) -> VaultResult<()> {
        let mut jobs = self.read_jobs(key)?;
        tracing::info!(job_id = %job.id, job_type = %job.job_type, "appending job");
        jobs.push(job);
        self.write_jobs(&jobs, key)
    }

    /// Takes the queue lock without blocking; `None` if someone else has it.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the lock cannot be opened.
    pub fn try_locked(&self) -> VaultResult<Option<QueueLockGuard>> {
        self.lock()?.try_lock()
    }

    /// Writes the encrypted queue to the temp sibling and syncs it.
    fn stage_jobs(&self, jobs: &[Job], key: &JobKey) -> VaultResult<PathBuf> {
        let mut plaintext = serde_json::to_vec(jobs)?;
        let sealed = crypto::encrypt(&plaintext, key.as_bytes());
        secure_zero(&mut plaintext);
        let sealed = sealed?;

        let mut contents = Vec::with_capacity(HEADER_SIZE + sealed.len());
        contents.extend_from_slice(&JobFileHeader::current(jobs.len()).encode());
        contents.extend_from_slice(&sealed);

        self.ensure_dir(self.paths.base_dir())?;
        let temp = self.paths.job_temp_file();
        write_synced(&temp, &contents)?;
        Ok(temp)
    }

    /// Moves a staged temp file over the job file.
    fn commit(&self, temp: &Path) -> VaultResult<()> {
        replace_file(temp, &self.paths.job_file())?;
        sync_directory(self.paths.base_dir())
    }

    /// Stores an attachment blob and returns its file name inside the
    /// attachments folder.
    ///
    /// The blob is named `attachment_id` plus the extension of
    /// `original_name`, if it has one. A job that references the blob must
    /// be appended under the same queue lock hold, or an emptying drain may
    /// remove the blob first.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the blob cannot be written.
    pub fn save_attachment(
        &self,
        bytes: &[u8],
        attachment_id: &str,
        original_name: &str,
    ) -> VaultResult<String> {
        let relative = match file_extension(original_name) {
            Some(ext) => format!("{attachment_id}.{ext}"),
            None => attachment_id.to_string(),
        };
        let dir = self.paths.attachments_dir();
        self.ensure_dir(&dir)?;

        let target = dir.join(&relative);
        let temp = dir.join(format!("{relative}.tmp"));
        write_synced(&temp, bytes)?;
        replace_file(&temp, &target)?;
        sync_directory(&dir)?;

        tracing::debug!(attachment_id, size = bytes.len(), "saved attachment");
        Ok(relative)
    }

    /// Removes the job file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the file exists but cannot be
    /// removed.
    pub fn delete_job_file(&self) -> VaultResult<()> {
        for path in [self.paths.job_file(), self.paths.job_temp_file()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(VaultError::io(
                        format!("Failed to delete '{}'", path.display()),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Removes the attachments folder and everything in it. A missing folder
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::IoFailure`] if the folder exists but cannot be
    /// removed.
    pub fn delete_attachments_folder(&self) -> VaultResult<()> {
        let dir = self.paths.attachments_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::io(
                format!("Failed to delete '{}'", dir.display()),
                e,
            )),
        }
    }

    #[allow(clippy::unused_self)]
    fn ensure_dir(&self, dir: &Path) -> VaultResult<()> {
        fs::create_dir_all(dir).map_err(|e| {
            VaultError::io(format!("Failed to create directory '{}'", dir.display()), e)
        })
    }
}

/// Extension of `name`, only when the last dot is neither first nor last
/// and what follows it is a plain file-name component.
fn file_extension(name: &str) -> Option<&str> {
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    (dot > 0 && !ext.is_empty() && !ext.contains(['/', '\\'])).then_some(ext)
}

fn write_synced(path: &Path, data: &[u8]) -> VaultResult<()> {
    let mut file: File = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| {
            VaultError::io(format!("Failed to create temporary file '{}'", path.display()), e)
        })?;
    file.write_all(data).map_err(|e| {
        VaultError::io(format!("Failed to write temporary file '{}'", path.display()), e)
    })?;
    file.sync_all()
        .map_err(|e| VaultError::io("Failed to sync temporary file", e))
}

/// Renames `temp` over `target`.
///
/// Some filesystems refuse to rename over an existing file; in that case the
/// target is removed and the rename retried once. If that fails too the temp
/// file is removed and the error surfaces.
fn replace_file(temp: &Path, target: &Path) -> VaultResult<()> {
    if fs::rename(temp, target).is_ok() {
        return Ok(());
    }
    tracing::warn!(target = %target.display(), "rename failed, retrying after removing target");
    let _ = fs::remove_file(target);
    fs::rename(temp, target).map_err(|e| {
        let _ = fs::remove_file(temp);
        VaultError::io(
            format!("Failed to rename '{}' to '{}'", temp.display(), target.display()),
            e,
        )
    })
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> VaultResult<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| VaultError::io(format!("Failed to sync directory '{}'", dir.display()), e))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn sync_directory(_dir: &Path) -> VaultResult<()> {
    Ok(())
}
