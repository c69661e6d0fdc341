//! Job queue path helpers.

use std::path::{Path, PathBuf};

const JOBS_DIRNAME: &str = "vault_jobs";
const JOB_FILENAME: &str = "jobs.enc";
const TEMP_SUFFIX: &str = ".tmp";
const LOCK_FILENAME: &str = "jobs.lock";
const ATTACHMENTS_DIRNAME: &str = "attachments";

/// Paths for job queue artifacts under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    base_dir: PathBuf,
}

impl JobPaths {
    /// Uses `base_dir` as the job directory directly.
    #[must_use]
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Places the job directory under a storage root, as `<root>/vault_jobs`.
    #[must_use]
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(JOBS_DIRNAME))
    }

    /// Returns the job directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the path to the encrypted job file.
    #[must_use]
    pub fn job_file(&self) -> PathBuf {
        self.base_dir.join(JOB_FILENAME)
    }

    /// Returns the temp sibling used while replacing the job file.
    #[must_use]
    pub fn job_temp_file(&self) -> PathBuf {
        self.base_dir.join(format!("{JOB_FILENAME}{TEMP_SUFFIX}"))
    }

    /// Returns the path to the advisory lock file.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILENAME)
    }

    /// Returns the attachments directory.
    #[must_use]
    pub fn attachments_dir(&self) -> PathBuf {
        self.base_dir.join(ATTACHMENTS_DIRNAME)
    }

    /// Returns the path of an attachment blob.
    #[must_use]
    pub fn attachment(&self, relative_name: &str) -> PathBuf {
        self.attachments_dir().join(relative_name)
    }
}
