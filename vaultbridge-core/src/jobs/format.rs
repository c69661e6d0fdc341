//! Job file header.
//!
//! ```text
//! offset 0  : 4 bytes  magic            "PPJQ"
//! offset 4  : 2 bytes  version (u16 LE)
//! offset 6  : 2 bytes  job count (u16 LE), informational
//! offset 8  : 8 bytes  reserved, zero
//! offset 16 : 24 bytes nonce
//! offset 40 : ciphertext with trailing 16-byte tag
//! ```

use crate::error::{VaultError, VaultResult};

use super::crypto::{NONCE_SIZE, TAG_SIZE};

/// File magic.
pub const MAGIC: [u8; 4] = *b"PPJQ";
/// Current format version.
pub const FORMAT_VERSION: u16 = 1;
/// Oldest version this build can read.
pub const MIN_SUPPORTED_VERSION: u16 = 1;
/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;
/// Smallest file that can hold a header, a nonce, a tag and one byte.
pub const MIN_FILE_SIZE: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE + 1;

/// Plaintext header at the start of the job file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFileHeader {
    /// Format version.
    pub version: u16,
    /// Number of jobs at the time of writing. Not used for decoding.
    pub job_count: u16,
}

impl JobFileHeader {
    /// Header for a file about to be written with `job_count` jobs.
    ///
    /// Counts beyond `u16::MAX` saturate.
    #[must_use]
    pub fn current(job_count: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            job_count: u16::try_from(job_count).unwrap_or(u16::MAX),
        }
    }

    /// Serializes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.job_count.to_le_bytes());
        out
    }

    /// Parses and validates the header at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CorruptFile`] for a short buffer, a bad magic or
    /// an unsupported version.
    pub fn decode(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(VaultError::CorruptFile(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(VaultError::CorruptFile("invalid magic".to_string()));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if !(MIN_SUPPORTED_VERSION..=FORMAT_VERSION).contains(&version) {
            return Err(VaultError::CorruptFile(format!(
                "unsupported version {version}"
            )));
        }
        let job_count = u16::from_le_bytes([bytes[6], bytes[7]]);
        Ok(Self { version, job_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = JobFileHeader::current(3).encode();
        assert_eq!(&bytes[0..4], b"PPJQ");
        assert_eq!(&bytes[4..6], &[1, 0]);
        assert_eq!(&bytes[6..8], &[3, 0]);
        assert_eq!(&bytes[8..], &[0u8; 8]);
        assert_eq!(
            JobFileHeader::decode(&bytes).expect("decode"),
            JobFileHeader {
                version: 1,
                job_count: 3
            }
        );
    }

    #[test]
    fn test_job_count_saturates() {
        assert_eq!(JobFileHeader::current(70_000).job_count, u16::MAX);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = JobFileHeader::current(1).encode();
        bytes[0] = b'X';
        assert!(matches!(
            JobFileHeader::decode(&bytes),
            Err(VaultError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_versions() {
        for version in [0u16, 2, 0xFFFF] {
            let mut bytes = JobFileHeader::current(1).encode();
            bytes[4..6].copy_from_slice(&version.to_le_bytes());
            assert!(matches!(
                JobFileHeader::decode(&bytes),
                Err(VaultError::CorruptFile(_))
            ));
        }
    }

    #[test]
    fn test_min_file_size() {
        assert_eq!(MIN_FILE_SIZE, 57);
    }
}
