//! Checksum utilities for content verification
//!
//! Algorithms are selected by name per configuration. Digests are always
//! rendered as lower-case hex, two characters per byte, no separators, and
//! compared case-insensitively against checksums supplied by clients or by the
//! ingestion service.

use crate::error::{CommonError, Result};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::io::Read;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::warn;

const BUFFER_SIZE: usize = 8192;

/// Digest algorithm selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// All algorithms that can be verified end-to-end
    pub const SUPPORTED: [ChecksumAlgorithm; 4] = [
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha384,
        ChecksumAlgorithm::Sha512,
    ];

    /// Canonical name as written into configuration documents
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "MD5",
            ChecksumAlgorithm::Sha256 => "SHA-256",
            ChecksumAlgorithm::Sha384 => "SHA-384",
            ChecksumAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Start a running digest for this algorithm
    pub fn hasher(self) -> RunningDigest {
        match self {
            ChecksumAlgorithm::Md5 => RunningDigest::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => RunningDigest::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => RunningDigest::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => RunningDigest::Sha512(Sha512::new()),
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MD5" => Ok(ChecksumAlgorithm::Md5),
            "SHA-256" | "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            "SHA-384" | "SHA384" => Ok(ChecksumAlgorithm::Sha384),
            "SHA-512" | "SHA512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(CommonError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Digest state updated while bytes stream past
pub enum RunningDigest {
    Md5(md5::Context),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl RunningDigest {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            RunningDigest::Md5(ctx) => ctx.consume(data),
            RunningDigest::Sha256(h) => h.update(data),
            RunningDigest::Sha384(h) => h.update(data),
            RunningDigest::Sha512(h) => h.update(data),
        }
    }

    /// Finish the digest and render it as lower-case hex
    pub fn finalize_hex(self) -> String {
        match self {
            RunningDigest::Md5(ctx) => hex::encode(ctx.compute().0),
            RunningDigest::Sha256(h) => hex::encode(h.finalize()),
            RunningDigest::Sha384(h) => hex::encode(h.finalize()),
            RunningDigest::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Case-insensitive comparison of two rendered digests
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    let mut hasher = algorithm.hasher();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}

/// Compute checksum for a file
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm)
}

/// Compute checksum for a file without blocking the runtime
pub async fn compute_file_checksum_async(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}

/// Copy a stream to `destination` while digesting it
///
/// The destination must not exist yet; an existing file fails with an
/// `AlreadyExists` I/O error and is left untouched. On any other failure the
/// partially written file is removed, so the file exists iff this returns `Ok`.
pub async fn store_and_digest<R>(
    reader: &mut R,
    destination: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await?;

    match copy_digesting(reader, file, algorithm).await {
        Ok(digest) => Ok(digest),
        Err(err) => {
            if let Err(remove_err) = tokio::fs::remove_file(destination).await {
                warn!(
                    path = %destination.display(),
                    error = %remove_err,
                    "Failed to remove partially written file"
                );
            }
            Err(err.into())
        },
    }
}

async fn copy_digesting<R>(
    reader: &mut R,
    mut file: tokio::fs::File,
    algorithm: ChecksumAlgorithm,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        file.write_all(&buffer[..bytes_read]).await?;
    }

    file.flush().await?;
    file.sync_all().await?;

    Ok(hasher.finalize_hex())
}
