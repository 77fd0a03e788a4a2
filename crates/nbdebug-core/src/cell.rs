//! Content-addressed mapping from cell code to temp files.
//!
//! The engine addresses code by file path, the host by cell. Each cell's code
//! is dumped to `<prefix><murmur2(code, seed)><suffix>`. The frontend learns
//! prefix, suffix, seed and hash method through `debugInfo`, so it can map a
//! path back to its cell without asking.
//!
//! NOTE: MurmurHash2 is **not** cryptographically secure. It only needs to
//! be stable and cheap to recompute in a browser.

use std::{io, path::Path};

use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use crate::{BridgeConfig, system};

/// Name of the hash advertised to the frontend.
pub const HASH_METHOD: &str = "Murmur2";

const MURMUR2_M: u32 = 0x5bd1_e995;
const MURMUR2_R: u32 = 24;

/// 32-bit MurmurHash2 of `bytes`.
#[must_use]
pub fn murmur2(bytes: &[u8], seed: u32) -> u32 {
    // The reference mixes in the length as a 32-bit value.
    #[allow(clippy::cast_possible_truncation)]
    let mut h = seed ^ (bytes.len() as u32);

    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(MURMUR2_M);
        k ^= k >> MURMUR2_R;
        k = k.wrapping_mul(MURMUR2_M);

        h = h.wrapping_mul(MURMUR2_M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(MURMUR2_M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(MURMUR2_M);
    h ^= h >> 15;
    h
}

/// Naming scheme for dumped cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellFiles {
    prefix: String,
    suffix: String,
    seed: u32,
}

impl CellFiles {
    /// Build the scheme for this process from `config`.
    ///
    /// The prefix is `<temp root>/<tmp_dir_prefix><pid>/`.
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        let dir = system::temp_directory_path(config)
            .join(format!("{}{}", config.tmp_dir_prefix, system::current_pid()));
        let mut prefix = dir.to_string_lossy().into_owned();
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
        Self {
            prefix,
            suffix: config.tmp_file_suffix.clone(),
            seed: config.hash_seed,
        }
    }

    /// Directory part of every cell path, with a trailing separator.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Extension of every cell path.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Hash seed.
    #[must_use]
    pub const fn seed(&self) -> u32 {
        self.seed
    }

    /// Path a cell with this `code` is dumped to.
    #[must_use]
    pub fn path_for(&self, code: &str) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            murmur2(code.as_bytes(), self.seed),
            self.suffix
        )
    }

    /// Create the directory holding dumped cells.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.prefix).await
    }

    /// Write `code` to its cell path unless a file is already there.
    ///
    /// Identical code always maps to the same path, so an existing file
    /// already holds this content and is left untouched.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub async fn dump(&self, code: &str) -> io::Result<String> {
        let path = self.path_for(code);
        if let Some(parent) = Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                file.write_all(code.as_bytes()).await?;
                file.flush().await?;
                tracing::debug!(path = %path, "dumped cell");
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path, "cell already dumped");
            }
            Err(e) => return Err(e),
        }
        Ok(path)
    }
}
