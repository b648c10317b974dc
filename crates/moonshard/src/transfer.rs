//! File transfer state and on-disk storage.
//!
//! An upload is a `file_send_begin` control message, any number of binary
//! frames, and a `file_send_complete`. [`TransferState`] owns the bytes in
//! between; [`FileStore`] writes a finished payload under a fresh random
//! directory so two uploads with the same name never collide.

use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;

/// Name used when sanitizing leaves nothing usable.
const FALLBACK_FILE_NAME: &str = "unnamed";

/// Errors that end a transfer without storing anything.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The declared size is above the configured limit.
    #[error("file too large: {size} bytes exceeds limit of {max}")]
    TooLarge { size: u64, max: u64 },

    /// The bytes received do not add up to the declared size.
    #[error("size mismatch: declared {declared} bytes, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    /// Writing the payload to disk failed.
    #[error("failed to store file at {path}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Makes a client-supplied file name safe to join onto a directory.
///
/// Path separators and characters that are illegal in file names on
/// common filesystems become `_`. Names that would resolve to the
/// directory itself (`""`, `"."`, `".."`) become `"unnamed"`.
///
/// Idempotent: `sanitize_file_name(&sanitize_file_name(x)) ==
/// sanitize_file_name(x)`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_owned(),
        _ => cleaned,
    }
}

// ---------------------------------------------------------------------------
// TransferState
// ---------------------------------------------------------------------------

/// One in-flight upload on a single connection.
#[derive(Debug)]
pub struct TransferState {
    target_user_id: String,
    file_name: String,
    declared_size: u64,
    buffer: Vec<u8>,
    received: u64,
}

impl TransferState {
    /// Starts an upload. `file_name` is sanitized here.
    ///
    /// Fails with [`TransferError::TooLarge`] when `declared_size` is above
    /// `max_size`.
    pub fn begin(
        target_user_id: impl Into<String>,
        file_name: &str,
        declared_size: u64,
        max_size: u64,
    ) -> Result<Self, TransferError> {
        if declared_size > max_size {
            return Err(TransferError::TooLarge {
                size: declared_size,
                max: max_size,
            });
        }
        Ok(Self {
            target_user_id: target_user_id.into(),
            file_name: sanitize_file_name(file_name),
            declared_size,
            // Capped so a bogus declared size cannot reserve a huge buffer.
            buffer: Vec::with_capacity(declared_size.min(1 << 20) as usize),
            received: 0,
        })
    }

    /// Appends one binary chunk.
    ///
    /// Every byte is counted, but bytes past the declared size are not
    /// buffered: the transfer is already doomed to fail its size check.
    pub fn append(&mut self, chunk: &[u8]) {
        let room = self.declared_size.saturating_sub(self.buffer.len() as u64);
        let keep = (chunk.len() as u64).min(room) as usize;
        self.buffer.extend_from_slice(&chunk[..keep]);
        self.received += chunk.len() as u64;
    }

    /// Checks the size and hands back the payload.
    pub fn finish(self) -> Result<Vec<u8>, TransferError> {
        if self.received != self.declared_size {
            return Err(TransferError::SizeMismatch {
                declared: self.declared_size,
                received: self.received,
            });
        }
        Ok(self.buffer)
    }

    pub fn target_user_id(&self) -> &str {
        &self.target_user_id
    }

    /// The sanitized file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Total bytes received so far, including any past the declared size.
    pub fn received(&self) -> u64 {
        self.received
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Writes completed uploads to `<root>/<random hex>/<file name>`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `bytes` under a directory nobody else uses and returns the
    /// full path of the written file.
    pub async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, TransferError> {
        let storage = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| TransferError::Storage { path, source }
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(storage(&self.root))?;

        let dir = loop {
            let candidate = self.root.join(random_dir_name());
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(storage(&candidate)(e)),
            }
        };

        let path = dir.join(sanitize_file_name(file_name));
        tokio::fs::write(&path, bytes).await.map_err(storage(&path))?;
        Ok(path)
    }
}

fn random_dir_name() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // sanitize_file_name()
    // =====================================================================

    #[test]
    fn test_sanitize_file_name_strips_path_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("..\\boot.ini"), ".._boot.ini");
        assert_eq!(sanitize_file_name(".."), "unnamed");
        assert_eq!(sanitize_file_name(""), "unnamed");
    }

    #[test]
    fn test_sanitize_file_name_replaces_illegal_chars() {
        assert_eq!(sanitize_file_name("a<b>c:d\"e|f?g*h"), "a_b_c_d_e_f_g_h");
        assert_eq!(sanitize_file_name("tab\there"), "tab_here");
    }

    #[test]
    fn test_sanitize_file_name_keeps_normal_names() {
        assert_eq!(sanitize_file_name("photo 1.png"), "photo 1.png");
        assert_eq!(sanitize_file_name("résumé.pdf"), "résumé.pdf");
    }

    #[test]
    fn test_sanitize_file_name_is_idempotent() {
        for name in ["../x", "", "..", "a/b\\c", "ok.txt", " . ", "\0"] {
            let once = sanitize_file_name(name);
            assert_eq!(sanitize_file_name(&once), once, "input {name:?}");
        }
    }

    // =====================================================================
    // TransferState
    // =====================================================================

    #[test]
    fn test_begin_over_limit_is_too_large() {
        let err = TransferState::begin("bob", "a.bin", 101, 100).unwrap_err();
        assert!(matches!(err, TransferError::TooLarge { size: 101, max: 100 }));
    }

    #[test]
    fn test_append_counts_sum_of_chunks() {
        let mut transfer = TransferState::begin("bob", "a.bin", 6, 100).unwrap();
        transfer.append(b"ab");
        transfer.append(b"");
        transfer.append(b"cdef");
        assert_eq!(transfer.received(), 6);
        assert_eq!(transfer.finish().unwrap(), b"abcdef");
    }

    #[test]
    fn test_finish_short_payload_is_size_mismatch() {
        let mut transfer = TransferState::begin("bob", "a.bin", 1000, 10_000).unwrap();
        transfer.append(&[0u8; 999]);
        let err = transfer.finish().unwrap_err();
        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                declared: 1000,
                received: 999
            }
        ));
    }

    #[test]
    fn test_append_past_declared_size_counts_but_does_not_buffer() {
        let mut transfer = TransferState::begin("bob", "a.bin", 4, 100).unwrap();
        transfer.append(b"abcdefgh");
        assert_eq!(transfer.received(), 8);
        assert_eq!(transfer.buffer.len(), 4);
        assert!(matches!(
            transfer.finish(),
            Err(TransferError::SizeMismatch { received: 8, .. })
        ));
    }

    #[test]
    fn test_begin_sanitizes_file_name() {
        let transfer = TransferState::begin("bob", "../x", 0, 100).unwrap();
        assert_eq!(transfer.file_name(), ".._x");
        assert_eq!(transfer.target_user_id(), "bob");
    }

    // =====================================================================
    // FileStore
    // =====================================================================

    #[tokio::test]
    async fn test_save_writes_under_fresh_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("received"));

        let first = store.save("same.txt", b"one").await.unwrap();
        let second = store.save("same.txt", b"two").await.unwrap();

        assert_ne!(first.parent(), second.parent());
        assert_eq!(first.file_name().unwrap(), "same.txt");
        assert_eq!(tokio::fs::read(&first).await.unwrap(), b"one");
        assert_eq!(tokio::fs::read(&second).await.unwrap(), b"two");
        assert!(first.starts_with(store.root()));
    }
}
