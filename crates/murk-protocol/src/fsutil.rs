/// Filesystem helpers for the chunked transfer engine.
///
/// Downloads land in a pre-sized sparse file so chunks can be written
/// at their final offsets in any order; a failed transfer removes the
/// partial file. File identity is SHA-256 over the content, hashed in
/// streaming fashion so large files never sit in memory.
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::error::MurkProtocolError;
use crate::types::FileId;

/// Chunk size used by the transfer engine.
pub const CHUNK_SIZE: u64 = 256 * 1024;

/// Create (or truncate) a file pre-sized to `size` bytes.
pub async fn create_sized_file(path: &Path, size: u64) -> Result<File, MurkProtocolError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(MurkProtocolError::Io)?;
    file.set_len(size).await.map_err(MurkProtocolError::Io)?;
    Ok(file)
}

/// Remove a file, tolerating its absence.
pub async fn remove_if_exists(path: &Path) -> Result<(), MurkProtocolError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(MurkProtocolError::Io(err)),
    }
}

/// True when `path` exists with exactly `size` bytes — the completion
/// check a resumed download runs before re-fetching anything.
pub async fn exists_with_size(path: &Path, size: u64) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() == size,
        Err(_) => false,
    }
}

/// Streaming SHA-256 of the file content.
pub async fn hash_file(path: &Path) -> Result<FileId, MurkProtocolError> {
    let mut file = File::open(path).await.map_err(MurkProtocolError::Io)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await.map_err(MurkProtocolError::Io)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(FileId(hasher.finalize().into()))
}

/// Read chunk `index` (up to [`CHUNK_SIZE`] bytes, shorter at the tail).
pub async fn read_chunk(path: &Path, index: u64) -> Result<Vec<u8>, MurkProtocolError> {
    let mut file = File::open(path).await.map_err(MurkProtocolError::Io)?;
    let len = file
        .metadata()
        .await
        .map_err(MurkProtocolError::Io)?
        .len();
    let offset = index * CHUNK_SIZE;
    if offset >= len {
        return Err(MurkProtocolError::ChunkOutOfRange { index });
    }
    let size = CHUNK_SIZE.min(len - offset) as usize;

    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(MurkProtocolError::Io)?;
    let mut chunk = vec![0u8; size];
    file.read_exact(&mut chunk)
        .await
        .map_err(MurkProtocolError::Io)?;
    Ok(chunk)
}

/// Write chunk `index` at its final offset in a pre-sized file.
pub async fn write_chunk(path: &Path, index: u64, data: &[u8]) -> Result<(), MurkProtocolError> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(MurkProtocolError::Io)?;
    file.seek(SeekFrom::Start(index * CHUNK_SIZE))
        .await
        .map_err(MurkProtocolError::Io)?;
    file.write_all(data).await.map_err(MurkProtocolError::Io)?;
    file.flush().await.map_err(MurkProtocolError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sized_file_then_chunk_writes_out_of_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("download.bin");
        let size = CHUNK_SIZE * 2 + 100;
        create_sized_file(&path, size).await.unwrap();
        assert!(exists_with_size(&path, size).await);

        // Tail first, then head: offsets must be independent.
        write_chunk(&path, 2, &[3u8; 100]).await.unwrap();
        write_chunk(&path, 0, &vec![1u8; CHUNK_SIZE as usize])
            .await
            .unwrap();
        write_chunk(&path, 1, &vec![2u8; CHUNK_SIZE as usize])
            .await
            .unwrap();

        assert_eq!(read_chunk(&path, 0).await.unwrap(), vec![1u8; CHUNK_SIZE as usize]);
        assert_eq!(read_chunk(&path, 2).await.unwrap(), vec![3u8; 100]);
    }

    #[tokio::test]
    async fn read_past_end_is_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.bin");
        create_sized_file(&path, 10).await.unwrap();
        assert!(matches!(
            read_chunk(&path, 1).await.unwrap_err(),
            MurkProtocolError::ChunkOutOfRange { index: 1 }
        ));
    }

    #[tokio::test]
    async fn hash_is_content_stable() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        tokio::fs::write(&a, b"identical content").await.unwrap();
        tokio::fs::write(&b, b"identical content").await.unwrap();
        assert_eq!(hash_file(&a).await.unwrap(), hash_file(&b).await.unwrap());

        tokio::fs::write(&b, b"different content").await.unwrap();
        assert_ne!(hash_file(&a).await.unwrap(), hash_file(&b).await.unwrap());
    }

    #[tokio::test]
    async fn remove_if_exists_tolerates_absence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ghost.bin");
        remove_if_exists(&path).await.unwrap();
        tokio::fs::write(&path, b"x").await.unwrap();
        remove_if_exists(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn exists_with_size_requires_exact_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sized.bin");
        tokio::fs::write(&path, b"12345").await.unwrap();
        assert!(exists_with_size(&path, 5).await);
        assert!(!exists_with_size(&path, 6).await);
        assert!(!exists_with_size(&dir.path().join("missing"), 5).await);
    }
}
