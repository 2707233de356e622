//! Binary storage for the issue collection.
//!
//! File format: issues.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, in insertion order):
//! - id_len: u16 (little-endian), followed by the UTF-8 issue id
//! - content_hash: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian)
//! - payload_len: u32 (little-endian), followed by the JSON payload

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::identity::IssueId;
use crate::issue::IssuePayload;
use crate::semantic::index::{VectorEntry, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl VectorStorageError {
    /// Whether the file was written for another model or format and should
    /// be replaced rather than reported as broken.
    pub fn is_incompatible(&self) -> bool {
        matches!(
            self,
            VectorStorageError::ModelMismatch
                | VectorStorageError::VersionMismatch(..)
                | VectorStorageError::DimensionMismatch { .. }
        )
    }
}

/// Durable home of a collection.
pub trait IndexPersistence: Send + Sync {
    /// Restore a previously persisted index.
    ///
    /// `Ok(None)` means there is nothing usable and the caller starts empty:
    /// either nothing was persisted yet, or it was persisted for another model.
    fn restore(
        &self,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<Option<VectorIndex>, VectorStorageError>;

    fn persist(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError>;
}

/// Storage manager for the issue collection.
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index from storage.
    ///
    /// Fails if the file is missing, corrupted, or was written for a different
    /// model or dimension.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        header.validate(expected_model_id, expected_dimensions)?;

        let dimensions = header.dimensions as usize;
        let mut index = VectorIndex::with_capacity(dimensions, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let entry = read_entry(&mut reader, dimensions).map_err(truncated)?;
            let id = entry.id.clone();
            if let Err(err) = index.insert(entry) {
                log::warn!("skipping stored issue {id}: {err}");
            }
        }

        Ok(index)
    }

    /// Save the index to storage.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        if let Err(err) = write_to_file(&temp_path, index, model_id) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl IndexPersistence for VectorStorage {
    fn restore(
        &self,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<Option<VectorIndex>, VectorStorageError> {
        if !self.exists() {
            return Ok(None);
        }

        match self.load(model_id, dimensions) {
            Ok(index) => {
                log::info!(
                    "restored {} issues from {}",
                    index.len(),
                    self.path.display()
                );
                Ok(Some(index))
            }
            Err(err) if err.is_incompatible() => {
                log::warn!(
                    "ignoring {}: {err}, the collection will be rebuilt",
                    self.path.display()
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn persist(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.save(index, model_id)
    }
}

fn truncated(err: VectorStorageError) -> VectorStorageError {
    match err {
        VectorStorageError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
            VectorStorageError::InvalidFormat("file is truncated".to_string())
        }
        other => other,
    }
}

fn write_to_file(
    path: &Path,
    index: &VectorIndex,
    model_id: &[u8; 32],
) -> Result<(), VectorStorageError> {
    let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!("{} dimensions do not fit", index.dimensions()))
    })?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header = Header {
        version: FORMAT_VERSION,
        model_id: *model_id,
        dimensions,
        entry_count: index.len() as u64,
    };
    write_header(&mut writer, &header)?;

    for entry in index.iter() {
        write_entry(&mut writer, entry)?;
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => VectorStorageError::InvalidFormat("header is truncated".into()),
        _ => err.into(),
    })?;

    // Verify checksum (computed over header without checksum field)
    let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[43..47]));
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    Ok(Header {
        version,
        model_id,
        dimensions: u16::from_le_bytes(le_array(&header_bytes[33..35])),
        entry_count: u64::from_le_bytes(le_array(&header_bytes[35..43])),
    })
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_entry(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<VectorEntry, VectorStorageError> {
    let id_len = u16::from_le_bytes(read_array(reader)?) as usize;
    let mut id_bytes = vec![0u8; id_len];
    reader.read_exact(&mut id_bytes)?;
    let id = String::from_utf8(id_bytes)
        .map_err(|_| VectorStorageError::InvalidFormat("issue id is not UTF-8".to_string()))?;

    let content_hash = u64::from_le_bytes(read_array(reader)?);

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        embedding.push(f32::from_le_bytes(read_array(reader)?));
    }

    let payload_len = u32::from_le_bytes(read_array(reader)?) as usize;
    let mut payload_bytes = vec![0u8; payload_len];
    reader.read_exact(&mut payload_bytes)?;
    let payload: IssuePayload = serde_json::from_slice(&payload_bytes)?;

    Ok(VectorEntry {
        id: IssueId::from(id),
        content_hash,
        embedding,
        payload,
    })
}

fn write_entry(writer: &mut impl Write, entry: &VectorEntry) -> Result<(), VectorStorageError> {
    let id_len = u16::try_from(entry.id.len()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!("issue id {} is too long", entry.id))
    })?;
    writer.write_all(&id_len.to_le_bytes())?;
    writer.write_all(entry.id.as_bytes())?;

    writer.write_all(&entry.content_hash.to_le_bytes())?;

    for &value in &entry.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    let payload = serde_json::to_vec(&entry.payload)?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        VectorStorageError::InvalidFormat(format!("payload of {} is too large", entry.id))
    })?;
    writer.write_all(&payload_len.to_le_bytes())?;
    writer.write_all(&payload)?;

    Ok(())
}

fn read_array<const N: usize>(reader: &mut impl Read) -> std::io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn validate(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if self.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        if self.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: self.dimensions as usize,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::{Seek, SeekFrom};
    use tempfile::TempDir;

    fn storage_in(dir: &TempDir) -> VectorStorage {
        VectorStorage::new(dir.path().join("issues.bin"))
    }

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn entry(id: &str, content_hash: u64, embedding: Vec<f32>) -> VectorEntry {
        let mut metadata = BTreeMap::new();
        metadata.insert("url".to_string(), format!("https://x.dev/{id}"));
        VectorEntry {
            id: IssueId::from(id),
            content_hash,
            embedding,
            payload: IssuePayload {
                title: format!("Issue {id}"),
                body: "ünïcode body".to_string(),
                labels: vec!["bug".to_string()],
                metadata,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_save_and_load_empty() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        let model_id = test_model_id();

        storage.save(&VectorIndex::new(384), &model_id).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(&model_id, 384).unwrap();
        assert_eq!(loaded.len(), 0);
        assert_eq!(loaded.dimensions(), 384);
    }

    #[test]
    fn test_save_and_load_with_entries() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(entry("b", 200, vec![0.0, 1.0, 0.0])).unwrap();
        index.insert(entry("a", 100, vec![1.0, 0.0, 0.0])).unwrap();
        index.insert(entry("c", 300, vec![0.0, 0.0, 1.0])).unwrap();

        storage.save(&index, &model_id).unwrap();
        let loaded = storage.load(&model_id, 3).unwrap();

        assert_eq!(loaded.len(), 3);
        let original: Vec<&VectorEntry> = index.iter().collect();
        let restored: Vec<&VectorEntry> = loaded.iter().collect();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_model_mismatch_is_incompatible() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        storage.save(&VectorIndex::new(3), &test_model_id()).unwrap();

        let mut wrong_model_id = [0u8; 32];
        wrong_model_id[0] = 0xFF;

        let err = storage.load(&wrong_model_id, 3).unwrap_err();
        assert!(matches!(err, VectorStorageError::ModelMismatch));
        assert!(err.is_incompatible());

        // restore treats it as "start fresh"
        assert!(storage.restore(&wrong_model_id, 3).unwrap().is_none());
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        let model_id = test_model_id();
        storage.save(&VectorIndex::new(3), &model_id).unwrap();

        let result = storage.load(&model_id, 384);
        assert!(matches!(result, Err(VectorStorageError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);

        assert!(storage.restore(&test_model_id(), 3).unwrap().is_none());
    }

    #[test]
    fn test_persist_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let storage = VectorStorage::new(dir.path().join("nested/deeper/issues.bin"));
        let model_id = test_model_id();

        let mut index = VectorIndex::new(2);
        index.insert(entry("a", 1, vec![1.0, 0.0])).unwrap();
        storage.persist(&index, &model_id).unwrap();

        let restored = storage.restore(&model_id, 2).unwrap().unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn test_atomic_write_cleans_up_on_error() {
        let path = PathBuf::from("/nonexistent/directory/issues.bin");
        let storage = VectorStorage::new(path.clone());

        let result = storage.save(&VectorIndex::new(3), &test_model_id());

        assert!(result.is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(entry("a", 100, vec![1.0, 0.0, 0.0])).unwrap();
        storage.save(&index, &model_id).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        file.seek(SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result = storage.load(&model_id, 3);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));

        // corruption is an error, not a silent reset
        assert!(storage.restore(&model_id, 3).is_err());
    }

    #[test]
    fn test_truncated_file() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        let model_id = test_model_id();

        let mut index = VectorIndex::new(3);
        index.insert(entry("a", 100, vec![1.0, 0.0, 0.0])).unwrap();
        storage.save(&index, &model_id).unwrap();

        let len = std::fs::metadata(storage.path()).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        file.set_len(len - 5).unwrap();

        let result = storage.load(&model_id, 3);
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }
}
