//! The two persisted artifacts of a store.
//!
//! For a store named `notes` inside the index directory:
//!
//! - `notes.index`: the vectors. A fixed header (`RAGVEC01` magic, `u32`
//!   dimension, `u64` count) followed by one record per entry: `u64` id then
//!   `dimension` little-endian `f32` values.
//! - `notes.store`: JSON `{"documents": [...], "metadatas": [...]}` with the
//!   fragment text and metadata of entry `i` at position `i`.
//!
//! Both files are always rewritten in full. Each is written to a temporary
//! sibling and renamed into place, so a crash mid-write leaves the previous
//! version readable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::entry_log::IndexEntry;
use crate::models::Metadata;
use crate::vector_index::IndexError;

const MAGIC: &[u8; 8] = b"RAGVEC01";
const HEADER_LEN: usize = 8 + 4 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct StoreRecord {
    documents: Vec<String>,
    metadatas: Vec<Metadata>,
}

pub fn vectors_path(dir: &Path, store: &str) -> PathBuf {
    dir.join(format!("{}.index", store))
}

pub fn records_path(dir: &Path, store: &str) -> PathBuf {
    dir.join(format!("{}.store", store))
}

/// Write both artifacts for `entries`.
pub fn write<'a, I>(dir: &Path, store: &str, entries: I) -> Result<(), IndexError>
where
    I: Iterator<Item = &'a IndexEntry> + Clone,
{
    fs::create_dir_all(dir).map_err(|source| IndexError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let dimension = entries.clone().next().map(|e| e.vector.len()).unwrap_or(0);
    let count = entries.clone().count();

    let mut blob = Vec::with_capacity(HEADER_LEN + count * (8 + dimension * 4));
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&(dimension as u32).to_le_bytes());
    blob.extend_from_slice(&(count as u64).to_le_bytes());
    for entry in entries.clone() {
        blob.extend_from_slice(&entry.id.to_le_bytes());
        blob.extend_from_slice(&vec_to_blob(&entry.vector));
    }

    let record = StoreRecord {
        documents: entries.clone().map(|e| e.text.clone()).collect(),
        metadatas: entries.map(|e| e.metadata.clone()).collect(),
    };
    let records_file = records_path(dir, store);
    let json = serde_json::to_vec(&record).map_err(|source| IndexError::Serde {
        path: records_file.clone(),
        source,
    })?;

    write_atomic(&records_file, &json)?;
    write_atomic(&vectors_path(dir, store), &blob)?;
    Ok(())
}

/// Read both artifacts.
///
/// `Ok(None)` means the store has never been written. A store with only one
/// of its two artifacts, or whose artifacts disagree, is [`IndexError::Corrupt`].
pub fn read(dir: &Path, store: &str) -> Result<Option<Vec<IndexEntry>>, IndexError> {
    let vectors_file = vectors_path(dir, store);
    let records_file = records_path(dir, store);

    let blob = read_optional(&vectors_file)?;
    let json = read_optional(&records_file)?;

    let (blob, json) = match (blob, json) {
        (None, None) => return Ok(None),
        (Some(b), Some(j)) => (b, j),
        (Some(_), None) => return Err(corrupt(store, "document record is missing")),
        (None, Some(_)) => return Err(corrupt(store, "vector file is missing")),
    };

    let record: StoreRecord = serde_json::from_slice(&json).map_err(|source| IndexError::Serde {
        path: records_file,
        source,
    })?;
    let vectors = decode_vectors(store, &blob)?;

    if record.documents.len() != record.metadatas.len() {
        return Err(corrupt(
            store,
            format!(
                "{} documents but {} metadatas",
                record.documents.len(),
                record.metadatas.len()
            ),
        ));
    }
    if record.documents.len() != vectors.len() {
        return Err(corrupt(
            store,
            format!(
                "{} documents but {} vectors",
                record.documents.len(),
                vectors.len()
            ),
        ));
    }

    let entries = vectors
        .into_iter()
        .zip(record.documents)
        .zip(record.metadatas)
        .map(|(((id, vector), text), metadata)| IndexEntry {
            id,
            vector,
            text,
            metadata,
        })
        .collect();
    Ok(Some(entries))
}

/// Number of vectors recorded in the header of the vector file, or `None`
/// when the file does not exist. Only the header is read.
pub fn vector_count(dir: &Path, store: &str) -> Result<Option<usize>, IndexError> {
    let path = vectors_path(dir, store);
    let mut file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(IndexError::Io { path, source }),
    };

    let mut header = [0u8; HEADER_LEN];
    if file.read_exact(&mut header).is_err() || &header[..8] != MAGIC {
        return Err(corrupt(store, "vector file has an invalid header"));
    }
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[12..20]);
    Ok(Some(u64::from_le_bytes(count_bytes) as usize))
}

/// Delete both artifacts. Missing files are not an error.
pub fn remove(dir: &Path, store: &str) -> Result<(), IndexError> {
    for path in [vectors_path(dir, store), records_path(dir, store)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(IndexError::Io { path, source }),
        }
    }
    Ok(())
}

fn decode_vectors(store: &str, blob: &[u8]) -> Result<Vec<(u64, Vec<f32>)>, IndexError> {
    if blob.len() < HEADER_LEN || &blob[..8] != MAGIC {
        return Err(corrupt(store, "vector file has an invalid header"));
    }
    let dimension = u32::from_le_bytes([blob[8], blob[9], blob[10], blob[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&blob[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let record_len = 8 + dimension * 4;
    let body = &blob[HEADER_LEN..];
    if body.len() != count.saturating_mul(record_len) {
        return Err(corrupt(
            store,
            format!(
                "vector file holds {} bytes, expected {} vectors of dimension {}",
                body.len(),
                count,
                dimension
            ),
        ));
    }

    let mut vectors = Vec::with_capacity(count);
    for record in body.chunks_exact(record_len) {
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&record[..8]);
        vectors.push((u64::from_le_bytes(id_bytes), blob_to_vec(&record[8..])));
    }
    Ok(vectors)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, IndexError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(IndexError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|source| IndexError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn corrupt(store: &str, reason: impl Into<String>) -> IndexError {
    IndexError::Corrupt {
        store: store.to_string(),
        reason: reason.into(),
    }
}
