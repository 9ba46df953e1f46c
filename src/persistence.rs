//! Tensor and snapshot persistence.
//!
//! Two file families:
//!
//! - **Vectors binary format** (little-endian, documented):
//!
//!   ```text
//!   ┌──────────┬─────────┬────────┬─────┬─────┬──────────────┬─────────────┐
//!   │ "PXVC"   │ u16 ver │ u8 end │ i32 │ i32 │ ids          │ f64 values  │
//!   │ magic    │   = 1   │  = 1   │ num │ dim │ (u32-prefix) │ (row-major) │
//!   └──────────┴─────────┴────────┴─────┴─────┴──────────────┴─────────────┘
//!   ```
//!
//! - **Snapshot documents**: JSON objects carrying `(kind, version)` tags;
//!   index snapshots come from [`Index::snapshot`] already tagged, and the
//!   restore side rejects tag mismatches.
//!
//! Both families are optionally gzip-compressed on write; reads sniff the
//! gzip magic bytes, so a manager with compression off still loads
//! compressed files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{ProximaError, Result};
use crate::index::Index;
use crate::types::VectorId;

/// Leading magic bytes of the vectors binary format.
const MAGIC: &[u8; 4] = b"PXVC";

/// Current vectors file format version.
const FORMAT_VERSION: u16 = 1;

/// Endianness tag: 1 = little-endian (the only value written).
const ENDIAN_LITTLE: u8 = 1;

/// Gzip stream magic bytes, used to sniff compressed files on load.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Saves and loads vectors, state documents, and index snapshots.
#[derive(Clone, Debug, Default)]
pub struct PersistenceManager {
    compress: bool,
}

impl PersistenceManager {
    /// Creates a manager that writes uncompressed files.
    pub fn new() -> Self {
        Self { compress: false }
    }

    /// Enables or disables gzip compression on write.
    pub fn with_compression(compress: bool) -> Self {
        Self { compress }
    }

    /// True if writes are gzip-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Writes `ids` and their `vectors` to the binary vectors file.
    ///
    /// `ids` and `vectors` must be parallel slices; every vector must have
    /// the same length. Missing parent directories are created.
    pub fn save_vectors(
        &self,
        path: impl AsRef<Path>,
        ids: &[VectorId],
        vectors: &[Vec<f64>],
    ) -> Result<()> {
        let path = path.as_ref();
        if ids.len() != vectors.len() {
            return Err(ProximaError::persistence(format!(
                "ids ({}) and vectors ({}) length mismatch",
                ids.len(),
                vectors.len()
            )));
        }
        let dimensions = vectors.first().map_or(0, |v| v.len());
        if vectors.iter().any(|v| v.len() != dimensions) {
            return Err(ProximaError::persistence(
                "all vectors must share one dimension",
            ));
        }

        let mut writer = self.open_writer(path)?;
        writer
            .write_all(MAGIC)
            .and_then(|_| writer.write_u16::<LittleEndian>(FORMAT_VERSION))
            .and_then(|_| writer.write_u8(ENDIAN_LITTLE))
            .and_then(|_| writer.write_i32::<LittleEndian>(ids.len() as i32))
            .and_then(|_| writer.write_i32::<LittleEndian>(dimensions as i32))
            .map_err(|e| ProximaError::persistence(format!("write header: {e}")))?;

        for id in ids {
            let bytes = id.as_str().as_bytes();
            writer
                .write_u32::<LittleEndian>(bytes.len() as u32)
                .and_then(|_| writer.write_all(bytes))
                .map_err(|e| ProximaError::persistence(format!("write id: {e}")))?;
        }
        for vector in vectors {
            for &value in vector {
                writer
                    .write_f64::<LittleEndian>(value)
                    .map_err(|e| ProximaError::persistence(format!("write value: {e}")))?;
            }
        }
        writer
            .flush()
            .map_err(|e| ProximaError::persistence(format!("flush: {e}")))?;

        debug!(path = %path.display(), vectors = ids.len(), dimensions, "Saved vectors file");
        Ok(())
    }

    /// Loads a vectors file written by [`Self::save_vectors`].
    pub fn load_vectors(&self, path: impl AsRef<Path>) -> Result<(Vec<VectorId>, Vec<Vec<f64>>)> {
        let path = path.as_ref();
        let mut reader = open_reader(path)?;

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| ProximaError::persistence(format!("read header: {e}")))?;
        if &magic != MAGIC {
            return Err(ProximaError::persistence(format!(
                "{} is not a Proxima vectors file",
                path.display()
            )));
        }
        let version = reader
            .read_u16::<LittleEndian>()
            .map_err(|e| ProximaError::persistence(format!("read version: {e}")))?;
        if version != FORMAT_VERSION {
            return Err(ProximaError::persistence(format!(
                "unsupported vectors file version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let endian = reader
            .read_u8()
            .map_err(|e| ProximaError::persistence(format!("read endian tag: {e}")))?;
        if endian != ENDIAN_LITTLE {
            return Err(ProximaError::persistence(format!(
                "unsupported endianness tag {endian}"
            )));
        }

        let num = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| ProximaError::persistence(format!("read count: {e}")))?;
        let dimensions = reader
            .read_i32::<LittleEndian>()
            .map_err(|e| ProximaError::persistence(format!("read dimensions: {e}")))?;
        if num < 0 || dimensions < 0 {
            return Err(ProximaError::persistence("negative count in header"));
        }

        let mut ids = Vec::with_capacity(num as usize);
        for _ in 0..num {
            let len = reader
                .read_u32::<LittleEndian>()
                .map_err(|e| ProximaError::persistence(format!("read id length: {e}")))?;
            let mut buf = vec![0u8; len as usize];
            reader
                .read_exact(&mut buf)
                .map_err(|e| ProximaError::persistence(format!("read id: {e}")))?;
            let id = String::from_utf8(buf)
                .map_err(|e| ProximaError::persistence(format!("id is not UTF-8: {e}")))?;
            ids.push(VectorId::new(id));
        }

        let mut vectors = Vec::with_capacity(num as usize);
        for _ in 0..num {
            let mut vector = Vec::with_capacity(dimensions as usize);
            for _ in 0..dimensions {
                vector.push(
                    reader
                        .read_f64::<LittleEndian>()
                        .map_err(|e| ProximaError::persistence(format!("read value: {e}")))?,
                );
            }
            vectors.push(vector);
        }

        Ok((ids, vectors))
    }

    /// Writes a tagged JSON state document.
    pub fn save_state(&self, path: impl AsRef<Path>, state: &serde_json::Value) -> Result<()> {
        self.write_json(path.as_ref(), state)
    }

    /// Reads a JSON state document. Tag verification is the caller's
    /// responsibility (the document's consumer knows its expected kind).
    pub fn load_state(&self, path: impl AsRef<Path>) -> Result<serde_json::Value> {
        read_json(path.as_ref())
    }

    /// Writes an index snapshot (already `(kind, version)`-tagged by
    /// [`Index::snapshot`]).
    pub fn save_index(&self, path: impl AsRef<Path>, index: &dyn Index) -> Result<()> {
        let snapshot = index.snapshot()?;
        self.write_json(path.as_ref(), &snapshot)
    }

    /// Restores an index from a snapshot file. The index rejects kind and
    /// version mismatches.
    pub fn load_index(&self, path: impl AsRef<Path>, index: &mut dyn Index) -> Result<()> {
        let snapshot = read_json(path.as_ref())?;
        index.restore(&snapshot)
    }

    fn open_writer(&self, path: &Path) -> Result<Box<dyn Write>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ProximaError::persistence(format!("create {}: {e}", parent.display()))
                })?;
            }
        }
        let file = File::create(path)
            .map_err(|e| ProximaError::persistence(format!("create {}: {e}", path.display())))?;
        let writer = BufWriter::new(file);
        Ok(if self.compress {
            Box::new(GzEncoder::new(writer, Compression::default()))
        } else {
            Box::new(writer)
        })
    }

    fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<()> {
        let mut writer = self.open_writer(path)?;
        let bytes = serde_json::to_vec(value)
            .map_err(|e| ProximaError::persistence(format!("serialize snapshot: {e}")))?;
        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| ProximaError::persistence(format!("write {}: {e}", path.display())))?;
        Ok(())
    }
}

/// Opens a file for reading, transparently decompressing gzip streams.
fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let mut file = File::open(path)
        .map_err(|e| ProximaError::persistence(format!("open {}: {e}", path.display())))?;

    let mut magic = [0u8; 2];
    let sniffed = file.read(&mut magic).unwrap_or(0);
    use std::io::Seek;
    file.rewind()
        .map_err(|e| ProximaError::persistence(format!("rewind: {e}")))?;

    let reader = BufReader::new(file);
    Ok(if sniffed == 2 && magic == GZIP_MAGIC {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    })
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let mut reader = open_reader(path)?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| ProximaError::persistence(format!("read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProximaError::persistence(format!("parse snapshot: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::distance::Metric;
    use crate::index::FlatIndex;
    use crate::index::{open_index, Index};
    use tempfile::tempdir;

    fn sample() -> (Vec<VectorId>, Vec<Vec<f64>>) {
        let ids = vec![
            VectorId::new("first"),
            VectorId::new("second"),
            VectorId::new("third"),
        ];
        let vectors = vec![
            vec![1.0, -2.5, 3.25],
            vec![0.0, f64::MIN_POSITIVE, 1e300],
            vec![-0.125, 42.0, 0.1 + 0.2],
        ];
        (ids, vectors)
    }

    #[test]
    fn test_vectors_roundtrip_uncompressed_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let manager = PersistenceManager::new();

        let (ids, vectors) = sample();
        manager.save_vectors(&path, &ids, &vectors).unwrap();
        let (loaded_ids, loaded_vectors) = manager.load_vectors(&path).unwrap();

        assert_eq!(loaded_ids, ids);
        // Bit-exact: every f64 survives the round trip unchanged
        for (original, loaded) in vectors.iter().zip(loaded_vectors.iter()) {
            for (a, b) in original.iter().zip(loaded.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_vectors_roundtrip_compressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.bin.gz");
        let manager = PersistenceManager::with_compression(true);

        let (ids, vectors) = sample();
        manager.save_vectors(&path, &ids, &vectors).unwrap();

        // An uncompressed manager sniffs the gzip magic and still loads
        let (loaded_ids, loaded_vectors) = PersistenceManager::new().load_vectors(&path).unwrap();
        assert_eq!(loaded_ids, ids);
        assert_eq!(loaded_vectors, vectors);
    }

    #[test]
    fn test_empty_vectors_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let manager = PersistenceManager::new();

        manager.save_vectors(&path, &[], &[]).unwrap();
        let (ids, vectors) = manager.load_vectors(&path).unwrap();
        assert!(ids.is_empty());
        assert!(vectors.is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"not a vectors file").unwrap();

        let err = PersistenceManager::new().load_vectors(&path).unwrap_err();
        assert!(err.to_string().contains("not a Proxima vectors file"));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.bin");
        let manager = PersistenceManager::new();
        let err = manager
            .save_vectors(&path, &[VectorId::new("a")], &[])
            .unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn test_ragged_vectors_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.bin");
        let manager = PersistenceManager::new();
        let err = manager
            .save_vectors(
                &path,
                &[VectorId::new("a"), VectorId::new("b")],
                &[vec![1.0], vec![1.0, 2.0]],
            )
            .unwrap_err();
        assert!(err.to_string().contains("share one dimension"));
    }

    #[test]
    fn test_parent_directories_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deep/nested/dir/vectors.bin");
        let manager = PersistenceManager::new();
        let (ids, vectors) = sample();
        manager.save_vectors(&path, &ids, &vectors).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_state_document_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let manager = PersistenceManager::new();

        let state = serde_json::json!({
            "kind": "proxima.db",
            "version": 1,
            "state": {"dimension": 128}
        });
        manager.save_state(&path, &state).unwrap();
        let loaded = manager.load_state(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_index_snapshot_roundtrip_via_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        let manager = PersistenceManager::with_compression(true);

        let mut index = FlatIndex::new(3, Metric::Euclidean);
        index.insert(&VectorId::new("a"), &[1.0, 2.0, 3.0]).unwrap();
        index.insert(&VectorId::new("b"), &[4.0, 5.0, 6.0]).unwrap();
        manager.save_index(&path, &index).unwrap();

        let mut restored = FlatIndex::new(3, Metric::Euclidean);
        manager.load_index(&path, &mut restored).unwrap();
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_index_snapshot_kind_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        let manager = PersistenceManager::new();

        let mut flat = FlatIndex::new(3, Metric::Euclidean);
        flat.insert(&VectorId::new("a"), &[1.0, 2.0, 3.0]).unwrap();
        manager.save_index(&path, &flat).unwrap();

        // Loading a flat snapshot into an HNSW index must fail on the tag
        let mut hnsw = open_index(3, &IndexConfig::hnsw(Metric::Euclidean)).unwrap();
        let err = manager.load_index(&path, hnsw.as_mut()).unwrap_err();
        assert!(err.is_index());
    }
}
