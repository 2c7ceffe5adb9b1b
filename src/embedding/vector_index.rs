// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifier-mapped flat inner-product index persisted to a single file.
//!
//! File layout (little-endian):
//!
//! ```text
//! "SSVI" | u32 version | u32 backend_len | backend utf-8 | u32 dim | u64 count
//! | count x (i64 id | dim x f32) | blake3(all preceding bytes)
//! ```
//!
//! Adding an id that is already present replaces its vector, so every id
//! appears at most once.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::errors::StarsError;

/// Reserved id marking an empty result slot; never stored.
pub const NO_ID: i64 = -1;

const MAGIC: &[u8; 4] = b"SSVI";
const FORMAT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 32;

/// Raw top-k output: parallel arrays, best first.
///
/// Holds `min(k, len)` slots; a request larger than the index is not padded.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits {
    pub scores: Vec<f32>,
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    backend: String,
    dim: usize,
    ids: Vec<i64>,
    /// Row-major, `ids.len() * dim` values
    vectors: Vec<f32>,
    positions: HashMap<i64, usize>,
}

impl VectorIndex {
    /// Creates an empty index of fixed dimension for `backend`.
    pub fn new(backend: impl Into<String>, dim: usize) -> Self {
        Self {
            backend: backend.into(),
            dim,
            ids: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.positions.contains_key(&id)
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn get(&self, id: i64) -> Option<&[f32]> {
        self.positions
            .get(&id)
            .map(|&pos| &self.vectors[pos * self.dim..(pos + 1) * self.dim])
    }

    /// Inserts id-vector pairs, replacing vectors of ids already present.
    ///
    /// Returns the number of ids that were replaced rather than appended.
    /// A vector whose width differs from the index dimension is a
    /// configuration error (the wrong backend wrote to this index).
    pub fn add_with_ids(&mut self, ids: &[i64], vectors: &[Vec<f32>]) -> Result<usize> {
        if ids.len() != vectors.len() {
            anyhow::bail!(
                "add_with_ids called with {} ids and {} vectors",
                ids.len(),
                vectors.len()
            );
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(StarsError::Configuration(format!(
                "embedding width {} does not match index dimension {} (backend '{}')",
                bad.len(),
                self.dim,
                self.backend
            ))
            .into());
        }
        if ids.contains(&NO_ID) {
            anyhow::bail!("id {} is reserved", NO_ID);
        }

        let mut replaced = 0;
        for (&id, vector) in ids.iter().zip(vectors) {
            match self.positions.get(&id) {
                Some(&pos) => {
                    self.vectors[pos * self.dim..(pos + 1) * self.dim].copy_from_slice(vector);
                    replaced += 1;
                }
                None => {
                    self.positions.insert(id, self.ids.len());
                    self.ids.push(id);
                    self.vectors.extend_from_slice(vector);
                }
            }
        }
        Ok(replaced)
    }

    /// Exact top-k by inner product.
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchHits> {
        if query.len() != self.dim {
            return Err(StarsError::Configuration(format!(
                "query embedding width {} does not match index dimension {} (backend '{}')",
                query.len(),
                self.dim,
                self.backend
            ))
            .into());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dim.max(1))
            .map(|row| row.iter().zip(query).map(|(a, b)| a * b).sum::<f32>())
            .enumerate()
            .collect();

        // Stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k.min(self.len()));

        let (ids, scores) = scored
            .into_iter()
            .map(|(pos, score)| (self.ids[pos], score))
            .unzip();
        Ok(SearchHits { scores, ids })
    }

    /// Loads an index written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StarsError::IndexNotFound(path.to_path_buf()).into());
        }
        let data = fs::read(path)
            .with_context(|| format!("Failed to read index: {}", path.display()))?;
        Self::decode(&data).with_context(|| format!("Failed to load index: {}", path.display()))
    }

    /// Writes the index atomically: a sibling temp file is renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let tmp = path.with_extension("vec.tmp");
        fs::write(&tmp, self.encode())
            .with_context(|| format!("Failed to write index: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move index into place: {}", path.display()))?;

        tracing::debug!(path = %path.display(), vectors = self.len(), "index saved");
        Ok(())
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            32 + self.backend.len() + self.ids.len() * (8 + self.dim * 4) + CHECKSUM_LEN,
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.backend.len() as u32).to_le_bytes());
        out.extend_from_slice(self.backend.as_bytes());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        for (pos, id) in self.ids.iter().enumerate() {
            out.extend_from_slice(&id.to_le_bytes());
            for value in &self.vectors[pos * self.dim..(pos + 1) * self.dim] {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        let checksum = blake3::hash(&out);
        out.extend_from_slice(checksum.as_bytes());
        out
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let corrupt = |msg: &str| StarsError::CorruptIndex(msg.to_string());

        if data.len() < MAGIC.len() + CHECKSUM_LEN {
            return Err(corrupt("file is truncated").into());
        }
        let (body, stored) = data.split_at(data.len() - CHECKSUM_LEN);
        if blake3::hash(body).as_bytes() != stored {
            return Err(corrupt("checksum mismatch").into());
        }

        let mut reader = ByteReader::new(body);
        if reader.take(4)? != MAGIC {
            return Err(corrupt("bad magic").into());
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(StarsError::CorruptIndex(format!("unsupported version {}", version)).into());
        }
        let backend_len = reader.u32()? as usize;
        let backend = String::from_utf8(reader.take(backend_len)?.to_vec())
            .map_err(|_| corrupt("backend name is not utf-8"))?;
        let dim = reader.u32()? as usize;
        let count = reader.u64()? as usize;

        let mut index = Self::new(backend, dim);
        index.ids.reserve(count);
        index.vectors.reserve(count.saturating_mul(dim));
        for _ in 0..count {
            let id = reader.i64()?;
            if index.positions.insert(id, index.ids.len()).is_some() {
                return Err(StarsError::CorruptIndex(format!("duplicate id {}", id)).into());
            }
            index.ids.push(id);
            for _ in 0..dim {
                index.vectors.push(reader.f32()?);
            }
        }
        if !reader.is_empty() {
            return Err(corrupt("trailing bytes").into());
        }
        Ok(index)
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(StarsError::CorruptIndex("unexpected end of file".to_string()).into());
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new("test", 3);
        index
            .add_with_ids(
                &[10, 20, 30],
                &[
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.8, 0.6, 0.0],
                ],
            )
            .unwrap();
        index
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.ids, vec![10, 30]);
        assert!((hits.scores[0] - 1.0).abs() < 1e-6);
        assert!((hits.scores[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn search_stops_at_index_size() {
        let index = sample_index();
        let hits = index.search(&[0.0, 1.0, 0.0], 5).unwrap();
        assert_eq!(hits.ids, vec![20, 30, 10]);
        assert_eq!(hits.scores.len(), 3);
        assert!(!hits.ids.contains(&NO_ID));
    }

    #[test]
    fn search_with_huge_k_does_not_allocate_for_it() {
        let mut index = VectorIndex::new("test", 2);
        index.add_with_ids(&[1], &[vec![1.0, 0.0]]).unwrap();
        let hits = index.search(&[1.0, 0.0], usize::MAX).unwrap();
        assert_eq!(hits.ids, vec![1]);
    }

    #[test]
    fn add_with_existing_id_replaces_vector() {
        let mut index = sample_index();
        let replaced = index
            .add_with_ids(&[20, 40], &[vec![0.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]])
            .unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(index.len(), 4);
        assert_eq!(index.get(20), Some(&[0.0, 0.0, 1.0][..]));
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let mut index = sample_index();
        let err = index.add_with_ids(&[1], &[vec![1.0, 0.0]]).unwrap_err();
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::Configuration(_))
        ));
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn save_and_load_preserve_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("index_test.vec");
        let index = sample_index();
        index.save(&path).unwrap();
        assert!(!path.with_extension("vec.tmp").exists());

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.backend(), "test");
        assert_eq!(loaded.dim(), 3);
        assert_eq!(loaded.ids(), &[10, 20, 30]);
        assert_eq!(loaded.get(30), index.get(30));
    }

    #[test]
    fn load_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.vec");
        sample_index().save(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::CorruptIndex(_))
        ));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = VectorIndex::load(&dir.path().join("absent.vec")).unwrap_err();
        assert!(matches!(
            StarsError::classify(&err),
            Some(StarsError::IndexNotFound(_))
        ));
    }
}
