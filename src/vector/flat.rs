//! Exact-scan [`VectorBackend`] with dense row storage.
//!
//! Rows live in one contiguous `Vec<f32>`; `keys[i]` names row `i` and
//! `slots` maps each key back to its row. Removal swap-removes the row and
//! patches the slot of the key that moved into the hole, so the table is
//! correct after every structural change and not only after a rebuild.
//!
//! # File format
//!
//! All integers little-endian:
//!
//! ```text
//! magic    b"SIDXVEC1"
//! version  u32
//! metric   u8          (0 = cosine, 1 = squared euclidean)
//! dim      u32
//! count    u32
//! count × { key_len u32, key utf-8, dim × f32 }
//! ```

use std::collections::HashMap;
use std::io;
use std::path::Path;

use super::{Metric, VectorBackend};
use crate::embedding::check_dimension;
use crate::error::{IndexError, Result};
use crate::persist::write_atomic;

const MAGIC: &[u8; 8] = b"SIDXVEC1";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    rows: Vec<f32>,
    keys: Vec<String>,
    slots: HashMap<String, usize>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            rows: Vec::new(),
            keys: Vec::new(),
            slots: HashMap::new(),
        }
    }

    fn row(&self, slot: usize) -> &[f32] {
        &self.rows[slot * self.dimension..(slot + 1) * self.dimension]
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            MAGIC.len() + 13 + self.rows.len() * 4 + self.keys.iter().map(|k| k.len() + 4).sum::<usize>(),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.push(self.metric.to_byte());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.keys.len() as u32).to_le_bytes());
        for (slot, key) in self.keys.iter().enumerate() {
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            for v in self.row(slot) {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }
}

impl VectorBackend for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    fn add(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimension, vector)?;
        match self.slots.get(key) {
            Some(&slot) => {
                let dim = self.dimension;
                self.rows[slot * dim..(slot + 1) * dim].copy_from_slice(vector);
            }
            None => {
                self.slots.insert(key.to_string(), self.keys.len());
                self.keys.push(key.to_string());
                self.rows.extend_from_slice(vector);
            }
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(slot) = self.slots.remove(key) else {
            return false;
        };
        let dim = self.dimension;
        let last = self.keys.len() - 1;
        if slot != last {
            self.rows.copy_within(last * dim..(last + 1) * dim, slot * dim);
        }
        self.rows.truncate(last * dim);
        self.keys.swap_remove(slot);
        if slot < self.keys.len() {
            self.slots.insert(self.keys[slot].clone(), slot);
        }
        true
    }

    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<(String, f32)>> {
        check_dimension(self.dimension, vector)?;

        let mut scored: Vec<(usize, f32)> = (0..self.keys.len())
            .map(|slot| (slot, self.metric.distance(vector, self.row(slot))))
            .collect();

        // Ascending distance; ties broken by key for a stable order.
        scored.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| self.keys[a.0].cmp(&self.keys[b.0]))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(slot, distance)| (self.keys[slot].clone(), distance))
            .collect())
    }

    fn rebuild(&mut self) {
        let slots: HashMap<String, usize> = self
            .keys
            .iter()
            .enumerate()
            .map(|(slot, key)| (key.clone(), slot))
            .collect();
        self.slots = slots;
        self.rows.shrink_to_fit();
        self.keys.shrink_to_fit();
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.encode())
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| IndexError::storage(path, e))?;
        decode(&bytes).map_err(|e| IndexError::storage(path, e))
    }

    fn reset(&mut self, dimension: usize) {
        self.dimension = dimension;
        self.rows = Vec::new();
        self.keys = Vec::new();
        self.slots = HashMap::new();
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| invalid("vector index truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> io::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> io::Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn decode(bytes: &[u8]) -> io::Result<FlatIndex> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(MAGIC.len())? != MAGIC {
        return Err(invalid("not a vector index file"));
    }
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(invalid(format!(
            "unsupported vector index version {version} (expected {FORMAT_VERSION})"
        )));
    }
    let metric_byte = r.take(1)?[0];
    let metric = Metric::from_byte(metric_byte)
        .ok_or_else(|| invalid(format!("unknown metric tag {metric_byte}")))?;
    let dimension = r.u32()? as usize;
    let count = r.u32()? as usize;

    let mut index = FlatIndex::new(dimension, metric);
    let mut row = Vec::with_capacity(dimension);
    for _ in 0..count {
        let key_len = r.u32()? as usize;
        let key = std::str::from_utf8(r.take(key_len)?)
            .map_err(|_| invalid("vector key is not valid UTF-8"))?
            .to_string();
        row.clear();
        for _ in 0..dimension {
            row.push(r.f32()?);
        }
        if index.contains(&key) {
            return Err(invalid(format!("duplicate vector key {key}")));
        }
        index
            .add(&key, &row)
            .map_err(|e| invalid(e.to_string()))?;
    }
    if r.pos != bytes.len() {
        return Err(invalid("trailing bytes after vector index"));
    }
    Ok(index)
}
