pub mod record;

use crate::error::{GeocubeError, Result};
use crate::point::{DataBatch, DataPoint};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Head/tail offsets of one cell's singly-linked record chain within a
/// metacube's byte arena.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CubeCell {
    pub count: i32,
    pub cell_head: u32,
    pub cell_tail: u32,
}

/// Persisted metadata for one leaf's metacube. Written to `<id>.meta`
/// as JSON; the arena itself lives in the sibling `<id>.data` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaInfo {
    pub cube_size: u32,
    pub cube_index: i32,
    pub dims: Vec<u32>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
    pub cells: Vec<CubeCell>,
    pub global_offset: u32,
}

/// One leaf's packed data: metadata plus (when loaded) the byte arena.
/// `insert_time`/`access_count` are cache bookkeeping, not persisted —
/// they reset whenever the cube is reloaded from disk.
pub struct MetaCube {
    pub meta: MetaInfo,
    data: Vec<u8>,
    loaded: bool,
    pub insert_time: Instant,
    pub access_count: u64,
}

fn cube_dir(root: &Path, cube_id: i32) -> PathBuf {
    root.join(cube_id.to_string())
}

fn data_path(root: &Path, cube_id: i32) -> PathBuf {
    cube_dir(root, cube_id).join(format!("{cube_id}.data"))
}

fn meta_path(root: &Path, cube_id: i32) -> PathBuf {
    cube_dir(root, cube_id).join(format!("{cube_id}.meta"))
}

/// Path to a cube's on-disk metadata file, for callers (e.g. the cache
/// manager) that need to remember where an evicted cube lives.
pub fn meta_file_path(root: &Path, cube_id: i32) -> PathBuf {
    meta_path(root, cube_id)
}

fn io_err(path: &Path, source: std::io::Error) -> GeocubeError {
    GeocubeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl MetaCube {
    pub fn new(cube_id: i32, capacity: u32, dims: Vec<u32>, mins: Vec<f64>, maxs: Vec<f64>) -> Self {
        MetaCube {
            meta: MetaInfo {
                cube_size: capacity,
                cube_index: cube_id,
                dims,
                mins,
                maxs,
                cells: vec![CubeCell::default(); capacity as usize],
                global_offset: 0,
            },
            data: Vec::new(),
            loaded: true,
            insert_time: Instant::now(),
            access_count: 0,
        }
    }

    pub fn from_batch(batch: &DataBatch) -> Result<Self> {
        let mut cube = MetaCube::new(
            batch.cube_id,
            batch.capacity,
            batch.dims.clone(),
            batch.mins.clone(),
            batch.maxs.clone(),
        );
        for p in &batch.points {
            cube.feed_point(p)?;
        }
        Ok(cube)
    }

    pub fn cube_id(&self) -> i32 {
        self.meta.cube_index
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn point_count(&self) -> u32 {
        self.meta.cells.iter().map(|c| c.count.max(0) as u32).sum()
    }

    fn not_loaded(&self) -> GeocubeError {
        GeocubeError::InvariantViolation(format!(
            "metacube {} accessed before its data arena was loaded",
            self.meta.cube_index
        ))
    }

    /// Appends `point` to its cell's chain. `point.idx` must already be
    /// the cell index computed by the tree.
    pub fn feed_point(&mut self, point: &DataPoint) -> Result<()> {
        if !self.loaded {
            return Err(self.not_loaded());
        }
        let cell_idx = point.idx as usize;
        if cell_idx >= self.meta.cells.len() {
            return Err(GeocubeError::Corrupted {
                cube_id: self.meta.cube_index,
                reason: format!("cell index {cell_idx} out of bounds"),
            });
        }
        let mut encoded = record::encode(point, cell_idx as u32);
        let offset = self.meta.global_offset;
        encoded.patch_next_offset(0);
        let record_len = encoded.len() as u32;

        let cell = &mut self.meta.cells[cell_idx];
        if cell.count == 0 {
            cell.cell_head = offset;
        } else {
            let prev_tail = cell.cell_tail as usize;
            BigEndian::write_u32(&mut self.data[prev_tail..prev_tail + 4], offset);
        }
        cell.cell_tail = offset;
        cell.count += 1;

        self.data.extend_from_slice(&encoded.bytes);
        self.meta.global_offset += record_len;
        Ok(())
    }

    /// Walks one cell's chain, decoding every record in it.
    pub fn read_single(&self, cell_idx: usize) -> Result<Vec<DataPoint>> {
        if !self.loaded {
            return Err(self.not_loaded());
        }
        let cell = self
            .meta
            .cells
            .get(cell_idx)
            .ok_or_else(|| GeocubeError::Corrupted {
                cube_id: self.meta.cube_index,
                reason: format!("cell index {cell_idx} out of bounds"),
            })?;
        let mut out = Vec::with_capacity(cell.count.max(0) as usize);
        let mut offset = cell.cell_head as usize;
        for _ in 0..cell.count {
            let (rec, _) = record::decode(&self.data, offset, self.meta.cube_index)?;
            offset = rec.next_offset as usize;
            let mut p = rec.point;
            p.idx = cell_idx as i32;
            out.push(p);
        }
        Ok(out)
    }

    /// Walks one cell's chain straight off the on-disk arena, without
    /// loading the rest of the file into memory. Each hop seeks to the
    /// record's offset, reads just its header to learn the body length,
    /// then reads the body and follows `next_offset`.
    pub fn read_single_from_disk(&self, root: &Path, cell_idx: usize) -> Result<Vec<DataPoint>> {
        let cell = self
            .meta
            .cells
            .get(cell_idx)
            .ok_or_else(|| GeocubeError::Corrupted {
                cube_id: self.meta.cube_index,
                reason: format!("cell index {cell_idx} out of bounds"),
            })?;
        let dpath = data_path(root, self.meta.cube_index);
        let mut file = File::open(&dpath).map_err(|e| io_err(&dpath, e))?;

        let prefix_len = record::NEXT_OFFSET_LEN + record::HEADER_LEN;
        let mut out = Vec::with_capacity(cell.count.max(0) as usize);
        let mut offset = cell.cell_head as u64;
        for _ in 0..cell.count {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| io_err(&dpath, e))?;
            let mut record_bytes = vec![0u8; prefix_len];
            file.read_exact(&mut record_bytes)
                .map_err(|e| io_err(&dpath, e))?;
            let body_len = BigEndian::read_u32(&record_bytes[4..8]) as usize;
            record_bytes.resize(prefix_len + body_len, 0);
            file.read_exact(&mut record_bytes[prefix_len..])
                .map_err(|e| io_err(&dpath, e))?;

            let (rec, _) = record::decode(&record_bytes, 0, self.meta.cube_index)?;
            offset = rec.next_offset as u64;
            let mut p = rec.point;
            p.idx = cell_idx as i32;
            out.push(p);
        }
        Ok(out)
    }

    pub fn read_batch(&self, cell_indices: &[usize]) -> Result<Vec<DataPoint>> {
        let mut out = Vec::new();
        for &c in cell_indices {
            out.extend(self.read_single(c)?);
        }
        Ok(out)
    }

    /// Sequential scan of the whole arena, in insertion order.
    pub fn read_all(&self) -> Result<Vec<DataPoint>> {
        if !self.loaded {
            return Err(self.not_loaded());
        }
        let mut out = Vec::new();
        let mut offset = 0usize;
        while offset < self.meta.global_offset as usize {
            let (rec, end) = record::decode(&self.data, offset, self.meta.cube_index)?;
            let mut p = rec.point;
            p.idx = rec.cell_idx as i32;
            out.push(p);
            offset = end;
        }
        Ok(out)
    }

    pub fn write_to_disk(&self, root: &Path) -> Result<()> {
        let dir = cube_dir(root, self.meta.cube_index);
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let dpath = data_path(root, self.meta.cube_index);
        fs::write(&dpath, &self.data).map_err(|e| io_err(&dpath, e))?;

        let mpath = meta_path(root, self.meta.cube_index);
        let json = serde_json::to_vec(&self.meta).map_err(|e| GeocubeError::Corrupted {
            cube_id: self.meta.cube_index,
            reason: e.to_string(),
        })?;
        fs::write(&mpath, json).map_err(|e| io_err(&mpath, e))?;
        Ok(())
    }

    /// Loads only the metadata file — the cube is usable for reads that
    /// never touch the arena (none, today), but must be hydrated via
    /// [`MetaCube::hydrate`] before any `feed`/`read_*` call.
    pub fn load_meta_from_disk(root: &Path, cube_id: i32) -> Result<Self> {
        let mpath = meta_path(root, cube_id);
        let bytes = fs::read(&mpath).map_err(|e| io_err(&mpath, e))?;
        let meta: MetaInfo = serde_json::from_slice(&bytes).map_err(|e| GeocubeError::Corrupted {
            cube_id,
            reason: e.to_string(),
        })?;
        Ok(MetaCube {
            meta,
            data: Vec::new(),
            loaded: false,
            insert_time: Instant::now(),
            access_count: 0,
        })
    }

    pub fn hydrate(&mut self, root: &Path) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let dpath = data_path(root, self.meta.cube_index);
        self.data = fs::read(&dpath).map_err(|e| io_err(&dpath, e))?;
        self.loaded = true;
        Ok(())
    }

    pub fn touch_single(&mut self) {
        self.access_count += 1;
    }

    pub fn touch_all(&mut self, read_all_weight: f64, point_count: u32) {
        self.access_count += (read_all_weight * point_count as f64).ceil() as u64;
    }

    pub fn access_rate(&self) -> f64 {
        let elapsed = self.insert_time.elapsed().as_secs_f64().max(1.0);
        self.access_count as f64 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(f: f64, idx: i32) -> DataPoint {
        let mut p = DataPoint::new(vec![f], vec![], vec![]);
        p.idx = idx;
        p
    }

    #[test]
    fn feed_and_read_single_cell() {
        let mut cube = MetaCube::new(7, 4, vec![0], vec![0.0], vec![4.0]);
        cube.feed_point(&point(0.5, 0)).unwrap();
        cube.feed_point(&point(0.6, 0)).unwrap();
        cube.feed_point(&point(2.5, 2)).unwrap();

        let cell0 = cube.read_single(0).unwrap();
        assert_eq!(cell0.len(), 2);
        assert_eq!(cell0[0].floats[0], 0.5);
        assert_eq!(cell0[1].floats[0], 0.6);

        let cell2 = cube.read_single(2).unwrap();
        assert_eq!(cell2.len(), 1);

        let empty = cube.read_single(1).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn read_all_returns_every_point_in_insertion_order() {
        let mut cube = MetaCube::new(1, 4, vec![0], vec![0.0], vec![4.0]);
        cube.feed_point(&point(0.1, 0)).unwrap();
        cube.feed_point(&point(3.1, 3)).unwrap();
        cube.feed_point(&point(0.2, 0)).unwrap();
        let all = cube.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].floats[0], 0.1);
        assert_eq!(all[1].floats[0], 3.1);
        assert_eq!(all[2].floats[0], 0.2);
    }

    #[test]
    fn disk_round_trip_preserves_all_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut cube = MetaCube::new(3, 4, vec![0], vec![0.0], vec![4.0]);
        cube.feed_point(&point(1.0, 0)).unwrap();
        cube.feed_point(&point(3.5, 3)).unwrap();
        cube.write_to_disk(dir.path()).unwrap();

        let mut loaded = MetaCube::load_meta_from_disk(dir.path(), 3).unwrap();
        assert!(!loaded.is_loaded());
        loaded.hydrate(dir.path()).unwrap();
        let points = loaded.read_all().unwrap();
        assert_eq!(points.len(), 2);
    }
}
