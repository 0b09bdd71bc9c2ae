use crate::error::{GeocubeError, Result};
use crate::metacube::{meta_file_path, MetaCube, MetaInfo};
use crate::point::{DataBatch, DataPoint};
use log::debug;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Tunables for the bounded in-memory cache of metacubes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub cache_size: usize,
    pub sample_ratio: f64,
    pub read_all_weight: f64,
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_size: 64,
            sample_ratio: 0.1,
            read_all_weight: 0.5,
            root: PathBuf::from("."),
        }
    }
}

/// Bounded map of loaded metacubes, backed by on-disk persistence.
/// `cube_meta_map` remembers every cube id that has ever been evicted
/// (hence known to exist on disk); `cube` holds the currently resident
/// ones, each either meta-only or meta+data.
pub struct Db {
    config: CacheConfig,
    cube_meta_map: HashMap<i32, PathBuf>,
    cube: HashMap<i32, MetaCube>,
}

impl Db {
    pub fn new(config: CacheConfig) -> Self {
        Db {
            config,
            cube_meta_map: HashMap::new(),
            cube: HashMap::new(),
        }
    }

    pub fn resident_count(&self) -> usize {
        self.cube.len()
    }

    /// Scans the cache root for cubes left behind by a previous run and
    /// registers each as known-but-not-resident, so a freshly started
    /// worker can serve queries against data it never itself fed.
    pub fn hydrate_from_disk(&mut self) -> Result<()> {
        let to_io_err = |source: std::io::Error| GeocubeError::Io {
            path: self.config.root.clone(),
            source,
        };
        let entries = match std::fs::read_dir(&self.config.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(to_io_err(e)),
        };
        for entry in entries {
            let entry = entry.map_err(to_io_err)?;
            let Ok(cube_id) = entry.file_name().to_string_lossy().parse::<i32>() else {
                continue;
            };
            let meta_path = meta_file_path(&self.config.root, cube_id);
            if meta_path.is_file() {
                self.cube_meta_map.insert(cube_id, meta_path);
            }
        }
        Ok(())
    }

    pub fn known_cube_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .cube
            .keys()
            .copied()
            .chain(self.cube_meta_map.keys().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn sample_k(&self) -> usize {
        ((self.config.sample_ratio * self.config.cache_size as f64).ceil() as usize)
            .clamp(1, self.cube.len().max(1))
    }

    /// Evicts one resident cube via sampled-LFU-by-rate: sample `k`
    /// distinct resident cubes uniformly at random, evict the one with
    /// the lowest `access_count / elapsed` rate.
    fn evict_one(&mut self) -> Result<()> {
        let k = self.sample_k();
        let ids: Vec<i32> = self.cube.keys().copied().collect();
        let sample: Vec<i32> = ids
            .choose_multiple(&mut rand::thread_rng(), k)
            .copied()
            .collect();

        let victim = sample
            .into_iter()
            .min_by(|a, b| {
                let ra = self.cube[a].access_rate();
                let rb = self.cube[b].access_rate();
                ra.partial_cmp(&rb).unwrap()
            })
            .expect("cache is at capacity, so at least one candidate exists");

        let cube = self.cube.remove(&victim).unwrap();
        if cube.is_loaded() {
            cube.write_to_disk(&self.config.root)?;
        }
        debug!("evicted cube {victim} (rate {:.4})", cube.access_rate());
        self.cube_meta_map
            .insert(victim, meta_file_path(&self.config.root, victim));
        Ok(())
    }

    fn ensure_capacity(&mut self) -> Result<()> {
        while self.cube.len() >= self.config.cache_size {
            self.evict_one()?;
        }
        Ok(())
    }

    /// Loads a cube's metadata without its arena, if it isn't already
    /// resident. Leaves a meta-only entry — use [`Db::promote`] (or any
    /// read/feed call, which promotes implicitly) before touching data.
    fn load_meta_only(&mut self, cube_id: i32) -> Result<()> {
        if self.cube.contains_key(&cube_id) {
            return Ok(());
        }
        if !self.cube_meta_map.contains_key(&cube_id) {
            return Err(GeocubeError::Corrupted {
                cube_id,
                reason: "no such cube is known to the cache".into(),
            });
        }
        self.ensure_capacity()?;
        let cube = MetaCube::load_meta_from_disk(&self.config.root, cube_id)?;
        self.cube.insert(cube_id, cube);
        Ok(())
    }

    fn promote(&mut self, cube_id: i32) -> Result<()> {
        let cube = self.cube.get_mut(&cube_id).expect("caller already loaded meta");
        cube.hydrate(&self.config.root)
    }

    /// Meta-only peek: loads metadata if not already resident, without
    /// pulling the (possibly large) arena into memory.
    pub fn peek_meta(&mut self, cube_id: i32) -> Result<&MetaInfo> {
        self.load_meta_only(cube_id)?;
        Ok(&self.cube.get(&cube_id).unwrap().meta)
    }

    fn ensure_loaded(&mut self, cube_id: i32) -> Result<()> {
        self.load_meta_only(cube_id)?;
        self.promote(cube_id)
    }

    /// Feeds a freshly split-off batch into its cube, creating the cube
    /// if this is the first batch it has ever seen.
    pub fn feed(&mut self, batch: DataBatch) -> Result<()> {
        if self.cube.contains_key(&batch.cube_id) {
            self.promote(batch.cube_id)?;
        } else if self.cube_meta_map.contains_key(&batch.cube_id) {
            self.ensure_loaded(batch.cube_id)?;
        } else {
            self.ensure_capacity()?;
            self.cube.insert(
                batch.cube_id,
                MetaCube::new(
                    batch.cube_id,
                    batch.capacity,
                    batch.dims.clone(),
                    batch.mins.clone(),
                    batch.maxs.clone(),
                ),
            );
        }
        let cube = self.cube.get_mut(&batch.cube_id).unwrap();
        for p in &batch.points {
            cube.feed_point(p)?;
        }
        Ok(())
    }

    /// Reads one cell. Unlike [`Db::read_batch`]/[`Db::read_all`], a
    /// meta-only cube is not promoted to load its whole arena — the
    /// cell's chain is read directly off disk at its stored offsets.
    pub fn read_single(&mut self, cube_id: i32, cell_idx: usize) -> Result<Vec<DataPoint>> {
        self.load_meta_only(cube_id)?;
        let cube = self.cube.get_mut(&cube_id).unwrap();
        let points = if cube.is_loaded() {
            cube.read_single(cell_idx)?
        } else {
            cube.read_single_from_disk(&self.config.root, cell_idx)?
        };
        cube.touch_single();
        Ok(points)
    }

    /// Reads several cells from one cube. Charges one touch per cell,
    /// same as calling [`Db::read_single`] that many times.
    pub fn read_batch(&mut self, cube_id: i32, cell_indices: &[usize]) -> Result<Vec<DataPoint>> {
        self.ensure_loaded(cube_id)?;
        let cube = self.cube.get_mut(&cube_id).unwrap();
        let mut out = Vec::new();
        for &c in cell_indices {
            out.extend(cube.read_single(c)?);
            cube.touch_single();
        }
        Ok(out)
    }

    pub fn read_all(&mut self, cube_id: i32) -> Result<Vec<DataPoint>> {
        self.ensure_loaded(cube_id)?;
        let cube = self.cube.get_mut(&cube_id).unwrap();
        let points = cube.read_all()?;
        cube.touch_all(self.config.read_all_weight, points.len() as u32);
        Ok(points)
    }

    /// Writes every resident, loaded cube back to disk without evicting
    /// it from the cache. Used on graceful shutdown.
    pub fn flush(&mut self) -> Result<()> {
        for (&id, cube) in self.cube.iter() {
            if cube.is_loaded() {
                cube.write_to_disk(&self.config.root)?;
                self.cube_meta_map
                    .entry(id)
                    .or_insert_with(|| meta_file_path(&self.config.root, id));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn is_cube_loaded(&self, cube_id: i32) -> bool {
        self.cube.get(&cube_id).map(|c| c.is_loaded()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::DataPoint;

    fn batch(cube_id: i32, points: Vec<DataPoint>) -> DataBatch {
        DataBatch {
            cube_id,
            capacity: 4,
            dims: vec![0],
            mins: vec![0.0],
            maxs: vec![4.0],
            points,
        }
    }

    fn point(v: f64, idx: i32) -> DataPoint {
        let mut p = DataPoint::new(vec![v], vec![], vec![]);
        p.idx = idx;
        p
    }

    #[test]
    fn feed_then_read_all_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::new(CacheConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        db.feed(batch(1, vec![point(0.5, 0), point(3.5, 3)])).unwrap();
        let points = db.read_all(1).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn cache_never_exceeds_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::new(CacheConfig {
            cache_size: 3,
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        for id in 0..10 {
            db.feed(batch(id, vec![point(1.0, 1)])).unwrap();
            assert!(db.resident_count() <= 3);
        }
    }

    #[test]
    fn evicted_cube_reloads_with_its_data_intact() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::new(CacheConfig {
            cache_size: 2,
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        db.feed(batch(0, vec![point(0.5, 0)])).unwrap();
        // touch 0 heavily so it's never the eviction victim
        for _ in 0..20 {
            db.read_all(0).unwrap();
        }
        for id in 1..6 {
            db.feed(batch(id, vec![point(0.5, 0)])).unwrap();
        }
        let points = db.read_all(0).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn read_single_on_empty_cell_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::new(CacheConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        db.feed(batch(0, vec![point(0.5, 0)])).unwrap();
        let points = db.read_single(0, 2).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn read_single_on_meta_only_cube_reads_from_disk_without_promoting() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::new(CacheConfig {
            cache_size: 1,
            root: dir.path().to_path_buf(),
            ..Default::default()
        });
        db.feed(batch(0, vec![point(0.5, 0), point(1.5, 1)])).unwrap();
        // forces cube 0 out to meta-only, since cache_size 1 leaves no
        // room for cube 1 alongside it
        db.feed(batch(1, vec![point(9.0, 0)])).unwrap();
        assert!(!db.is_cube_loaded(0));

        let points = db.read_single(0, 0).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].floats[0], 0.5);
        // read_single must not have promoted the arena into memory
        assert!(!db.is_cube_loaded(0));
    }
}
