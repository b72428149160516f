//! Deferred voxel mutation queue.
//!
//! Network handlers and gameplay code queue edits during a tick; the world
//! applies all of them in submission order at the start of its next tick,
//! before anything else observes voxel data.

use std::fmt;

use glam::IVec3;
use rustc_hash::FxHashSet;
use strata_log::Diagnostics;

use crate::chunk_store::{ChunkSource, ChunkStore};
use crate::coords::{ChunkCoord, world_to_chunk};
use crate::voxel::Voxel;

/// Region edit callback: `Some(voxel)` replaces the existing voxel, `None`
/// leaves it untouched.
pub type RegionPredicate = Box<dyn FnMut(IVec3, Voxel) -> Option<Voxel> + Send>;

enum PendingEdit {
    Point {
        position: IVec3,
        voxel: Voxel,
    },
    Region {
        start: IVec3,
        end: IVec3,
        predicate: RegionPredicate,
    },
}

/// Outcome of one [`VoxelEditor::apply_pending_changes`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// Edits that were applied (fully, or for regions, on every loadable chunk).
    pub applied: usize,
    /// Edits (or region parts) dropped because their chunk failed to load.
    pub dropped: usize,
    /// Voxels actually written.
    pub voxels_written: usize,
    /// Chunks that received at least one write, in first-touch order.
    pub touched_chunks: Vec<ChunkCoord>,
}

impl ApplyReport {
    fn touch(&mut self, coord: ChunkCoord) {
        if !self.touched_chunks.contains(&coord) {
            self.touched_chunks.push(coord);
        }
    }
}

/// FIFO queue of pending voxel edits for one world.
#[derive(Default)]
pub struct VoxelEditor {
    pending: Vec<PendingEdit>,
}

impl VoxelEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single voxel write.
    pub fn queue_update(&mut self, position: IVec3, voxel: Voxel) {
        self.pending.push(PendingEdit::Point { position, voxel });
    }

    /// Queue a region edit over the cuboid `[start, end)`.
    ///
    /// The corners may be given in any order. `predicate` runs once per voxel
    /// with its world position and current value.
    pub fn queue_updates<F>(&mut self, start: IVec3, end: IVec3, predicate: F)
    where
        F: FnMut(IVec3, Voxel) -> Option<Voxel> + Send + 'static,
    {
        self.pending.push(PendingEdit::Region {
            start: start.min(end),
            end: start.max(end),
            predicate: Box::new(predicate),
        });
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Discard all queued edits without applying them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Apply every queued edit in submission order.
    ///
    /// Missing chunks are loaded synchronously through `source`. An edit whose
    /// chunk can't be loaded is logged at error and dropped; the queue is
    /// always empty afterwards.
    pub fn apply_pending_changes(
        &mut self,
        store: &mut ChunkStore,
        source: &mut dyn ChunkSource,
        diag: &Diagnostics,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();

        for edit in std::mem::take(&mut self.pending) {
            match edit {
                PendingEdit::Point { position, voxel } => {
                    let (coord, local) = world_to_chunk(position);
                    let result = store
                        .get_or_load(coord, source)
                        .and_then(|chunk| chunk.set(local, voxel));
                    match result {
                        Ok(()) => {
                            report.applied += 1;
                            report.voxels_written += 1;
                            report.touch(coord);
                        }
                        Err(e) => {
                            report.dropped += 1;
                            diag.error(format_args!(
                                "dropped voxel edit at {position}: {e}"
                            ));
                        }
                    }
                }
                PendingEdit::Region {
                    start,
                    end,
                    mut predicate,
                } => {
                    let dropped_before = report.dropped;
                    apply_region(store, source, diag, start, end, &mut predicate, &mut report);
                    if report.dropped == dropped_before {
                        report.applied += 1;
                    }
                }
            }
        }

        report
    }
}

fn apply_region(
    store: &mut ChunkStore,
    source: &mut dyn ChunkSource,
    diag: &Diagnostics,
    start: IVec3,
    end: IVec3,
    predicate: &mut RegionPredicate,
    report: &mut ApplyReport,
) {
    let mut failed: FxHashSet<ChunkCoord> = FxHashSet::default();

    for y in start.y..end.y {
        for z in start.z..end.z {
            for x in start.x..end.x {
                let position = IVec3::new(x, y, z);
                let (coord, local) = world_to_chunk(position);
                if failed.contains(&coord) {
                    continue;
                }
                let chunk = match store.get_or_load(coord, source) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        failed.insert(coord);
                        report.dropped += 1;
                        diag.error(format_args!(
                            "dropped region edit part in chunk {coord}: {e}"
                        ));
                        continue;
                    }
                };
                let Some(replacement) = predicate(position, chunk.get(local)) else {
                    continue;
                };
                if let Err(e) = chunk.set(local, replacement) {
                    failed.insert(coord);
                    report.dropped += 1;
                    diag.error(format_args!(
                        "dropped region edit part in chunk {coord}: {e}"
                    ));
                    continue;
                }
                report.voxels_written += 1;
                report.touch(coord);
            }
        }
    }
}

impl fmt::Debug for VoxelEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoxelEditor")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkError, NETWORK_DIRTY};
    use crate::coords::{CHUNK_VOLUME, LocalPos};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strata_log::Severity;

    fn air_source(coord: ChunkCoord) -> Result<Chunk, ChunkError> {
        Chunk::restored(coord, vec![Voxel::AIR; CHUNK_VOLUME])
    }

    fn failing_below_zero(coord: ChunkCoord) -> Result<Chunk, ChunkError> {
        if coord.y < 0 {
            return Err(ChunkError::LoadFailed {
                coord,
                reason: "storage offline".into(),
            });
        }
        air_source(coord)
    }

    fn voxel_at(store: &ChunkStore, pos: IVec3) -> Voxel {
        let (coord, local) = world_to_chunk(pos);
        store.get_chunk(coord).unwrap().get(local)
    }

    #[test]
    fn test_point_edit_loads_chunk_and_marks_dirty() {
        let (diag, _) = Diagnostics::memory("test");
        let mut store = ChunkStore::new();
        let mut editor = VoxelEditor::new();

        editor.queue_update(IVec3::new(5, 5, 5), Voxel::new(7));
        assert_eq!(editor.pending_len(), 1);
        let report = editor.apply_pending_changes(&mut store, &mut air_source, &diag);

        assert_eq!(report.applied, 1);
        assert_eq!(report.touched_chunks, vec![ChunkCoord::new(0, 0, 0)]);
        let chunk = store.get_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        assert_eq!(chunk.get(LocalPos::new(5, 5, 5).unwrap()), Voxel::new(7));
        assert!(chunk.is_dirty());
        assert!(chunk.has_flag(NETWORK_DIRTY));
        assert!(!editor.has_pending());
    }

    #[test]
    fn test_last_writer_wins() {
        let (diag, _) = Diagnostics::memory("test");
        let mut store = ChunkStore::new();
        let mut editor = VoxelEditor::new();
        let pos = IVec3::new(-3, 2, 40);

        editor.queue_update(pos, Voxel::new(1));
        editor.queue_update(pos, Voxel::new(2));
        editor.apply_pending_changes(&mut store, &mut air_source, &diag);

        assert_eq!(voxel_at(&store, pos), Voxel::new(2));
    }

    #[test]
    fn test_region_no_change_keeps_chunk_clean() {
        let (diag, _) = Diagnostics::memory("test");
        let mut store = ChunkStore::new();
        store.load_chunk(air_source(ChunkCoord::default()).unwrap());
        let mut editor = VoxelEditor::new();

        let visited = Arc::new(AtomicUsize::new(0));
        let seen = visited.clone();
        editor.queue_updates(IVec3::ZERO, IVec3::splat(4), move |_, _| {
            seen.fetch_add(1, Ordering::Relaxed);
            None
        });
        let report = editor.apply_pending_changes(&mut store, &mut air_source, &diag);

        assert_eq!(visited.load(Ordering::Relaxed), 64);
        assert_eq!(report.voxels_written, 0);
        assert!(!store.get_chunk(ChunkCoord::default()).unwrap().is_dirty());
    }

    #[test]
    fn test_region_writes_only_where_predicate_changes() {
        let (diag, _) = Diagnostics::memory("test");
        let mut store = ChunkStore::new();
        let mut editor = VoxelEditor::new();

        // Spans chunks (-1, 0, 0) and (0, 0, 0); corners given reversed.
        editor.queue_updates(IVec3::new(2, 1, 1), IVec3::new(-2, 0, 0), |pos, _| {
            (pos.x % 2 == 0).then_some(Voxel::new(9))
        });
        let report = editor.apply_pending_changes(&mut store, &mut air_source, &diag);

        assert_eq!(report.voxels_written, 2);
        assert_eq!(voxel_at(&store, IVec3::new(-2, 0, 0)), Voxel::new(9));
        assert_eq!(voxel_at(&store, IVec3::new(-1, 0, 0)), Voxel::AIR);
        assert_eq!(voxel_at(&store, IVec3::new(0, 0, 0)), Voxel::new(9));
        assert_eq!(voxel_at(&store, IVec3::new(1, 0, 0)), Voxel::AIR);
        assert_eq!(report.touched_chunks.len(), 2);
    }

    #[test]
    fn test_failed_load_drops_edit_and_clears_queue() {
        let (diag, sink) = Diagnostics::memory("test");
        let mut store = ChunkStore::new();
        let mut editor = VoxelEditor::new();

        editor.queue_update(IVec3::new(0, -1, 0), Voxel::new(1));
        editor.queue_update(IVec3::new(0, 1, 0), Voxel::new(1));
        let report = editor.apply_pending_changes(&mut store, &mut failing_below_zero, &diag);

        assert_eq!(report.applied, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(sink.count(Severity::Error), 1);
        assert!(!editor.has_pending());

        // Not retried on the next pass.
        let report = editor.apply_pending_changes(&mut store, &mut failing_below_zero, &diag);
        assert_eq!(report, ApplyReport::default());
    }
}
