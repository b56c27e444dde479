use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use super::arc::{Arc, ArcIdx, Row, START_ARC};
use super::frame::Frame;
use crate::layout::playback::Playback;

/// Rows between forced keyframes during generation and playback.
pub const DEFAULT_KEYFRAME_INTERVAL: Row = 5000;

/// Structural invariant violations. These indicate a defect in graph
/// construction or splicing, not a data condition callers should expect;
/// a graph that produced one should be discarded and rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("row {row} is outside the graph (0..{rows})")]
    RowOutOfBounds { row: Row, rows: Row },
    #[error("arc chain is corrupt (cycle or dangling link)")]
    CorruptChain,
    #[error("junctions out of order on arc opened at row {row}")]
    UnsortedJunctions { row: Row },
    #[error("keyframe rows are not strictly ascending")]
    UnsortedKeyframes,
}

/// Owner of the commit graph: the arc arena with its chain sentinel, and
/// a sparse, row-sorted keyframe cache bounding the cost of random row
/// access.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) arcs: Vec<Arc>,
    /// Cleaned snapshots, ascending by row.
    pub(crate) keyframes: Vec<Frame>,
    pub(crate) row_count: Row,
    kf_interval: Row,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_keyframe_interval(DEFAULT_KEYFRAME_INTERVAL)
    }

    pub fn with_keyframe_interval(interval: Row) -> Self {
        Self {
            arcs: vec![Arc::sentinel()],
            keyframes: Vec::new(),
            row_count: 0,
            kf_interval: interval.max(1),
        }
    }

    /// Number of rows currently represented.
    pub fn row_count(&self) -> Row {
        self.row_count
    }

    pub fn keyframe_interval(&self) -> Row {
        self.kf_interval
    }

    /// The whole arc arena. Frames hold indices into this slice.
    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    pub fn arc(&self, idx: ArcIdx) -> &Arc {
        &self.arcs[idx]
    }

    /// Iterate the arc chain in creation order, skipping the sentinel.
    pub fn chain(&self) -> ChainIter<'_> {
        ChainIter {
            arcs: &self.arcs,
            cur: self.arcs[START_ARC].next,
        }
    }

    /// Index of the rightmost keyframe at or above `row`, if any.
    pub fn best_keyframe_index(&self, row: Row) -> Option<usize> {
        let pos = self.keyframes.partition_point(|kf| kf.row <= row);
        pos.checked_sub(1)
    }

    /// The frame at `row`: a direct clone on a keyframe hit, otherwise
    /// playback from the best keyframe. Mutates the keyframe cache as a
    /// side effect, which is why lookups take `&mut self`.
    pub fn frame(&mut self, row: Row) -> Result<Frame, GraphError> {
        if row < 0 || row >= self.row_count {
            return Err(GraphError::RowOutOfBounds {
                row,
                rows: self.row_count,
            });
        }
        if let Some(i) = self.best_keyframe_index(row) {
            if self.keyframes[i].row == row {
                return Ok(self.keyframes[i].clone());
            }
        }
        let playback = self.start_playback(row)?;
        Ok(playback.frame().clean_copy(&self.arcs))
    }

    /// Playback advanced to `goal_row`, writing keyframes along the way:
    /// one at every forced interval boundary, plus opportunistic ones at
    /// exponentially growing offsets past the start keyframe so repeated
    /// nearby lookups amortize.
    pub(crate) fn start_playback(&mut self, goal_row: Row) -> Result<Playback, GraphError> {
        let mut playback = match self.best_keyframe_index(goal_row) {
            Some(i) => Playback::from_frame(self.keyframes[i].clone()),
            None => Playback::from_start(),
        };
        let start_row = playback.row();
        let mut next_save = 1;
        while playback.row() < goal_row {
            playback.advance_to_next_row(&self.arcs).map_err(|_| {
                debug_assert!(false, "playback exhausted below row_count");
                GraphError::RowOutOfBounds {
                    row: goal_row,
                    rows: self.row_count,
                }
            })?;
            let offset = playback.row() - start_row;
            if offset >= next_save || playback.row() % self.kf_interval == 0 {
                self.save_keyframe(playback.frame().clone());
                if offset >= next_save {
                    next_save *= 2;
                }
            }
        }
        Ok(playback)
    }

    /// Insert a cleaned snapshot of `frame` at its sorted position.
    /// Saving a row that is already keyframed is a no-op (the existing
    /// snapshot must be structurally identical).
    pub(crate) fn save_keyframe(&mut self, frame: Frame) {
        let clean = frame.clean_copy(&self.arcs);
        let pos = self.keyframes.partition_point(|kf| kf.row < clean.row);
        if let Some(existing) = self.keyframes.get(pos) {
            if existing.row == clean.row {
                debug_assert!(
                    existing.same_content(&self.arcs, &clean, &self.arcs),
                    "conflicting keyframe content at row {}",
                    clean.row
                );
                return;
            }
        }
        trace!(row = clean.row, "saving keyframe");
        self.keyframes.insert(pos, clean);
    }

    /// Drop every keyframe invalidated by rewriting history above `row`:
    /// all of them up to the first keyframe at or after `row` that
    /// references only arcs opened at or after it.
    pub(crate) fn delete_keyframes_with_arcs_opened_above(&mut self, row: Row) {
        let keep_from = self
            .keyframes
            .iter()
            .position(|kf| kf.row >= row && kf.is_independent_of_rows_above(row, &self.arcs))
            .unwrap_or(self.keyframes.len());
        self.keyframes.drain(..keep_from);
    }

    /// Re-head the chain at the first arc with `opened_at >= row`. The
    /// abandoned arcs stay in the arena as unreachable garbage.
    pub(crate) fn delete_arcs_opened_above(&mut self, row: Row) {
        let mut cur = self.arcs[START_ARC].next;
        while let Some(i) = cur {
            if self.arcs[i].opened_at >= row {
                break;
            }
            cur = self.arcs[i].next;
        }
        self.arcs[START_ARC].next = cur;
    }

    /// Shift every row number reachable from the chain head, every
    /// retained keyframe, and the row count.
    pub(crate) fn shift_rows(&mut self, offset: Row) {
        if offset == 0 {
            return;
        }
        let mut cur = self.arcs[START_ARC].next;
        while let Some(i) = cur {
            self.arcs[i].shift_rows(offset);
            cur = self.arcs[i].next;
        }
        for kf in &mut self.keyframes {
            kf.row += offset;
        }
        self.row_count += offset;
    }

    /// Splice the prefix of `other`'s chain (arcs opened above
    /// `rows_to_take`) onto the front of this chain, and prepend its
    /// keyframes below that boundary with arc indices remapped into this
    /// arena. Row numbers are taken as-is: the two row spaces must
    /// already be aligned.
    pub(crate) fn insert_front(&mut self, other: &Graph, rows_to_take: Row) {
        let mut remap: HashMap<ArcIdx, ArcIdx> = HashMap::new();
        remap.insert(START_ARC, START_ARC);
        let mut copied = Vec::new();
        let mut cur = other.arcs[START_ARC].next;
        while let Some(i) = cur {
            if other.arcs[i].opened_at >= rows_to_take {
                break;
            }
            let mut arc = other.arcs[i].clone();
            cur = arc.next.take();
            let new_idx = self.arcs.len();
            self.arcs.push(arc);
            remap.insert(i, new_idx);
            copied.push(new_idx);
        }

        let old_head = self.arcs[START_ARC].next;
        let mut prev = START_ARC;
        for &idx in &copied {
            self.arcs[prev].next = Some(idx);
            prev = idx;
        }
        self.arcs[prev].next = old_head;

        let prefix: Vec<Frame> = other
            .keyframes
            .iter()
            .take_while(|kf| kf.row < rows_to_take)
            .map(|kf| kf.remapped(|idx| remap[&idx]))
            .collect();
        self.keyframes.splice(0..0, prefix);
        debug_assert!(
            self.keyframes.windows(2).all(|w| w[0].row < w[1].row),
            "keyframe rows out of order after front splice"
        );
    }

    /// Checked structural invariants: acyclic chain, sorted deduplicated
    /// junctions, strictly ascending keyframe rows.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut visited = 0usize;
        let mut cur = self.arcs[START_ARC].next;
        while let Some(i) = cur {
            if i == START_ARC || i >= self.arcs.len() {
                return Err(GraphError::CorruptChain);
            }
            let arc = &self.arcs[i];
            if arc.next == Some(i) {
                return Err(GraphError::CorruptChain);
            }
            visited += 1;
            if visited > self.arcs.len() {
                return Err(GraphError::CorruptChain);
            }
            for pair in arc.junctions.windows(2) {
                let ordered = pair[0].joined_at < pair[1].joined_at
                    || (pair[0].joined_at == pair[1].joined_at
                        && pair[0].joined_by != pair[1].joined_by);
                if !ordered {
                    return Err(GraphError::UnsortedJunctions { row: arc.opened_at });
                }
            }
            cur = arc.next;
        }
        if !self.keyframes.windows(2).all(|w| w[0].row < w[1].row) {
            return Err(GraphError::UnsortedKeyframes);
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the arc chain in creation order.
pub struct ChainIter<'a> {
    arcs: &'a [Arc],
    cur: Option<ArcIdx>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Arc;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let arc = &self.arcs[idx];
        self.cur = arc.next;
        Some(arc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::oid::CommitId;

    fn push_arc(graph: &mut Graph, arc: Arc) -> ArcIdx {
        let idx = graph.arcs.len();
        let prev = idx - 1;
        graph.arcs.push(arc);
        graph.arcs[prev].next = Some(idx);
        idx
    }

    fn linear_chain(rows: Row) -> Graph {
        let mut graph = Graph::new();
        for row in 0..rows {
            let mut arc = Arc::open(row, 0, CommitId::from(format!("c{row}")), CommitId::from(format!("c{}", row + 1)));
            arc.closed_at = Some(row + 1);
            push_arc(&mut graph, arc);
        }
        graph.row_count = rows;
        graph
    }

    #[test]
    fn test_best_keyframe_index() {
        let mut graph = linear_chain(10);
        for row in [2, 5, 8] {
            let mut frame = Frame::bootstrap();
            frame.row = row;
            frame.commit = CommitId::from(format!("c{row}"));
            frame.last_arc = START_ARC;
            graph.save_keyframe(frame);
        }
        assert_eq!(graph.best_keyframe_index(1), None);
        assert_eq!(graph.best_keyframe_index(2), Some(0));
        assert_eq!(graph.best_keyframe_index(7), Some(1));
        assert_eq!(graph.best_keyframe_index(100), Some(2));
    }

    #[test]
    fn test_save_keyframe_is_sorted_and_idempotent() {
        let mut graph = linear_chain(6);
        for row in [4, 1, 4, 2] {
            let mut frame = Frame::bootstrap();
            frame.row = row;
            frame.commit = CommitId::from(format!("c{row}"));
            graph.save_keyframe(frame);
        }
        let rows: Vec<Row> = graph.keyframes.iter().map(|kf| kf.row).collect();
        assert_eq!(rows, vec![1, 2, 4]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_delete_arcs_opened_above_reheads_chain() {
        let mut graph = linear_chain(5);
        graph.delete_arcs_opened_above(3);
        let opened: Vec<Row> = graph.chain().map(|arc| arc.opened_at).collect();
        assert_eq!(opened, vec![3, 4]);
    }

    #[test]
    fn test_shift_rows_moves_chain_and_keyframes() {
        let mut graph = linear_chain(3);
        let mut frame = Frame::bootstrap();
        frame.row = 1;
        frame.commit = "c1".into();
        graph.save_keyframe(frame);

        graph.shift_rows(4);
        let opened: Vec<Row> = graph.chain().map(|arc| arc.opened_at).collect();
        assert_eq!(opened, vec![4, 5, 6]);
        assert_eq!(graph.keyframes[0].row, 5);
        assert_eq!(graph.row_count(), 7);
    }

    #[test]
    fn test_validate_catches_cycle() {
        let mut graph = linear_chain(3);
        let last = graph.arcs.len() - 1;
        graph.arcs[last].next = Some(1);
        assert_eq!(graph.validate(), Err(GraphError::CorruptChain));
    }

    #[test]
    fn test_insert_front_splices_chain() {
        let mut back = linear_chain(4);
        back.delete_arcs_opened_above(2);

        let front = linear_chain(4);
        back.insert_front(&front, 2);
        let opened: Vec<Row> = back.chain().map(|arc| arc.opened_at).collect();
        assert_eq!(opened, vec![0, 1, 2, 3]);
        assert!(back.validate().is_ok());
    }
}
