use std::collections::HashSet;

use super::arc::{Arc, ArcIdx, LaneIdx, Row, START_ARC};
use super::oid::CommitId;

/// The two lane-indexed arc tables of a frame, kept at equal length by
/// construction. `solved` holds arcs whose parent has been found, `open`
/// holds arcs still awaiting theirs; gaps are `None`.
#[derive(Debug, Clone, Default)]
pub struct LaneTable {
    solved: Vec<Option<ArcIdx>>,
    open: Vec<Option<ArcIdx>>,
}

impl LaneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lanes currently tracked (both tables, by construction).
    pub fn lane_count(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn open_at(&self, lane: LaneIdx) -> Option<ArcIdx> {
        self.open.get(lane).copied().flatten()
    }

    pub fn solved_at(&self, lane: LaneIdx) -> Option<ArcIdx> {
        self.solved.get(lane).copied().flatten()
    }

    fn grow_to(&mut self, lane: LaneIdx) {
        if lane >= self.open.len() {
            self.open.resize(lane + 1, None);
            self.solved.resize(lane + 1, None);
        }
    }

    pub(crate) fn set_open(&mut self, lane: LaneIdx, arc: ArcIdx) {
        self.grow_to(lane);
        self.open[lane] = Some(arc);
    }

    pub(crate) fn set_solved(&mut self, lane: LaneIdx, arc: ArcIdx) {
        self.grow_to(lane);
        self.solved[lane] = Some(arc);
    }

    pub(crate) fn take_open(&mut self, lane: LaneIdx) -> Option<ArcIdx> {
        self.open.get_mut(lane).and_then(|slot| slot.take())
    }

    /// Move the open occupant of `lane` (if any) into the solved table.
    pub(crate) fn solve(&mut self, lane: LaneIdx) {
        if let Some(arc) = self.take_open(lane) {
            self.solved[lane] = Some(arc);
        }
    }

    /// Drop every solved entry. The generator calls this when a new row
    /// starts: anything solved on an earlier row is stale by then.
    pub(crate) fn clear_solved(&mut self) {
        for slot in &mut self.solved {
            *slot = None;
        }
    }

    /// Append one empty lane at the right edge and return its index.
    pub(crate) fn push_lane(&mut self) -> LaneIdx {
        self.open.push(None);
        self.solved.push(None);
        self.open.len() - 1
    }

    /// Trim lanes that are empty in both tables off the right edge, but
    /// never below `min_len` lanes.
    pub(crate) fn trim_trailing_empty(&mut self, min_len: usize) {
        while self.open.len() > min_len
            && self.open.last() == Some(&None)
            && self.solved.last() == Some(&None)
        {
            self.open.pop();
            self.solved.pop();
        }
    }

    pub(crate) fn iter_open(&self) -> impl Iterator<Item = (LaneIdx, ArcIdx)> + '_ {
        self.open
            .iter()
            .enumerate()
            .filter_map(|(lane, slot)| slot.map(|arc| (lane, arc)))
    }

    pub(crate) fn iter_solved(&self) -> impl Iterator<Item = (LaneIdx, ArcIdx)> + '_ {
        self.solved
            .iter()
            .enumerate()
            .filter_map(|(lane, slot)| slot.map(|arc| (lane, arc)))
    }

    /// A copy with every arc index passed through `map`.
    pub(crate) fn remapped(&self, map: impl Fn(ArcIdx) -> ArcIdx) -> LaneTable {
        LaneTable {
            solved: self.solved.iter().map(|slot| slot.map(&map)).collect(),
            open: self.open.iter().map(|slot| slot.map(&map)).collect(),
        }
    }
}

/// Flattened column assignment for one lane of a frame: where the lane
/// lands in the half-row above the commit and in the half-row below,
/// after hidden-only lanes have been squeezed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlatLane {
    pub above: Option<usize>,
    pub below: Option<usize>,
}

/// A snapshot of graph state at one row: which arcs are open, which were
/// solved at this row, and where playback would resume in the arc chain.
///
/// Frames do not own arcs; lane tables hold indices into the owning
/// graph's arena, so every query takes the arena slice.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row this frame represents.
    pub row: Row,
    /// Commit occupying this row.
    pub commit: CommitId,
    pub(crate) lanes: LaneTable,
    /// Most recently created arc at the time of this frame.
    pub(crate) last_arc: ArcIdx,
}

impl Frame {
    /// The synthetic frame above all history, anchored at the chain
    /// sentinel.
    pub(crate) fn bootstrap() -> Self {
        Self {
            row: -1,
            commit: CommitId::Top,
            lanes: LaneTable::new(),
            last_arc: START_ARC,
        }
    }

    pub fn lanes(&self) -> &LaneTable {
        &self.lanes
    }

    /// Arcs whose parent is this frame's commit (they end at this row).
    pub fn arcs_closed_by_commit<'a>(&self, arcs: &'a [Arc]) -> Vec<&'a Arc> {
        let mut found = Vec::new();
        for lane in 0..self.lanes.lane_count() {
            for idx in [self.lanes.solved_at(lane), self.lanes.open_at(lane)] {
                if let Some(idx) = idx {
                    let arc = &arcs[idx];
                    if arc.closed_at == Some(self.row) && !arc.is_parentless_commit() {
                        found.push(arc);
                    }
                }
            }
        }
        found
    }

    /// Arcs opened by this frame's commit (they start at this row).
    pub fn arcs_opened_by_commit<'a>(&self, arcs: &'a [Arc]) -> Vec<&'a Arc> {
        self.lanes
            .iter_open()
            .map(|(_, idx)| &arcs[idx])
            .filter(|arc| arc.opened_at == self.row)
            .collect()
    }

    /// Arcs that neither start nor end here but run through this row.
    pub fn arcs_passing_by_commit<'a>(&self, arcs: &'a [Arc]) -> Vec<&'a Arc> {
        self.lanes
            .iter_open()
            .map(|(_, idx)| &arcs[idx])
            .filter(|arc| {
                arc.opened_at < self.row
                    && !arc.is_stale(self.row)
                    && arc.closed_at != Some(self.row)
            })
            .collect()
    }

    /// The lane this frame's commit visually occupies.
    ///
    /// When the commit both closes and opens arcs on this row, the larger
    /// of the two leftmost candidate lanes wins. A commit with neither
    /// falls back to its stub arc.
    pub fn home_lane(&self, arcs: &[Arc]) -> Option<LaneIdx> {
        let leftmost_closed = self
            .arcs_closed_by_commit(arcs)
            .iter()
            .map(|arc| arc.lane)
            .min();
        let leftmost_opened = self
            .arcs_opened_by_commit(arcs)
            .iter()
            .map(|arc| arc.lane)
            .min();
        match (leftmost_closed, leftmost_opened) {
            (Some(c), Some(o)) => Some(c.max(o)),
            (Some(c), None) => Some(c),
            (None, Some(o)) => Some(o),
            (None, None) => {
                let anchor = &arcs[self.last_arc];
                if anchor.is_parentless_commit()
                    && anchor.opened_at == self.row
                    && anchor.opened_by == self.commit
                {
                    return Some(anchor.lane);
                }
                // A commit that only merged into existing arcs sits on
                // the lane of the lowest junction it produced.
                self.lanes
                    .iter_open()
                    .map(|(_, idx)| &arcs[idx])
                    .filter(|arc| {
                        arc.junction_at(self.row)
                            .is_some_and(|j| j.joined_by == self.commit)
                    })
                    .map(|arc| arc.lane)
                    .min()
            }
        }
    }

    /// A normalized value copy: open entries whose arc closed at this row
    /// become solved, anything closed above this row is dropped from both
    /// tables, and trailing empty lanes are trimmed. The only sanctioned
    /// way to take a keyframe-worthy snapshot.
    pub(crate) fn clean_copy(&self, arcs: &[Arc]) -> Frame {
        let mut lanes = LaneTable::new();
        for (lane, idx) in self.lanes.iter_open() {
            let arc = &arcs[idx];
            match arc.closed_at {
                Some(c) if c < self.row => {}
                Some(c) if c == self.row => lanes.set_solved(lane, idx),
                _ => lanes.set_open(lane, idx),
            }
        }
        for (lane, idx) in self.lanes.iter_solved() {
            if arcs[idx].closed_at == Some(self.row) {
                lanes.set_solved(lane, idx);
            }
        }
        lanes.trim_trailing_empty(0);
        Frame {
            row: self.row,
            commit: self.commit.clone(),
            lanes,
            last_arc: self.last_arc,
        }
    }

    /// Open-lane entry that still carries forward-looking information at
    /// this frame's row (not closed at or above it), or `None`.
    pub(crate) fn live_open_at(&self, lane: LaneIdx, arcs: &[Arc]) -> Option<ArcIdx> {
        self.lanes
            .open_at(lane)
            .filter(|&idx| arcs[idx].closed_at.map_or(true, |c| c > self.row))
    }

    /// Whether this frame and `peer` agree on every lane that is still
    /// open looking downward. Solved arcs are ignored: they carry no
    /// forward-looking information. Used to detect the splice equilibrium.
    pub(crate) fn is_equilibrium_reached(
        &self,
        arcs: &[Arc],
        peer: &Frame,
        peer_arcs: &[Arc],
    ) -> bool {
        let lanes = self.lanes.lane_count().max(peer.lanes.lane_count());
        for lane in 0..lanes {
            let a = self.live_open_at(lane, arcs).map(|idx| &arcs[idx]);
            let b = peer.live_open_at(lane, peer_arcs).map(|idx| &peer_arcs[idx]);
            let matches = match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => a.opened_by == b.opened_by && a.closed_by == b.closed_by,
                _ => false,
            };
            if !matches {
                return false;
            }
        }
        true
    }

    /// Structural equality of two frames, comparing arcs by content
    /// rather than by arena index.
    pub(crate) fn same_content(&self, arcs: &[Arc], other: &Frame, other_arcs: &[Arc]) -> bool {
        fn arc_eq(a: Option<&Arc>, b: Option<&Arc>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    a.opened_at == b.opened_at
                        && a.closed_at == b.closed_at
                        && a.lane == b.lane
                        && a.opened_by == b.opened_by
                        && a.closed_by == b.closed_by
                }
                _ => false,
            }
        }
        if self.row != other.row || self.commit != other.commit {
            return false;
        }
        let lanes = self.lanes.lane_count().max(other.lanes.lane_count());
        for lane in 0..lanes {
            let open_a = self.lanes.open_at(lane).map(|i| &arcs[i]);
            let open_b = other.lanes.open_at(lane).map(|i| &other_arcs[i]);
            let solved_a = self.lanes.solved_at(lane).map(|i| &arcs[i]);
            let solved_b = other.lanes.solved_at(lane).map(|i| &other_arcs[i]);
            if !arc_eq(open_a, open_b) || !arc_eq(solved_a, solved_b) {
                return false;
            }
        }
        true
    }

    /// A copy with every arc index passed through `map`, for moving a
    /// frame into another graph's arena.
    pub(crate) fn remapped(&self, map: impl Fn(ArcIdx) -> ArcIdx) -> Frame {
        Frame {
            row: self.row,
            commit: self.commit.clone(),
            lanes: self.lanes.remapped(&map),
            last_arc: map(self.last_arc),
        }
    }

    /// True when every arc this frame retains, including its chain
    /// anchor, was opened at or below `row`. Frames failing this are
    /// invalidated when history above `row` is rewritten.
    pub(crate) fn is_independent_of_rows_above(&self, row: Row, arcs: &[Arc]) -> bool {
        if self.last_arc != START_ARC && arcs[self.last_arc].opened_at < row {
            return false;
        }
        self.lanes
            .iter_open()
            .chain(self.lanes.iter_solved())
            .all(|(_, idx)| arcs[idx].opened_at >= row)
    }

    /// Per-lane column remap for rendering, with hidden-only lanes
    /// squeezed out so filtered branches leave no gaps. Columns are
    /// assigned independently for the half-row above the commit and the
    /// half-row below; returns the remap and the max column count.
    pub fn flatten_lanes(
        &self,
        arcs: &[Arc],
        hidden: &HashSet<CommitId>,
    ) -> (Vec<FlatLane>, usize) {
        let lane_count = self.lanes.lane_count();
        let mut remap = vec![FlatLane::default(); lane_count];
        let mut above_cols = 0;
        let mut below_cols = 0;
        for (lane, flat) in remap.iter_mut().enumerate() {
            let mut above = false;
            let mut below = false;
            for idx in [self.lanes.solved_at(lane), self.lanes.open_at(lane)] {
                let Some(idx) = idx else { continue };
                let arc = &arcs[idx];
                if arc.is_stale(self.row)
                    || (hidden.contains(&arc.opened_by) && hidden.contains(&arc.closed_by))
                {
                    continue;
                }
                above |= arc.opened_at < self.row;
                below |= arc.closed_at.map_or(true, |c| c > self.row);
            }
            if above {
                flat.above = Some(above_cols);
                above_cols += 1;
            }
            if below {
                flat.below = Some(below_cols);
                below_cols += 1;
            }
        }
        (remap, above_cols.max(below_cols))
    }
}
