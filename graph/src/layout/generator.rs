use std::collections::{BTreeSet, HashMap};

use smallvec::SmallVec;
use tracing::debug;

use crate::core::arc::{Arc, ArcIdx, LaneIdx, Row};
use crate::core::frame::Frame;
use crate::core::graph::{Graph, DEFAULT_KEYFRAME_INTERVAL};
use crate::core::oid::CommitId;

/// Sorted pool of vacated lanes; reuse always takes the leftmost.
#[derive(Debug, Default)]
struct FreeLanes(BTreeSet<LaneIdx>);

impl FreeLanes {
    fn new() -> Self {
        Self::default()
    }

    fn release(&mut self, lane: LaneIdx) {
        self.0.insert(lane);
    }

    fn acquire_lowest(&mut self) -> Option<LaneIdx> {
        self.0.pop_first()
    }

    fn lowest(&self) -> Option<LaneIdx> {
        self.0.first().copied()
    }

    /// Forget lanes that no longer exist after a trailing trim.
    fn retain_below(&mut self, width: usize) {
        self.0.retain(|&lane| lane < width);
    }
}

/// Forward graph builder: consumes a commit sequence once, in strict
/// child-before-parent order, allocating lanes and producing the
/// permanent arc chain. There is no other ordering requirement; unrelated
/// branches may interleave freely.
pub struct GraphGenerator {
    graph: Graph,
    frame: Frame,
    /// Lanes vacated by closed arcs, eligible for reuse. Lowest first.
    free_lanes: FreeLanes,
    /// Arcs awaiting a given parent commit.
    parent_lookup: HashMap<CommitId, SmallVec<[ArcIdx; 2]>>,
}

impl GraphGenerator {
    pub fn new() -> Self {
        Self::with_keyframe_interval(DEFAULT_KEYFRAME_INTERVAL)
    }

    pub fn with_keyframe_interval(interval: Row) -> Self {
        Self {
            graph: Graph::with_keyframe_interval(interval),
            frame: Frame::bootstrap(),
            free_lanes: FreeLanes::new(),
            parent_lookup: HashMap::new(),
        }
    }

    /// Current state as a frame (the row of the last added commit).
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn row(&self) -> Row {
        self.frame.row
    }

    pub fn commit(&self) -> &CommitId {
        &self.frame.commit
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Finish building and hand over the graph.
    pub fn into_graph(mut self) -> Graph {
        self.graph.row_count = self.frame.row + 1;
        self.graph
    }

    fn push_chain_arc(&mut self, arc: Arc) -> ArcIdx {
        let idx = self.graph.arcs.len();
        self.graph.arcs.push(arc);
        self.graph.arcs[self.frame.last_arc].next = Some(idx);
        self.frame.last_arc = idx;
        idx
    }

    /// Advance one row and lay out `commit`.
    ///
    /// Closes every arc waiting for this commit (its incoming edges),
    /// then opens one arc per parent, merging into an existing arc as a
    /// junction when some sibling already heads for the same parent.
    /// Lowest lane wins wherever several candidates exist.
    ///
    /// With `alloc_lanes_in_gaps` every vacated lane returns to the pool
    /// immediately (denser, jumpier layout); without it, the home lane is
    /// handed to the first parent and unused trailing lanes are trimmed
    /// instead (narrower, steadier layout).
    pub fn add_commit(&mut self, commit: CommitId, parents: &[CommitId], alloc_lanes_in_gaps: bool) {
        self.frame.row += 1;
        let row = self.frame.row;
        self.frame.commit = commit.clone();
        // Anything solved on an earlier row is stale now.
        self.frame.lanes.clear_solved();

        // Close the arcs whose parent just appeared.
        let mut home_lane: Option<LaneIdx> = None;
        let mut handoff: Option<LaneIdx> = None;
        if let Some(waiting) = self.parent_lookup.remove(&commit) {
            for &idx in &waiting {
                let lane = self.graph.arcs[idx].lane;
                debug_assert_eq!(self.frame.lanes.open_at(lane), Some(idx));
                self.graph.arcs[idx].closed_at = Some(row);
                self.frame.lanes.solve(lane);
                home_lane = Some(home_lane.map_or(lane, |h| h.min(lane)));
            }
            for &idx in &waiting {
                let lane = self.graph.arcs[idx].lane;
                if parents.is_empty() || alloc_lanes_in_gaps {
                    self.free_lanes.release(lane);
                } else if Some(lane) == home_lane {
                    handoff = Some(lane);
                }
            }
        }

        // Default mode keeps the graph narrow: unused lanes past the home
        // lane are dropped rather than reserved.
        if !alloc_lanes_in_gaps {
            self.frame
                .lanes
                .trim_trailing_empty(home_lane.map_or(0, |h| h + 1));
            self.free_lanes.retain_below(self.frame.lanes.lane_count());
        }

        let mut first = true;
        for parent in parents {
            // A sibling may already have opened an arc toward this
            // parent; merge into the lowest-lane one instead of widening.
            let junction_target = self
                .parent_lookup
                .get(parent)
                .and_then(|waiting| waiting.iter().copied().min_by_key(|&idx| self.graph.arcs[idx].lane));
            if let Some(target) = junction_target {
                self.graph.arcs[target].add_junction(row, commit.clone());
                if first {
                    if let Some(lane) = handoff.take() {
                        self.free_lanes.release(lane);
                    }
                }
            } else {
                let lane = if first { handoff.take() } else { None }
                    .or_else(|| self.free_lanes.acquire_lowest())
                    .unwrap_or_else(|| self.frame.lanes.push_lane());
                let idx =
                    self.push_chain_arc(Arc::open(row, lane, commit.clone(), parent.clone()));
                self.frame.lanes.set_open(lane, idx);
                self.parent_lookup.entry(parent.clone()).or_default().push(idx);
            }
            first = false;
        }
        debug_assert!(handoff.is_none(), "home lane hand-off left dangling");

        if parents.is_empty() {
            // Root commit: a stub arc anchors its lane without occupying
            // either table. An isolated commit borrows a display lane
            // without reserving it.
            let lane = home_lane.unwrap_or_else(|| {
                self.free_lanes
                    .lowest()
                    .unwrap_or_else(|| self.frame.lanes.lane_count())
            });
            self.push_chain_arc(Arc::stub(row, lane, commit));
        }

        if row % self.graph.keyframe_interval() == 0 {
            self.graph.save_keyframe(self.frame.clone());
        }
    }
}

impl Default for GraphGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Build a whole graph from a full commit sequence (first-load path).
    /// Every commit must precede all of its parents.
    pub fn generate<I>(commits: I, alloc_lanes_in_gaps: bool) -> Graph
    where
        I: IntoIterator<Item = (CommitId, Vec<CommitId>)>,
    {
        Self::generate_with_interval(commits, alloc_lanes_in_gaps, DEFAULT_KEYFRAME_INTERVAL)
    }

    pub fn generate_with_interval<I>(
        commits: I,
        alloc_lanes_in_gaps: bool,
        keyframe_interval: Row,
    ) -> Graph
    where
        I: IntoIterator<Item = (CommitId, Vec<CommitId>)>,
    {
        let mut generator = GraphGenerator::with_keyframe_interval(keyframe_interval);
        for (commit, parents) in commits {
            generator.add_commit(commit, &parents, alloc_lanes_in_gaps);
        }
        let graph = generator.into_graph();
        debug!(
            rows = graph.row_count(),
            arcs = graph.arcs().len() - 1,
            "generated commit graph"
        );
        graph
    }
}
