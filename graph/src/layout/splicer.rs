use std::collections::HashSet;

use smallvec::SmallVec;
use tracing::debug;

use crate::core::arc::{Arc, ArcIdx, ArcJunction, Row};
use crate::core::graph::{Graph, GraphError};
use crate::core::oid::CommitId;

use super::generator::GraphGenerator;
use super::playback::Playback;

/// Merges a freshly generated prefix of commit history onto an existing
/// graph when refs have moved, reusing the unaffected tail instead of
/// regenerating it.
///
/// Usage is a scoped session: construct with the old graph and the two
/// head sets, feed the new commit sequence top-down through
/// `splice_new_commit` until `found_equilibrium` turns true (or the
/// sequence ends), then call `finish` exactly once to obtain the merged
/// graph.
pub struct GraphSplicer {
    old_graph: Graph,
    old_playback: Playback,
    generator: GraphGenerator,
    /// Branch tips that appeared; all must be fed before equilibrium.
    required_new: HashSet<CommitId>,
    /// Branch tips that disappeared; all must be passed by the old
    /// playback before equilibrium.
    required_old: HashSet<CommitId>,
    old_exhausted: bool,
    /// (new row, old row) where the two histories re-converge.
    equilibrium: Option<(Row, Row)>,
}

impl GraphSplicer {
    pub fn new(
        old_graph: Graph,
        old_heads: &HashSet<CommitId>,
        new_heads: &HashSet<CommitId>,
    ) -> Self {
        let required_new = new_heads.difference(old_heads).cloned().collect();
        let required_old: HashSet<CommitId> =
            old_heads.difference(new_heads).cloned().collect();
        let generator = GraphGenerator::with_keyframe_interval(old_graph.keyframe_interval());
        let mut splicer = Self {
            old_graph,
            old_playback: Playback::from_start(),
            generator,
            required_new,
            required_old,
            old_exhausted: false,
            equilibrium: None,
        };
        // Identical head sets mean identical histories: the graphs agree
        // from the very top and nothing needs regenerating.
        if splicer.required_new.is_empty() && splicer.required_old.is_empty() {
            splicer.equilibrium = Some((-1, -1));
        }
        splicer
    }

    /// True once the caller should stop feeding commits.
    pub fn found_equilibrium(&self) -> bool {
        self.equilibrium.is_some()
    }

    /// Whether the old graph ran out before the histories re-converged.
    pub fn old_graph_exhausted(&self) -> bool {
        self.old_exhausted
    }

    /// Feed the next commit of the new sequence (top-down).
    ///
    /// `was_known` tells the splicer the commit already exists in the old
    /// graph's history, so the old playback can be aligned with it.
    pub fn splice_new_commit(
        &mut self,
        commit: CommitId,
        parents: &[CommitId],
        was_known: bool,
        alloc_lanes_in_gaps: bool,
    ) {
        if self.equilibrium.is_some() {
            debug_assert!(false, "commit fed after equilibrium was reached");
            return;
        }
        self.generator
            .add_commit(commit.clone(), parents, alloc_lanes_in_gaps);
        self.required_new.remove(&commit);

        if was_known && !self.old_exhausted && !self.old_playback.seen_commits().contains(&commit)
        {
            if self
                .old_playback
                .advance_to_commit(self.old_graph.arcs(), &commit)
                .is_err()
            {
                // The old graph simply does not reach this far; the
                // session degrades to a full regeneration.
                debug!(%commit, "old graph exhausted before equilibrium");
                self.old_exhausted = true;
            }
            if !self.required_old.is_empty() {
                let seen = self.old_playback.seen_commits();
                self.required_old.retain(|c| !seen.contains(c));
            }
        }

        if self.required_new.is_empty()
            && self.required_old.is_empty()
            && !self.old_exhausted
            && self.old_playback.commit() == self.generator.commit()
            && self.generator.frame().is_equilibrium_reached(
                self.generator.graph().arcs(),
                self.old_playback.frame(),
                self.old_graph.arcs(),
            )
        {
            let rows = (self.generator.row(), self.old_playback.row());
            debug!(new_row = rows.0, old_row = rows.1, "splice equilibrium reached");
            self.equilibrium = Some(rows);
        }
    }

    /// Complete the session and return the merged graph.
    ///
    /// With an equilibrium, the old graph is pruned above the boundary,
    /// re-based, and front-spliced with the new prefix; open arcs at the
    /// boundary carry their closing rows and below-boundary junctions
    /// over from their old counterparts. Without one, the freshly
    /// generated graph replaces the old graph outright.
    pub fn finish(self) -> Result<Graph, GraphError> {
        let Some((new_row, old_row)) = self.equilibrium else {
            debug!("no equilibrium; replacing graph wholesale");
            return Ok(self.generator.into_graph());
        };
        let offset = new_row - old_row;

        // Pair up the arcs still open on both sides of the boundary.
        let new_frame = self.generator.frame();
        let old_frame = self.old_playback.frame();
        let new_arcs = self.generator.graph().arcs();
        let old_arcs = self.old_graph.arcs();
        let mut carried: Vec<(ArcIdx, ArcIdx)> = Vec::new();
        let lanes = new_frame
            .lanes()
            .lane_count()
            .max(old_frame.lanes().lane_count());
        for lane in 0..lanes {
            match (
                new_frame.live_open_at(lane, new_arcs),
                old_frame.live_open_at(lane, old_arcs),
            ) {
                (Some(n), Some(o)) => {
                    debug_assert!(
                        new_arcs[n].opened_by == old_arcs[o].opened_by
                            && new_arcs[n].closed_by == old_arcs[o].closed_by,
                        "open arcs disagree at equilibrium lane {lane}"
                    );
                    carried.push((n, o));
                }
                (None, None) => {}
                _ => debug_assert!(false, "equilibrium frames disagree at lane {lane}"),
            }
        }

        let mut new_graph = self.generator.into_graph();
        for &(n, o) in &carried {
            let old_arc = &self.old_graph.arcs()[o];
            let junctions = splice_junctions(&new_graph.arcs[n], old_arc, old_row, offset)?;
            let arc = &mut new_graph.arcs[n];
            arc.closed_at = old_arc.closed_at.map(|c| c + offset);
            arc.junctions = junctions;
        }

        let mut merged = self.old_graph;
        merged.delete_keyframes_with_arcs_opened_above(old_row);
        merged.delete_arcs_opened_above(old_row);
        merged.shift_rows(offset);
        merged.insert_front(&new_graph, new_row);
        merged.validate()?;
        debug!(
            rows = merged.row_count(),
            offset, "spliced new prefix onto existing graph"
        );
        Ok(merged)
    }
}

/// Junctions of a boundary arc after splicing: the new graph's (all above
/// the boundary) followed by the old graph's below-boundary ones,
/// row-shifted. The result must stay sorted with no duplicate pairs.
fn splice_junctions(
    new_arc: &Arc,
    old_arc: &Arc,
    old_row: Row,
    offset: Row,
) -> Result<SmallVec<[ArcJunction; 2]>, GraphError> {
    let mut junctions = new_arc.junctions.clone();
    for junction in &old_arc.junctions {
        if junction.joined_at > old_row {
            junctions.push(ArcJunction {
                joined_at: junction.joined_at + offset,
                joined_by: junction.joined_by.clone(),
            });
        }
    }
    let sorted = junctions.windows(2).all(|pair| {
        pair[0].joined_at < pair[1].joined_at
            || (pair[0].joined_at == pair[1].joined_at && pair[0].joined_by != pair[1].joined_by)
    });
    if !sorted {
        return Err(GraphError::UnsortedJunctions {
            row: new_arc.opened_at,
        });
    }
    Ok(junctions)
}
