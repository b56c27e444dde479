use std::collections::HashSet;

use thiserror::Error;

use crate::core::arc::{Arc, Row};
use crate::core::frame::Frame;
use crate::core::oid::CommitId;

/// Playback was asked to advance past the end of known history. This is
/// an expected outcome (reaching the root of a shallow clone, or probing
/// for a commit the graph never reaches), not a defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no rows beyond row {row}")]
pub struct PlaybackExhausted {
    pub row: Row,
}

/// Replays the arc chain forward from a starting frame, one row at a
/// time, reclassifying which arcs are open or solved. Lanes are already
/// fixed on the arcs; playback never re-derives them. Only moves
/// forward; to restart, build a fresh playback from a keyframe.
#[derive(Debug, Clone)]
pub struct Playback {
    frame: Frame,
    /// Real commits passed over since the starting frame.
    seen: HashSet<CommitId>,
    /// When set, the next advance yields the current position instead of
    /// moving, so resuming exactly on a keyframe row is expressible.
    primed: bool,
}

impl Playback {
    /// Start above all history, at the synthetic row -1.
    pub fn from_start() -> Self {
        Self {
            frame: Frame::bootstrap(),
            seen: HashSet::new(),
            primed: false,
        }
    }

    /// Resume from a keyframe. The first advance re-yields the keyframe
    /// row itself.
    pub fn from_frame(frame: Frame) -> Self {
        Self {
            frame,
            seen: HashSet::new(),
            primed: true,
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn row(&self) -> Row {
        self.frame.row
    }

    pub fn commit(&self) -> &CommitId {
        &self.frame.commit
    }

    pub fn seen_commits(&self) -> &HashSet<CommitId> {
        &self.seen
    }

    /// Step to the next row.
    ///
    /// Every chain arc opened on that row is absorbed: the lane's
    /// previous occupant moves to the solved table and the new arc takes
    /// the open slot (stub arcs only move the cursor). A row on which no
    /// arc opens is anchored by an open arc closing there or a junction
    /// merging in there; a row with neither is past the end of history.
    pub fn advance_to_next_row(&mut self, arcs: &[Arc]) -> Result<(), PlaybackExhausted> {
        if self.primed {
            self.primed = false;
            return Ok(());
        }
        let goal = self.frame.row + 1;
        let mut commit: Option<CommitId> = None;
        while let Some(next) = arcs[self.frame.last_arc].next {
            let arc = &arcs[next];
            debug_assert!(arc.opened_at >= goal, "arc chain moved backwards");
            if arc.opened_at != goal {
                break;
            }
            commit.get_or_insert_with(|| arc.opened_by.clone());
            if !arc.is_parentless_commit() {
                self.frame.lanes.solve(arc.lane);
                self.frame.lanes.set_open(arc.lane, next);
            }
            self.frame.last_arc = next;
        }
        if commit.is_none() {
            for (_, idx) in self.frame.lanes.iter_open() {
                let arc = &arcs[idx];
                if arc.closed_at == Some(goal) {
                    commit = Some(arc.closed_by.clone());
                    break;
                }
                if let Some(junction) = arc.junction_at(goal) {
                    commit = Some(junction.joined_by.clone());
                    break;
                }
            }
        }
        match commit {
            Some(commit) => {
                self.frame.row = goal;
                self.frame.commit = commit;
                Ok(())
            }
            None => Err(PlaybackExhausted { row: self.frame.row }),
        }
    }

    /// Advance until the current commit is `target`, recording every
    /// real commit passed over (the target included). Returns
    /// immediately when already positioned on it. Exhaustion means the
    /// graph does not reach that commit.
    pub fn advance_to_commit(
        &mut self,
        arcs: &[Arc],
        target: &CommitId,
    ) -> Result<(), PlaybackExhausted> {
        loop {
            if self.frame.commit.is_real() {
                self.seen.insert(self.frame.commit.clone());
            }
            if &self.frame.commit == target {
                return Ok(());
            }
            self.advance_to_next_row(arcs)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Graph;

    fn sequence(pairs: &[(&str, &[&str])]) -> Vec<(CommitId, Vec<CommitId>)> {
        pairs
            .iter()
            .map(|(id, parents)| {
                (
                    CommitId::from(*id),
                    parents.iter().map(|p| CommitId::from(*p)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_walks_linear_history() {
        let graph = Graph::generate(
            sequence(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]),
            false,
        );
        let mut playback = Playback::from_start();
        for expected in ["a", "b", "c"] {
            playback.advance_to_next_row(graph.arcs()).unwrap();
            assert_eq!(playback.commit(), &CommitId::from(expected));
        }
        assert_eq!(
            playback.advance_to_next_row(graph.arcs()),
            Err(PlaybackExhausted { row: 2 })
        );
    }

    #[test]
    fn test_reconstructs_row_with_no_opened_arc() {
        // p2 closes its incoming arc and merges into an existing arc:
        // nothing opens on its row, yet playback must still stop there.
        let graph = Graph::generate(
            sequence(&[
                ("m", &["p1", "p2"]),
                ("p1", &["b"]),
                ("p2", &["b"]),
                ("b", &[]),
            ]),
            false,
        );
        let mut playback = Playback::from_start();
        for _ in 0..3 {
            playback.advance_to_next_row(graph.arcs()).unwrap();
        }
        assert_eq!(playback.row(), 2);
        assert_eq!(playback.commit(), &CommitId::from("p2"));

        let frame = playback.frame().clean_copy(graph.arcs());
        let closed = frame.arcs_closed_by_commit(graph.arcs());
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].lane, 1);
        assert_eq!(frame.home_lane(graph.arcs()), Some(1));
    }

    #[test]
    fn test_reconstructs_junction_only_tip_row() {
        let graph = Graph::generate(
            sequence(&[("h1", &["p"]), ("h2", &["p"]), ("p", &[])]),
            false,
        );
        let mut playback = Playback::from_start();
        playback.advance_to_next_row(graph.arcs()).unwrap();
        playback.advance_to_next_row(graph.arcs()).unwrap();
        assert_eq!(playback.row(), 1);
        assert_eq!(playback.commit(), &CommitId::from("h2"));
    }

    #[test]
    fn test_advance_to_commit_records_everything_passed() {
        let graph = Graph::generate(
            sequence(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]),
            false,
        );
        let mut playback = Playback::from_start();
        playback.advance_to_commit(graph.arcs(), &"c".into()).unwrap();
        let seen = playback.seen_commits();
        assert!(seen.contains(&"a".into()));
        assert!(seen.contains(&"b".into()));
        assert!(seen.contains(&"c".into()));

        // Already positioned: returns immediately, still records.
        playback.advance_to_commit(graph.arcs(), &"c".into()).unwrap();
        assert_eq!(playback.row(), 2);
    }

    #[test]
    fn test_advance_to_missing_commit_exhausts() {
        let graph = Graph::generate(sequence(&[("a", &["b"]), ("b", &[])]), false);
        let mut playback = Playback::from_start();
        let err = playback
            .advance_to_commit(graph.arcs(), &"nowhere".into())
            .unwrap_err();
        assert_eq!(err, PlaybackExhausted { row: 1 });
        assert!(playback.seen_commits().contains(&"a".into()));
        assert!(playback.seen_commits().contains(&"b".into()));
    }

    #[test]
    fn test_resume_from_keyframe_yields_keyframe_row_first() {
        let mut graph = Graph::generate(
            sequence(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]),
            false,
        );
        let frame = graph.frame(1).unwrap();
        let mut playback = Playback::from_frame(frame);
        playback.advance_to_next_row(graph.arcs()).unwrap();
        assert_eq!(playback.row(), 1);
        playback.advance_to_next_row(graph.arcs()).unwrap();
        assert_eq!(playback.row(), 2);
    }

    #[test]
    fn test_keyframe_caching_is_observationally_transparent() {
        // A long alternating history, replayed with a tiny keyframe
        // interval: the frame for a row must be identical before and
        // after opportunistic keyframes appear near it.
        let mut pairs: Vec<(String, Vec<String>)> = Vec::new();
        for i in 0..40 {
            if i % 7 == 3 {
                pairs.push((format!("m{i}"), vec![format!("c{}", i + 1), format!("c{}", i + 2)]));
            } else {
                pairs.push((format!("c{i}"), vec![format!("c{}", i + 1)]));
            }
        }
        pairs.push(("c40".to_string(), vec![]));
        let commits: Vec<(CommitId, Vec<CommitId>)> = pairs
            .into_iter()
            .map(|(id, ps)| (id.into(), ps.into_iter().map(CommitId::from).collect()))
            .collect();

        let mut graph = Graph::generate_with_interval(commits, false, 1000);
        let before = graph.frame(23).unwrap();
        // The first lookup planted opportunistic keyframes; this one hits
        // a much closer starting point.
        let after = graph.frame(23).unwrap();
        assert!(before.same_content(graph.arcs(), &after, graph.arcs()));
        let near = graph.frame(24).unwrap();
        assert_eq!(near.row, 24);
    }
}
