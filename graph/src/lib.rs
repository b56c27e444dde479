pub mod core;
pub mod layout;

pub use crate::core::{
    Arc, ArcIdx, ArcJunction, ChainIter, CommitId, FlatLane, Frame, Graph, GraphError, LaneIdx,
    LaneTable, Row, DEFAULT_KEYFRAME_INTERVAL,
};
pub use crate::layout::{GraphGenerator, GraphSplicer, Playback, PlaybackExhausted};
