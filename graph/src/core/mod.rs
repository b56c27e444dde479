pub mod arc;
pub mod frame;
pub mod graph;
pub mod oid;

pub use arc::{Arc, ArcIdx, ArcJunction, LaneIdx, Row, START_ARC};
pub use frame::{FlatLane, Frame, LaneTable};
pub use graph::{ChainIter, Graph, GraphError, DEFAULT_KEYFRAME_INTERVAL};
pub use oid::CommitId;
