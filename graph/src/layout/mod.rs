pub mod generator;
pub mod playback;
pub mod splicer;

pub use generator::GraphGenerator;
pub use playback::{Playback, PlaybackExhausted};
pub use splicer::GraphSplicer;
