pub mod accumulator;

pub use accumulator::{ResourceSegment, SegmentAccumulator};
