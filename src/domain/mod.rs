// Domain layer - Pure data models and algorithms
pub mod batch;
pub mod buffer;
pub mod cumulative;
pub mod dashboard;
pub mod location;
pub mod navigation;
pub mod range;
pub mod status;
