mod builder;

pub use builder::{MarkerBuild, MarkerBuilder};
