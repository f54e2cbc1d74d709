mod bounds;
mod registry;
mod view;

pub use bounds::{filter_visible, MapBounds};
pub use registry::MapRegistry;
pub use view::{MapOptions, MapState, MapView};
