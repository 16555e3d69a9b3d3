pub mod error;
pub mod geometry;
pub mod snapshot;

pub use error::*;
pub use geometry::*;
pub use snapshot::*;
