pub mod device;
pub mod movement;
pub mod ports;
pub mod ranging;
pub mod registry;
pub mod targeting;

pub use device::*;
pub use movement::*;
pub use ports::*;
pub use ranging::*;
pub use registry::*;
pub use targeting::*;
