pub mod aggregate;
pub mod identity;

pub use aggregate::*;
pub use identity::*;
