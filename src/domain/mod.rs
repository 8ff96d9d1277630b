pub mod aggregation;
pub mod cluster;
pub mod events;
pub mod migration;

pub use aggregation::*;
pub use cluster::*;
pub use events::*;
pub use migration::*;
