//! Communication layer and distributed algorithms.

pub mod collective;
pub mod communicator;
pub mod exchange;
pub mod owner_reduction;
pub mod wire;

pub use communicator::{CommTag, Communicator, ExchangeTags, NoComm, RayonComm};
pub use owner_reduction::{OwnerReductionTags, reduce_to_owners};
