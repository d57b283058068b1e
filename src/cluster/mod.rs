//! Ring membership: who is in the ring, who coordinates it, and in what order
//! the token travels.
pub mod directory;
pub mod node_id;
pub mod ring_order;

pub use directory::{Admission, Directory};
pub use node_id::NodeId;
pub use ring_order::RingOrder;
