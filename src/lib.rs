pub mod cli;
pub mod cluster;
pub mod error;
pub mod node;
pub mod protocol;
pub mod settings;
pub mod transport;
