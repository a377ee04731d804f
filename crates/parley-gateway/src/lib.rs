pub mod connection;
pub mod delivery;
pub mod history;
pub mod ingest;
pub mod registry;
pub mod upload;

pub use registry::Registry;
