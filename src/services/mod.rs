pub mod correlator;
pub mod engine;
pub mod field_resolver;
pub mod volume_mapper;

pub use engine::DiskEventEngine;
