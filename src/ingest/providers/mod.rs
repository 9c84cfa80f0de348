// src/ingest/providers/mod.rs
pub mod event_registry;
pub mod fixture;

pub use event_registry::EventRegistryClient;
pub use fixture::FixtureSource;
