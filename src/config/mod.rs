pub mod secrets;

pub use secrets::ApiKeys;
