//! Index manager (S4.5): keeps a declared set of [`qscan_schemas::IndexRule`]s
//! applied against their backing collections, skipping fast when nothing
//! is missing and creating the rest with bounded concurrency and retry.

pub mod creator;
pub mod key;
pub mod manager;
pub mod postgres_creator;

pub use creator::{IndexCreateError, IndexCreator};
pub use key::normalized_key_string;
pub use manager::{apply_rules, ApplyConfig, ApplyReport};
pub use postgres_creator::PostgresIndexCreator;
