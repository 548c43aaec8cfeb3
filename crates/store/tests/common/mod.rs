pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{sample_document, seeded_bytes};
