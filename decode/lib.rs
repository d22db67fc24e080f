#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod accessor;
pub mod cursor;
pub mod dictionary;
pub mod error;
pub mod header;
pub mod locator;
#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod types;
pub mod wah;
pub mod shared {
    pub use super::shared_files as files;
}

#[cfg(test)]
mod test_fixtures;

pub use accessor::GenotypeAccessor;
pub use error::GtbError;
pub use types::LinePosition;
