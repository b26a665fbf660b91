//! Safe SQL builder for JSONB document tables: identifiers from code only, values as parameters.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
