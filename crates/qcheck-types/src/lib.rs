//! Structural value model for query results.
//!
//! Every result the harness handles, whether decoded from the engine under
//! test or loaded from an expected-results suite file, ends up as a [`Value`]
//! tree. Comparison and report serialization only ever see this one type, so
//! nothing downstream needs to know which encoding a value came from.

pub mod row;
pub mod value;

pub use row::Row;
pub use value::Value;
