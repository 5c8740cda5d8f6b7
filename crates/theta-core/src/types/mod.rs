//! Core data types and enums.
//!
//! Orders and positions are explicit structs with a closed set of fields;
//! kind, direction and status are enums rather than free-form strings.

pub mod enums;
pub mod instrument;
pub mod trading;

pub use enums::*;
pub use instrument::*;
pub use trading::*;
