//! Element data model.
//!
//! Elements are typed records with a tagged field map; values are the
//! runtime scalars stored in those fields.

mod element;
mod value;

pub use element::{Element, ElementId};
pub use value::Value;
