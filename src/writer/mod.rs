//! PDF writing for incremental updates.
//!
//! ```text
//! Object / raw body
//!     ↓
//! [ObjectSerializer] (deterministic object syntax)
//!     ↓
//! [IncrementalUpdate] (objects + xref subsections + trailer with /Prev)
//!     ↓
//! base bytes ++ update section
//! ```

mod incremental;
mod object_serializer;

pub use incremental::{IncrementalUpdate, WrittenUpdate};
pub use object_serializer::{hex_upper, ObjectSerializer};
