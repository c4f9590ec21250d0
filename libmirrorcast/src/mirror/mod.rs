//! The mirroring engine
//!
//! Leaf-first: [`capabilities`] probes the destination, [`media`] and
//! [`poll`] convert attachments, [`transform`] builds submissions,
//! [`cursor`] picks the fetch window, [`pipeline`] drives a pass,
//! [`pin`] reconciles pinned posts and [`profile`] syncs account metadata.

pub mod capabilities;
pub mod cursor;
pub mod media;
pub mod pin;
pub mod pipeline;
pub mod poll;
pub mod profile;
pub mod transform;

pub use capabilities::Capabilities;
pub use cursor::{compute_cursor, StartDatePrompt, StartMode};
pub use pipeline::{PassReport, Pipeline, PostOutcome, PostState};
pub use transform::{transform, TransformOptions};
