//! Media resolution for drivelink.
//!
//! Turns post media references into publishable artifacts. References into
//! a connected drive become either a provider-hosted public URL or a local
//! copy in the public-serving directory; every local copy is tracked so the
//! batch can be cleaned up, or rolled back when a later item fails.

pub mod artifacts;
pub mod pipeline;
pub mod reference;

pub use artifacts::{ArtifactBatch, CleanupHandle};
pub use pipeline::{MediaResolver, ResolvedMedia, ResolverConfig};
pub use reference::{MediaKind, MediaReference, MediaSource};
