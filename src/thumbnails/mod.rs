//! Thumbnail previews.
//!
//! Previews are cached per item and content fingerprint, with the item's
//! revision as the version, so a status change that produces a new
//! thumbnail replaces any earlier (possibly failed) entry.

mod cache;
mod preview;

pub use cache::{Lookup, PreviewKey, ThumbnailCache};
pub use preview::{
    content_type_for, fingerprint_file, load_preview, preview_source, Placeholder, Preview,
};
