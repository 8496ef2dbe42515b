//! Mediagate-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across mediagate:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for media items, plans and callers
//! - **Core Types**: Media kinds, processing states and routes, quality labels
//! - **Path Utilities**: Accepted extension tables per media kind
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use mediagate_common::{MediaItemId, MediaType, ProcessingStatus, Error, Result};
//! use mediagate_common::paths::accepted_extensions;
//!
//! let item_id = MediaItemId::new();
//! assert!(accepted_extensions(MediaType::Image).contains(&"heic"));
//! assert!(ProcessingStatus::Pending.can_transition_to(ProcessingStatus::Processing));
//!
//! fn example(item_id: MediaItemId) -> Result<()> {
//!     Err(Error::not_found("media item", item_id))
//! }
//! # let _ = example(item_id);
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
