//! Mediagate-DB: Database schema, migrations, and query operations
//!
//! This crate persists media items, their issued conversion plans and their
//! produced quality variants using SQLite with rusqlite and r2d2 connection
//! pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use mediagate_db::pool::{init_pool, get_conn};
//! use mediagate_db::queries::media_items;
//! use mediagate_common::MediaItemId;
//!
//! let pool = init_pool("/var/lib/mediagate/db.sqlite").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let item = media_items::get_media_item(&conn, MediaItemId::new()).unwrap();
//! assert!(item.is_none());
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
