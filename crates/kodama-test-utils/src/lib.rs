//! Testing utilities and fixtures for kodama.
//!
//! - **Fixtures**: temporary data roots laid out like a real installation
//! - **Builders**: fluent construction of snapshots with controlled ages
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use kodama_test_utils::{builders::SnapshotBuilder, fixtures::TestDataDir};
//!
//! #[tokio::test]
//! async fn test_latest() {
//!     let data = TestDataDir::new();
//!     let store = data.store().await;
//!     store.save(&SnapshotBuilder::new("A").hours_ago(2).build()).await.unwrap();
//! }
//! ```

pub mod builders;
pub mod fixtures;

pub use builders::SnapshotBuilder;
pub use fixtures::TestDataDir;
