//! YouTube Data API v3 access through a pool of API keys.
//!
//! The only endpoint this crate needs is `search.list`; every call goes through
//! [`RequestRouter`], which hides the individual keys behind one retrying
//! interface:
//!
//! 1. The pool's current key is appended as the `key` query parameter.
//! 2. A `200 OK` with a JSON body is returned to the caller and counted as a
//!    success for that key.
//! 3. Anything else marks the key as failed (and as quota-exceeded if the
//!    API's error message says so), rotates to the next usable key, waits a
//!    short backoff, and tries again.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use wayback_tube::clock::SystemClock;
//! use wayback_tube::credentials::CredentialPool;
//! use wayback_tube::store::MemoryStore;
//! use wayback_tube::youtube_api::{RequestRouter, RouterConfig};
//!
//! # async fn example() -> eyre::Result<()> {
//! let mut pool = CredentialPool::load(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
//! pool.add("AIzaSy-not-a-real-key-but-long-enough-xx");
//! let router = RequestRouter::new(Arc::new(Mutex::new(pool)), RouterConfig::default())?;
//!
//! let params = [
//!     ("part", "snippet".to_string()),
//!     ("q", "minecraft".to_string()),
//!     ("type", "video".to_string()),
//! ];
//! let body = router.execute("search", &params).await?;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod router;
pub mod search;

pub use error::RouterError;
pub use router::{RequestRouter, RouterConfig};
pub use search::{SearchListResponse, SearchOrder, SearchResult, VideoDuration};
