//! # dstore
//!
//! Distributed coordination client for shared run state, leases and locks.
//!
//! - [`DynamicStatusStore`]: get/put/delete, prefix queries, compare-and-swap
//!   and [`DssAction`] batch transactions over a linearizable key-value backend
//! - [`WatchDispatcher`]: NEW/MODIFIED/DELETE notifications on keys and prefixes
//! - [`RetryableUpdateProcessor`]: bounded randomized back-off for conflicting
//!   document-store updates
//! - [`CredentialsStore`]: encrypted credentials layered on the status store
//!
//! ```ignore
//! let config = StoreConfig::new()?.validate()?;
//! let store = DynamicStatusStore::connect(&config).await?;
//!
//! if store.put_swap("run.U1.lock", None, "worker-7").await? {
//!     // lock acquired
//! }
//! ```

mod backend;
mod config;
mod credentials;
mod errors;
mod metrics;
mod retry;
mod store;
mod utils;
mod watch;

pub use backend::*;
pub use config::*;
pub use credentials::*;
pub use errors::*;
pub use metrics::gather_metrics;
pub use retry::*;
pub use store::*;
pub use watch::*;
