//! Worker module for issuing requests to one target
//!
//! Workers are the only readers of a target's lane. Each one loops:
//! **receive -> execute -> report -> repeat**.
//!
//! 1. Receives the next request dispatched by the Loader
//! 2. Opens a fresh connection to the target and issues the request
//! 3. Measures connect time, time to first byte and total time
//! 4. Sends the classified outcome to the Collector
//! 5. Releases its lane slot so the Loader can dispatch again
//!
//! # Example
//!
//! ```ignore
//! use dealgood_core::worker::WorkerBuilder;
//!
//! let worker = WorkerBuilder::new(0)
//!     .experiment("exp")
//!     .target(target)
//!     .requests(lane_rx)
//!     .timings(timings_tx)
//!     .metrics(metrics.target("exp", target.name()))
//!     .build()?;
//!
//! let stats = worker.run(cancel).await;
//! println!("Completed: {}", stats.completed);
//! ```

mod builder;
mod client;
mod executor;
mod stats;
mod tls;

pub use builder::WorkerBuilder;
pub use client::{FetchError, TargetClient, DEFAULT_REQUEST_TIMEOUT};
pub use executor::Worker;
pub use stats::WorkerStats;
pub use tls::insecure_connector;
