//! Loader: the request scheduler
//!
//! The Loader coordinates one experiment run:
//! - Spawning `targets × concurrency` workers, one lane per target
//! - Pacing requests from the source at the experiment rate
//! - Fanning each request out to every target without waiting
//! - Shutting workers down on deadline, cancellation or end of stream
//!
//! # Example
//!
//! ```ignore
//! use dealgood_core::{Collector, LoaderBuilder};
//!
//! let (loader, timings_rx) = LoaderBuilder::new()
//!     .experiment(experiment.clone())
//!     .source(source)
//!     .metrics(Arc::clone(&metrics))
//!     .build()?;
//! let collector = Collector::new(&experiment, timings_rx, metrics);
//!
//! let (summary, snapshot) = tokio::join!(loader.send(cancel), collector.run());
//! ```

mod builder;
mod executor;
mod pacer;

pub use builder::LoaderBuilder;
pub use executor::{LoadSummary, Loader};
pub use pacer::Pacer;
