//! Crossmatch-driven partition selection for partitioned sky catalogs.
//!
//! Skyjoin pairs the objects of two catalogs by sky position using only their
//! lightweight indexes, works out which storage partitions hold the matched
//! objects, fetches just those rows, and joins them into one merged table.
//!
//! ```no_run
//! # async fn demo() -> skyjoin::error::Result<()> {
//! use std::sync::Arc;
//! use skyjoin::catalog::CatalogRef;
//! use skyjoin::fetch::FetchConfig;
//! use skyjoin::pipeline::{CrossmatchRequest, Pipeline};
//! use skyjoin::storage::LocalStore;
//!
//! let pipeline = Pipeline::new(Arc::new(LocalStore::new("/data")), FetchConfig::default());
//! let request = CrossmatchRequest::new(
//!     CatalogRef::new("sdss", "sdss"),
//!     CatalogRef::new("hsc", "hsc"),
//!     1.0,
//! );
//! let merged = pipeline.run(&request).await?;
//! for record in merged.records() {
//!     println!("{} {:.6} {:.6}", record.object_id(), record.ra(), record.dec());
//! }
//! # Ok(())
//! # }
//! ```

pub mod assemble;
pub mod catalog;
pub mod columnar;
pub mod config;
pub mod context;
pub mod crossmatch;
pub mod error;
pub mod fetch;
pub mod geom;
pub mod healpix;
pub mod index;
pub mod kdtree;
pub mod pipeline;
pub mod resolve;
pub mod storage;

#[cfg(test)]
mod testing;
