//! The crossmatch request: index load, match, resolve, fetch, assemble.

use std::sync::Arc;

use tracing::info;

use crate::assemble::{MergedTable, assemble};
use crate::catalog::CatalogRef;
use crate::context::CatalogContext;
use crate::crossmatch::{CrossmatchConfig, CrossmatchStrategy, MatchedPairSet, NearestNeighbour};
use crate::error::{MatchError, Result};
use crate::fetch::{FetchConfig, PartitionFetcher};
use crate::resolve::resolve;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq)]
pub struct CrossmatchRequest {
    pub left: CatalogRef,
    pub right: CatalogRef,
    pub tolerance_arcsec: f64,
    /// Bulk columns to fetch from both catalogs; `None` fetches all of them.
    pub columns: Option<Vec<String>>,
}

impl CrossmatchRequest {
    pub fn new(left: CatalogRef, right: CatalogRef, tolerance_arcsec: f64) -> Self {
        Self {
            left,
            right,
            tolerance_arcsec,
            columns: None,
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Checks that need no I/O.
    pub fn validate(&self) -> Result<()> {
        CrossmatchConfig::new(self.tolerance_arcsec).validate()?;
        if self.left.name == self.right.name {
            return Err(MatchError::Config(format!(
                "left and right catalogs are both named '{}'; merged column prefixes would collide",
                self.left.name
            )));
        }
        Ok(())
    }
}

/// Runs crossmatch requests against one object store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    strategy: Arc<dyn CrossmatchStrategy>,
    fetch: FetchConfig,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ObjectStore>, fetch: FetchConfig) -> Self {
        Self {
            store,
            strategy: Arc::new(NearestNeighbour),
            fetch,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn CrossmatchStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// The match catalog only; no bulk partition is read.
    pub async fn matches(&self, request: &CrossmatchRequest) -> Result<MatchedPairSet> {
        request.validate()?;
        let mut ctx = CatalogContext::new(Arc::clone(&self.store));
        self.crossmatch(&mut ctx, request).await
    }

    /// Run the whole request and return the merged table.
    pub async fn run(&self, request: &CrossmatchRequest) -> Result<MergedTable> {
        request.validate()?;
        self.fetch.validate()?;
        let mut ctx = CatalogContext::new(Arc::clone(&self.store));

        let matches = self.crossmatch(&mut ctx, request).await?;
        let plan = resolve(&matches);
        info!(
            left = %request.left.name,
            left_partitions = plan.left.len(),
            right = %request.right.name,
            right_partitions = plan.right.len(),
            "partitions resolved"
        );

        let fetcher = PartitionFetcher::new(Arc::clone(ctx.store()), self.fetch.clone());
        let columns = request.columns.as_deref();
        let (left, right) = tokio::try_join!(
            fetcher.fetch(&request.left, &plan.left, columns),
            fetcher.fetch(&request.right, &plan.right, columns),
        )?;

        Ok(assemble(&matches, left, right)?.with_partition_column(request.left.partition_column()))
    }

    async fn crossmatch(&self, ctx: &mut CatalogContext, request: &CrossmatchRequest) -> Result<MatchedPairSet> {
        let left = ctx.index(&request.left).await?;
        let right = ctx.index(&request.right).await?;
        let config = CrossmatchConfig::new(request.tolerance_arcsec);
        self.strategy.crossmatch(&left, &right, &config)
    }
}
