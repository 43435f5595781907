use std::collections::HashSet;

use futures::future::join_all;
use tracing::warn;

use crate::error::UnlockError;
use crate::registry::{AssetFilter, AssetRecord, Registry, BATCH_LIMIT, PAGE_LIMIT};

/// Which assets to target. Exactly one variant is ever populated;
/// enforcing that is the CLI's job, before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Creators(Vec<String>),
    Collections(Vec<String>),
    Assets(Vec<String>),
}

/// Materializes the complete, deduplicated asset set for a selector by
/// driving the registry's paginated queries.
pub struct CatalogBuilder<'a, R: Registry> {
    registry: &'a R,
}

impl<'a, R: Registry> CatalogBuilder<'a, R> {
    pub fn new(registry: &'a R) -> Self {
        Self { registry }
    }

    /// Fetch every asset the selector resolves to.
    ///
    /// Failures below the run level are logged and shrink coverage instead
    /// of aborting: a failed pagination drops that one filter's
    /// contribution, a failed id batch drops that one batch.
    pub async fn build(&self, selector: &Selector) -> Vec<AssetRecord> {
        let assets = match selector {
            Selector::Creators(creators) => {
                self.fan_out(creators.iter().cloned().map(AssetFilter::Creator).collect())
                    .await
            }
            Selector::Collections(collections) => {
                self.fan_out(
                    collections
                        .iter()
                        .cloned()
                        .map(AssetFilter::Collection)
                        .collect(),
                )
                .await
            }
            Selector::Assets(ids) => self.fetch_batches(ids).await,
        };
        dedup_by_id(assets)
    }

    /// Consume every page of one filter's results.
    ///
    /// The registry reports an authoritative grand total only after
    /// returning at least one page, so the expected total starts at a
    /// sentinel above zero and is re-read after every page. An empty page
    /// also terminates the loop: a lagging, too-high total must never spin
    /// it forever.
    pub async fn all_by_filter(
        &self,
        filter: &AssetFilter,
    ) -> Result<Vec<AssetRecord>, UnlockError> {
        let mut page = 1;
        let mut total = PAGE_LIMIT as usize + 1;
        let mut assets: Vec<AssetRecord> = Vec::new();

        while assets.len() < total {
            let result = self.registry.search(filter, page, PAGE_LIMIT).await?;
            if let Some(grand_total) = result.grand_total {
                total = grand_total as usize;
            }
            if result.items.is_empty() {
                break;
            }
            assets.extend(result.items);
            page += 1;
        }

        Ok(assets)
    }

    /// Unordered parallel pagination, one loop per filter value. A failed
    /// filter loses its contribution; the others are unaffected.
    async fn fan_out(&self, filters: Vec<AssetFilter>) -> Vec<AssetRecord> {
        let results = join_all(
            filters
                .iter()
                .map(|filter| async move { (filter, self.all_by_filter(filter).await) }),
        )
        .await;

        let mut assets = Vec::new();
        for (filter, result) in results {
            match result {
                Ok(items) => assets.extend(items),
                Err(err) => warn!("{}: pagination failed, skipping: {err}", filter.describe()),
            }
        }
        assets
    }

    /// Fixed-size id batches, fetched one at a time in source order. A
    /// failing batch is skipped; the partial result degrades coverage
    /// rather than aborting the run.
    async fn fetch_batches(&self, ids: &[String]) -> Vec<AssetRecord> {
        let mut assets = Vec::new();
        for chunk in ids.chunks(BATCH_LIMIT) {
            match self.registry.batch(chunk).await {
                Ok(records) => assets.extend(records),
                Err(err) => warn!("skipping batch of {} ids: {err}", chunk.len()),
            }
        }
        assets
    }
}

/// First occurrence wins; order is otherwise preserved.
fn dedup_by_id(assets: Vec<AssetRecord>) -> Vec<AssetRecord> {
    let mut seen = HashSet::new();
    assets
        .into_iter()
        .filter(|asset| seen.insert(asset.id.clone()))
        .collect()
}
