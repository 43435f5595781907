//! Bulk unlock pipeline for Metaplex digital assets.
//!
//! Discovery, packing and submission are separate stages glued together by
//! [`run_unlock`]: a [`Selector`] is resolved against the paginated asset
//! registry into a deduplicated catalog, the catalog is packed into
//! size-bounded transactions, and the transactions are signed, submitted
//! in parallel and confirmed, producing a [`RunReport`].

pub mod catalog;
pub mod error;
pub mod pack;
pub mod registry;
pub mod submit;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::info;

pub use catalog::{CatalogBuilder, Selector};
pub use error::UnlockError;
pub use pack::{
    build_unlock_instruction, PackedTransaction, Packer, TxSizeEstimator, WireSizeEstimator,
    TRANSACTION_SIZE_LIMIT,
};
pub use registry::{
    AssetFilter, AssetPage, AssetRecord, DasClient, Registry, BATCH_LIMIT, PAGE_LIMIT,
};
pub use submit::{RpcSubmitClient, RunReport, SubmissionCoordinator, SubmitClient};

/// Discovery and packing output, ready for submission.
pub struct PreparedRun {
    pub transactions: Vec<PackedTransaction>,
    pub dropped: usize,
}

impl PreparedRun {
    /// Assets a submission of this run would touch.
    pub fn asset_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.instructions.len()).sum()
    }
}

/// Resolve `selector` into a catalog and pack it into transactions paid
/// for by `authority`. The first half of [`run_unlock`], split out so a
/// caller can report progress before submission starts.
pub async fn prepare_unlock<R: Registry>(
    registry: &R,
    authority: &Pubkey,
    selector: &Selector,
) -> Result<PreparedRun, UnlockError> {
    let catalog = CatalogBuilder::new(registry).build(selector).await;
    info!("fetched {} assets", catalog.len());

    let packer = Packer::new(&WireSizeEstimator, TRANSACTION_SIZE_LIMIT);
    let (transactions, dropped) = packer.pack(&catalog, authority)?;
    info!(
        "packed {} transactions ({} assets dropped)",
        transactions.len(),
        dropped
    );
    Ok(PreparedRun {
        transactions,
        dropped,
    })
}

/// Sign, submit and confirm a prepared run.
pub async fn submit_unlock<C: SubmitClient>(
    submit: &C,
    keypair: &Keypair,
    prepared: PreparedRun,
) -> Result<RunReport, UnlockError> {
    let coordinator = SubmissionCoordinator::new(submit, keypair);
    let mut report = coordinator.submit_all(prepared.transactions).await?;
    report.dropped = prepared.dropped;
    Ok(report)
}

/// Run the whole pipeline for one selector.
///
/// Per-asset and per-transaction failures are folded into the report; the
/// errors that escape here are the ones that invalidate the entire run
/// (an oversized instruction, or failing to obtain the shared blockhash).
pub async fn run_unlock<R, C>(
    registry: &R,
    submit: &C,
    keypair: &Keypair,
    selector: &Selector,
) -> Result<RunReport, UnlockError>
where
    R: Registry,
    C: SubmitClient,
{
    let prepared = prepare_unlock(registry, &keypair.pubkey(), selector).await?;
    submit_unlock(submit, keypair, prepared).await
}
