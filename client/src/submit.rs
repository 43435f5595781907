use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::{Transaction, TransactionError};
use tracing::warn;

use crate::error::UnlockError;
use crate::pack::{transaction_account_count, PackedTransaction, TRANSACTION_ACCOUNT_LIMIT};

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Aggregate success/failure summary for one invocation. The only output
/// that outlives the run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Instructions actually submitted (catalog size minus dropped assets).
    pub processed: usize,
    pub successes: usize,
    pub failures: usize,
    /// Assets dropped during packing; counted in neither bucket.
    pub dropped: usize,
}

/// The few network operations submission needs, behind a seam so the
/// coordinator is testable without a ledger.
#[async_trait]
pub trait SubmitClient: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, UnlockError>;

    async fn send(&self, transaction: &Transaction) -> Result<Signature, UnlockError>;

    /// Wait for the transaction to reach confirmed commitment, bounded by
    /// the validity of `blockhash`. `Ok(None)` is on-chain success,
    /// `Ok(Some(err))` an on-chain failure.
    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
    ) -> Result<Option<TransactionError>, UnlockError>;
}

/// [`SubmitClient`] over the nonblocking Solana RPC client.
pub struct RpcSubmitClient {
    rpc: RpcClient,
}

impl RpcSubmitClient {
    pub fn new(url: impl ToString) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(url.to_string(), CommitmentConfig::confirmed()),
        }
    }
}

#[async_trait]
impl SubmitClient for RpcSubmitClient {
    async fn latest_blockhash(&self) -> Result<Hash, UnlockError> {
        Ok(self.rpc.get_latest_blockhash().await?)
    }

    async fn send(&self, transaction: &Transaction) -> Result<Signature, UnlockError> {
        Ok(self.rpc.send_transaction(transaction).await?)
    }

    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
    ) -> Result<Option<TransactionError>, UnlockError> {
        loop {
            let statuses = self.rpc.get_signature_statuses(&[*signature]).await?;
            if let Some(status) = statuses.value.into_iter().flatten().next() {
                if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                    return Ok(status.err);
                }
            }
            if !self
                .rpc
                .is_blockhash_valid(blockhash, CommitmentConfig::processed())
                .await?
            {
                return Err(UnlockError::BlockhashExpired {
                    signature: signature.to_string(),
                });
            }
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }
}

/// Signs, submits and confirms every packed transaction, fully in
/// parallel; the transactions touch disjoint assets and never depend on
/// one another's outcome.
pub struct SubmissionCoordinator<'a, C: SubmitClient> {
    client: &'a C,
    keypair: &'a Keypair,
}

impl<'a, C: SubmitClient> SubmissionCoordinator<'a, C> {
    pub fn new(client: &'a C, keypair: &'a Keypair) -> Self {
        Self { client, keypair }
    }

    /// Submit everything and fold the outcomes into a [`RunReport`].
    ///
    /// The blockhash is fetched once and shared read-only across all
    /// submissions. Per-transaction errors of any kind are logged, counted
    /// as failures, and never abort the run.
    pub async fn submit_all(
        &self,
        packed: Vec<PackedTransaction>,
    ) -> Result<RunReport, UnlockError> {
        let blockhash = self.client.latest_blockhash().await?;

        let outcomes = join_all(
            packed
                .into_iter()
                .map(|transaction| self.submit_one(transaction, blockhash)),
        )
        .await;

        let mut report = RunReport::default();
        for (instructions, succeeded) in outcomes {
            report.processed += instructions;
            if succeeded {
                report.successes += instructions;
            } else {
                report.failures += instructions;
            }
        }
        Ok(report)
    }

    /// Transactions are atomic: all of a transaction's instructions land
    /// on the same side of the ledger, never split.
    async fn submit_one(&self, packed: PackedTransaction, blockhash: Hash) -> (usize, bool) {
        let instructions = packed.instructions.len();
        match self.try_submit(packed, blockhash).await {
            Ok(None) => (instructions, true),
            Ok(Some(err)) => {
                warn!("transaction failed on chain: {err}");
                (instructions, false)
            }
            Err(err) => {
                warn!("transaction submission failed: {err}");
                (instructions, false)
            }
        }
    }

    async fn try_submit(
        &self,
        packed: PackedTransaction,
        blockhash: Hash,
    ) -> Result<Option<TransactionError>, UnlockError> {
        // Message construction panics on an unindexable account table, so
        // refuse it here and let the caller count the failure.
        let accounts = transaction_account_count(&packed.instructions, &self.keypair.pubkey());
        if accounts > TRANSACTION_ACCOUNT_LIMIT {
            return Err(UnlockError::TooManyAccounts(accounts));
        }
        let transaction = Transaction::new_signed_with_payer(
            &packed.instructions,
            Some(&self.keypair.pubkey()),
            &[self.keypair],
            blockhash,
        );
        let signature = self.client.send(&transaction).await?;
        self.client.confirm(&signature, &blockhash).await
    }
}
