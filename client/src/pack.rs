use std::collections::HashSet;
use std::str::FromStr;

use mpl_token_metadata::accounts::{MasterEdition, Metadata, TokenRecord};
use mpl_token_metadata::instructions::{UnlockV1, UnlockV1InstructionArgs};
use mpl_token_metadata::types::TokenStandard;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use tracing::warn;

use crate::error::UnlockError;
use crate::registry::AssetRecord;

/// Network-imposed bound on the wire size of one transaction.
pub const TRANSACTION_SIZE_LIMIT: usize = PACKET_DATA_SIZE;

/// A legacy message indexes accounts with a `u8`, so a transaction can
/// reference at most this many distinct account keys.
pub const TRANSACTION_ACCOUNT_LIMIT: usize = 256;

const SPL_TOKEN_ID: Pubkey = Pubkey::from_str_const("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");
const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::from_str_const("11111111111111111111111111111111");
const SYSVAR_INSTRUCTIONS_ID: Pubkey =
    Pubkey::from_str_const("Sysvar1nstructions1111111111111111111111111");

/// A size-bounded bundle of unlock instructions, submitted atomically,
/// plus the asset ids it covers (one per instruction, same order).
#[derive(Debug, Default, Clone)]
pub struct PackedTransaction {
    pub instructions: Vec<Instruction>,
    pub asset_ids: Vec<String>,
}

/// Transaction wire-size oracle. Injected so the packer never hardcodes an
/// instruction-count heuristic; instruction size varies with token standard
/// and derived accounts.
pub trait TxSizeEstimator {
    fn estimate(&self, instructions: &[Instruction], payer: &Pubkey) -> Result<usize, UnlockError>;
}

/// Measures the bincode wire size of the unsigned transaction, signature
/// placeholders included, which is exactly what the network counts against
/// [`TRANSACTION_SIZE_LIMIT`].
pub struct WireSizeEstimator;

impl TxSizeEstimator for WireSizeEstimator {
    fn estimate(&self, instructions: &[Instruction], payer: &Pubkey) -> Result<usize, UnlockError> {
        let message = Message::new(instructions, Some(payer));
        let transaction = Transaction::new_unsigned(message);
        Ok(bincode::serialized_size(&transaction)? as usize)
    }
}

/// Number of distinct account keys the signed transaction would carry:
/// the payer plus every program id and account meta across `instructions`.
pub fn transaction_account_count(instructions: &[Instruction], payer: &Pubkey) -> usize {
    let mut keys: HashSet<Pubkey> = HashSet::new();
    keys.insert(*payer);
    for instruction in instructions {
        keys.insert(instruction.program_id);
        keys.extend(instruction.accounts.iter().map(|meta| meta.pubkey));
    }
    keys.len()
}

/// Canonical associated-token-account derivation from (mint, owner).
pub fn associated_token_address(mint: &Pubkey, owner: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), SPL_TOKEN_ID.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    )
    .0
}

/// Build the unlock instruction for one asset.
///
/// `authority` signs and pays; the token account is derived from
/// (mint, owner). Assets the registry did not classify default to
/// `NonFungible`. Errors here mean the record cannot be turned into a
/// valid instruction at all and cost only this asset.
pub fn build_unlock_instruction(
    record: &AssetRecord,
    authority: &Pubkey,
) -> Result<Instruction, UnlockError> {
    let mint = parse_address(&record.id, &record.id, "mint")?;
    let owner = parse_address(&record.id, &record.owner, "owner")?;
    let token = associated_token_address(&mint, &owner);

    let standard = record
        .token_standard
        .clone()
        .unwrap_or(TokenStandard::NonFungible);

    let edition = match standard {
        TokenStandard::NonFungible
        | TokenStandard::NonFungibleEdition
        | TokenStandard::ProgrammableNonFungible => Some(MasterEdition::find_pda(&mint).0),
        _ => None,
    };
    let token_record = matches!(standard, TokenStandard::ProgrammableNonFungible)
        .then(|| TokenRecord::find_pda(&mint, &token).0);

    Ok(UnlockV1 {
        authority: *authority,
        token_owner: Some(owner),
        token,
        mint,
        metadata: Metadata::find_pda(&mint).0,
        edition,
        token_record,
        payer: *authority,
        system_program: SYSTEM_PROGRAM_ID,
        sysvar_instructions: SYSVAR_INSTRUCTIONS_ID,
        spl_token_program: Some(SPL_TOKEN_ID),
        authorization_rules_program: None,
        authorization_rules: None,
    }
    .instruction(UnlockV1InstructionArgs {
        authorization_data: None,
    }))
}

fn parse_address(asset: &str, value: &str, field: &'static str) -> Result<Pubkey, UnlockError> {
    Pubkey::from_str(value).map_err(|err| UnlockError::InvalidAddress {
        asset: asset.to_string(),
        field,
        reason: err.to_string(),
    })
}

/// Greedy, order-preserving packing of unlock instructions into the fewest
/// transactions that each fit the size limit.
pub struct Packer<'a, E: TxSizeEstimator> {
    estimator: &'a E,
    size_limit: usize,
}

impl<'a, E: TxSizeEstimator> Packer<'a, E> {
    pub fn new(estimator: &'a E, size_limit: usize) -> Self {
        Self {
            estimator,
            size_limit,
        }
    }

    /// Pack `records` in order. Returns the sealed transactions and the
    /// number of assets dropped because no instruction could be built for
    /// them. An instruction that alone exceeds the size limit is an error,
    /// never silently dropped or silently oversized.
    pub fn pack(
        &self,
        records: &[AssetRecord],
        authority: &Pubkey,
    ) -> Result<(Vec<PackedTransaction>, usize), UnlockError> {
        let mut packed = Vec::new();
        let mut current = PackedTransaction::default();
        let mut dropped = 0usize;

        for record in records {
            let instruction = match build_unlock_instruction(record, authority) {
                Ok(ix) => ix,
                Err(err) => {
                    warn!("dropping asset from run: {err}");
                    dropped += 1;
                    continue;
                }
            };

            // Tentatively add, then re-measure; instruction size is not
            // knowable without re-measuring the whole message.
            current.instructions.push(instruction);
            current.asset_ids.push(record.id.clone());

            if self.overflows(&current, authority)? {
                let instruction = current.instructions.pop().unwrap();
                let id = current.asset_ids.pop().unwrap();
                if current.instructions.is_empty() {
                    return Err(UnlockError::OversizedInstruction(id));
                }
                packed.push(std::mem::take(&mut current));
                current.instructions.push(instruction);
                current.asset_ids.push(id);
                if self.overflows(&current, authority)? {
                    return Err(UnlockError::OversizedInstruction(
                        current.asset_ids[0].clone(),
                    ));
                }
            }
        }

        if !current.instructions.is_empty() {
            packed.push(current);
        }
        Ok((packed, dropped))
    }

    /// True when `current` can no longer be signed and sent as one
    /// transaction: the account table also bounds packing, whatever the
    /// injected estimator believes about wire size.
    fn overflows(
        &self,
        current: &PackedTransaction,
        authority: &Pubkey,
    ) -> Result<bool, UnlockError> {
        if transaction_account_count(&current.instructions, authority) > TRANSACTION_ACCOUNT_LIMIT {
            return Ok(true);
        }
        Ok(self.estimator.estimate(&current.instructions, authority)? > self.size_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Pubkey, owner: Pubkey, standard: Option<TokenStandard>) -> AssetRecord {
        AssetRecord {
            id: id.to_string(),
            owner: owner.to_string(),
            token_standard: standard,
        }
    }

    fn records(count: usize) -> Vec<AssetRecord> {
        (0..count)
            .map(|_| record(Pubkey::new_unique(), Pubkey::new_unique(), None))
            .collect()
    }

    /// Pretends every instruction costs the same fixed number of bytes.
    struct FixedEstimator {
        base: usize,
        per_instruction: usize,
    }

    impl TxSizeEstimator for FixedEstimator {
        fn estimate(
            &self,
            instructions: &[Instruction],
            _payer: &Pubkey,
        ) -> Result<usize, UnlockError> {
            Ok(self.base + self.per_instruction * instructions.len())
        }
    }

    #[test]
    fn unlock_instruction_targets_the_token_metadata_program() {
        let authority = Pubkey::new_unique();
        let asset = record(Pubkey::new_unique(), Pubkey::new_unique(), None);

        let ix = build_unlock_instruction(&asset, &authority).unwrap();
        assert_eq!(ix.program_id, mpl_token_metadata::ID);
        assert_eq!(ix.accounts[0].pubkey, authority);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(
            ix.accounts[8].pubkey,
            Pubkey::from_str("11111111111111111111111111111111").unwrap()
        );
        assert_eq!(
            ix.accounts[9].pubkey,
            Pubkey::from_str("Sysvar1nstructions1111111111111111111111111").unwrap()
        );
    }

    #[test]
    fn unlock_args_carry_no_authorization_payload() {
        let authority = Pubkey::new_unique();
        let asset = record(Pubkey::new_unique(), Pubkey::new_unique(), None);

        let ix = build_unlock_instruction(&asset, &authority).unwrap();
        // One discriminator byte, one byte for the absent authorization data.
        assert_eq!(ix.data.len(), 2);
        assert_eq!(ix.data[1], 0);
    }

    #[test]
    fn token_record_is_only_derived_for_programmable_nfts() {
        let authority = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let owner = Pubkey::new_unique();

        let plain = build_unlock_instruction(&record(mint, owner, None), &authority).unwrap();
        let programmable = build_unlock_instruction(
            &record(mint, owner, Some(TokenStandard::ProgrammableNonFungible)),
            &authority,
        )
        .unwrap();

        // Optional accounts fall back to the program id when absent.
        assert_eq!(plain.accounts[6].pubkey, mpl_token_metadata::ID);
        assert_ne!(programmable.accounts[6].pubkey, mpl_token_metadata::ID);
    }

    #[test]
    fn fungible_assets_omit_the_edition_account() {
        let authority = Pubkey::new_unique();
        let asset = record(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Some(TokenStandard::Fungible),
        );
        let ix = build_unlock_instruction(&asset, &authority).unwrap();
        assert_eq!(ix.accounts[5].pubkey, mpl_token_metadata::ID);
    }

    #[test]
    fn packing_preserves_input_order() {
        let estimator = FixedEstimator {
            base: 100,
            per_instruction: 200,
        };
        // Fits two instructions per transaction.
        let packer = Packer::new(&estimator, 500);
        let assets = records(5);
        let authority = Pubkey::new_unique();

        let (packed, dropped) = packer.pack(&assets, &authority).unwrap();

        assert_eq!(dropped, 0);
        assert_eq!(packed.len(), 3);
        assert_eq!(packed[0].instructions.len(), 2);
        assert_eq!(packed[1].instructions.len(), 2);
        assert_eq!(packed[2].instructions.len(), 1);

        let flattened: Vec<&str> = packed
            .iter()
            .flat_map(|tx| tx.asset_ids.iter().map(String::as_str))
            .collect();
        let expected: Vec<&str> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn account_table_bounds_packing_when_the_estimator_does_not() {
        // An estimator that would happily pack everything into one
        // transaction; the account table has to stop it.
        let estimator = FixedEstimator {
            base: 0,
            per_instruction: 1,
        };
        let packer = Packer::new(&estimator, usize::MAX);
        let assets = records(60);
        let authority = Pubkey::new_unique();

        let (packed, dropped) = packer.pack(&assets, &authority).unwrap();

        assert_eq!(dropped, 0);
        assert!(packed.len() > 1);
        let total: usize = packed.iter().map(|tx| tx.instructions.len()).sum();
        assert_eq!(total, 60);
        for tx in &packed {
            assert!(
                transaction_account_count(&tx.instructions, &authority)
                    <= TRANSACTION_ACCOUNT_LIMIT
            );
        }
    }

    #[test]
    fn single_oversized_instruction_is_an_explicit_error() {
        let estimator = FixedEstimator {
            base: 0,
            per_instruction: 2000,
        };
        let packer = Packer::new(&estimator, 500);
        let assets = records(1);
        let authority = Pubkey::new_unique();

        match packer.pack(&assets, &authority) {
            Err(UnlockError::OversizedInstruction(id)) => assert_eq!(id, assets[0].id),
            other => panic!("expected oversized error, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_owner_drops_only_that_asset() {
        let estimator = FixedEstimator {
            base: 0,
            per_instruction: 1,
        };
        let packer = Packer::new(&estimator, 500);
        let authority = Pubkey::new_unique();

        let mut assets = records(3);
        assets[1].owner = "not-a-pubkey".to_string();

        let (packed, dropped) = packer.pack(&assets, &authority).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(packed.len(), 1);
        assert_eq!(
            packed[0].asset_ids,
            vec![assets[0].id.clone(), assets[2].id.clone()]
        );
    }

    #[test]
    fn wire_size_estimator_respects_the_packet_limit() {
        let authority = Pubkey::new_unique();
        let assets = records(40);
        let packer = Packer::new(&WireSizeEstimator, TRANSACTION_SIZE_LIMIT);

        let (packed, dropped) = packer.pack(&assets, &authority).unwrap();
        assert_eq!(dropped, 0);
        assert!(packed.len() > 1);

        for tx in &packed {
            let size = WireSizeEstimator
                .estimate(&tx.instructions, &authority)
                .unwrap();
            assert!(size <= TRANSACTION_SIZE_LIMIT, "{size} > limit");
        }
        let total: usize = packed.iter().map(|tx| tx.instructions.len()).sum();
        assert_eq!(total, 40);
    }
}
