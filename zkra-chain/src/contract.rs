//! Ethers-backed rollup processor client.
//!
//! The `processRollup` ABI is a schema the aggregator owns: calldata is
//! encoded here and decoded back into [`Block`]s when confirmed
//! transactions are replayed from the `RollupProcessed` log.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use tracing::{debug, info};

use zkra_common::{Block, RollupProofData};

use crate::signature::{marshal_signatures, COMPACT_SIG_SIZE};
use crate::{Blockchain, ChainError, ChainStatus, EscapeStatus};

const PROCESS_ROLLUP_SIG: &str = "processRollup(bytes,bytes,uint256[],bytes)";
const ROLLUP_PROCESSED_SIG: &str = "RollupProcessed(uint256,bytes32,bytes32)";

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Rollup processor client over an EVM JSON-RPC endpoint.
pub struct EthereumBlockchain {
    client: Arc<Client>,
    rollup_processor: Address,
    assets: tokio::sync::Mutex<Option<Vec<Address>>>,
}

impl EthereumBlockchain {
    /// Connect to an RPC endpoint and bind to the rollup processor.
    ///
    /// Without a private key a throwaway wallet is generated; view calls
    /// still work, submission will be rejected by the chain.
    pub async fn connect(
        rpc_url: &str,
        rollup_processor: Address,
        private_key: Option<String>,
    ) -> Result<Self, ChainError> {
        let provider =
            Provider::<Http>::try_from(rpc_url).context("failed to create http provider")?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .as_u64();

        let wallet = match private_key {
            Some(key) => key
                .parse::<LocalWallet>()
                .context("invalid private key")?,
            None => LocalWallet::new(&mut rand::thread_rng()),
        };
        let wallet = wallet.with_chain_id(chain_id);
        let client = SignerMiddleware::new(provider, wallet);

        info!(chain_id, processor = %rollup_processor, "connected to rollup processor");
        Ok(Self {
            client: Arc::new(client),
            rollup_processor,
            assets: tokio::sync::Mutex::new(None),
        })
    }

    async fn call_view(&self, to: Address, signature: &str, args: &[Token]) -> Result<Bytes, ChainError> {
        let mut data = selector(signature).to_vec();
        data.extend_from_slice(&abi::encode(args));
        let tx: TypedTransaction = TransactionRequest::new()
            .to(to)
            .data(Bytes::from(data))
            .into();
        self.client
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn view_u256(&self, signature: &str) -> Result<U256, ChainError> {
        let out = self.call_view(self.rollup_processor, signature, &[]).await?;
        decode_single(&out, ParamType::Uint(256))?
            .into_uint()
            .ok_or_else(|| ChainError::Abi(format!("{signature}: expected uint")))
    }

    async fn view_bytes32(&self, signature: &str) -> Result<[u8; 32], ChainError> {
        let out = self.call_view(self.rollup_processor, signature, &[]).await?;
        let bytes = decode_single(&out, ParamType::FixedBytes(32))?
            .into_fixed_bytes()
            .ok_or_else(|| ChainError::Abi(format!("{signature}: expected bytes32")))?;
        bytes
            .try_into()
            .map_err(|_| ChainError::Abi(format!("{signature}: bad bytes32 length")))
    }

    async fn supported_assets(&self) -> Result<Vec<Address>, ChainError> {
        let mut cache = self.assets.lock().await;
        if let Some(assets) = cache.as_ref() {
            return Ok(assets.clone());
        }
        let out = self
            .call_view(self.rollup_processor, "getSupportedAssets()", &[])
            .await?;
        let tokens = abi::decode(&[ParamType::Array(Box::new(ParamType::Address))], &out)
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let assets: Vec<Address> = tokens
            .into_iter()
            .next()
            .and_then(Token::into_array)
            .unwrap_or_default()
            .into_iter()
            .filter_map(Token::into_address)
            .collect();
        *cache = Some(assets.clone());
        Ok(assets)
    }

    async fn asset_address(&self, asset_id: u32) -> Result<Address, ChainError> {
        if asset_id == 0 {
            return Err(ChainError::Abi("native asset has no contract".into()));
        }
        let assets = self.supported_assets().await?;
        assets
            .get(asset_id as usize - 1)
            .copied()
            .ok_or_else(|| ChainError::Abi(format!("unsupported asset id {asset_id}")))
    }

    async fn block_timestamp(&self, block_num: u64) -> Result<u64, ChainError> {
        let block = self
            .client
            .get_block(block_num)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(block.map(|b| b.timestamp.as_u64()).unwrap_or(0))
    }
}

#[async_trait]
impl Blockchain for EthereumBlockchain {
    async fn status(&self) -> Result<ChainStatus, ChainError> {
        Ok(ChainStatus {
            next_rollup_id: self.view_u256("nextRollupId()").await?.as_u64(),
            data_size: self.view_u256("dataSize()").await?.as_u64(),
            data_root: self.view_bytes32("dataRoot()").await?,
            null_root: self.view_bytes32("nullRoot()").await?,
            root_root: self.view_bytes32("rootRoot()").await?,
        })
    }

    async fn escape_status(&self) -> Result<EscapeStatus, ChainError> {
        let out = self
            .call_view(self.rollup_processor, "getEscapeHatchStatus()", &[])
            .await?;
        let tokens = abi::decode(&[ParamType::Bool, ParamType::Uint(256)], &out)
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let open = tokens
            .first()
            .and_then(|t| t.clone().into_bool())
            .ok_or_else(|| ChainError::Abi("escape status: expected bool".into()))?;
        let remaining = tokens
            .get(1)
            .and_then(|t| t.clone().into_uint())
            .ok_or_else(|| ChainError::Abi("escape status: expected uint".into()))?;
        Ok(EscapeStatus {
            open,
            blocks_remaining: remaining.low_u32(),
        })
    }

    async fn submit_rollup(
        &self,
        proof_data: &[u8],
        signatures: &[[u8; COMPACT_SIG_SIZE]],
        sig_indexes: &[u32],
        viewing_keys: &[Vec<u8>],
        gas_limit: Option<u64>,
    ) -> Result<H256, ChainError> {
        let calldata = encode_process_rollup_calldata(
            proof_data,
            signatures,
            sig_indexes,
            viewing_keys,
        );

        let mut tx = TransactionRequest::new()
            .to(self.rollup_processor)
            .data(Bytes::from(calldata));
        if let Some(gas) = gas_limit {
            tx = tx.gas(gas);
        }

        debug!(bytes = proof_data.len(), "submitting rollup proof");
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Submit(e.to_string()))?;
        let tx_hash = pending.tx_hash();

        let receipt = pending
            .await
            .map_err(|e| ChainError::Submit(e.to_string()))?
            .ok_or_else(|| ChainError::Submit(format!("transaction {tx_hash:?} dropped")))?;
        info!(tx_hash = ?receipt.transaction_hash, "rollup submitted");
        Ok(receipt.transaction_hash)
    }

    async fn blocks_from(
        &self,
        rollup_id: u64,
        min_confirmations: u64,
    ) -> Result<Vec<Block>, ChainError> {
        let topic0 = H256::from(keccak256(ROLLUP_PROCESSED_SIG.as_bytes()));
        let latest = self
            .client
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .as_u64();
        let Some(confirmed_to) = latest.checked_sub(min_confirmations.saturating_sub(1)) else {
            return Ok(vec![]);
        };

        // Locate the block containing the tagged event, then take every
        // later rollup-processed event up to the confirmation horizon.
        let tagged = Filter::new()
            .address(self.rollup_processor)
            .topic0(topic0)
            .topic1(H256::from_low_u64_be(rollup_id))
            .from_block(0u64)
            .to_block(confirmed_to);
        let logs = self
            .client
            .get_logs(&tagged)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        let Some(start_block) = logs.first().and_then(|l| l.block_number).map(|n| n.as_u64())
        else {
            return Ok(vec![]);
        };

        let filter = Filter::new()
            .address(self.rollup_processor)
            .topic0(topic0)
            .from_block(start_block)
            .to_block(confirmed_to);
        let logs = self
            .client
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let mut blocks = Vec::new();
        for log in logs {
            let event_id = log
                .topics
                .get(1)
                .map(|t| U256::from_big_endian(t.as_bytes()).as_u64());
            if event_id.map_or(true, |id| id < rollup_id) {
                continue;
            }
            let tx_hash = log
                .transaction_hash
                .ok_or_else(|| ChainError::Decode("log missing transaction hash".into()))?;
            let tx = self
                .client
                .get_transaction(tx_hash)
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))?
                .ok_or_else(|| ChainError::Decode(format!("transaction {tx_hash:?} missing")))?;
            let block_num = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
            let created = self.block_timestamp(block_num).await?;
            blocks.push(decode_process_rollup_calldata(
                &tx.input,
                block_num,
                created,
                tx_hash.0,
            )?);
        }
        blocks.sort_by_key(|b| b.rollup_id);
        Ok(blocks)
    }

    async fn asset_balance(&self, asset_id: u32, address: Address) -> Result<U256, ChainError> {
        if asset_id == 0 {
            return self
                .client
                .get_balance(address, None)
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()));
        }
        let erc20 = self.asset_address(asset_id).await?;
        let out = self
            .call_view(erc20, "balanceOf(address)", &[Token::Address(address)])
            .await?;
        decode_single(&out, ParamType::Uint(256))?
            .into_uint()
            .ok_or_else(|| ChainError::Abi("balanceOf: expected uint".into()))
    }

    async fn asset_allowance(&self, asset_id: u32, owner: Address) -> Result<U256, ChainError> {
        let erc20 = self.asset_address(asset_id).await?;
        let out = self
            .call_view(
                erc20,
                "allowance(address,address)",
                &[
                    Token::Address(owner),
                    Token::Address(self.rollup_processor),
                ],
            )
            .await?;
        decode_single(&out, ParamType::Uint(256))?
            .into_uint()
            .ok_or_else(|| ChainError::Abi("allowance: expected uint".into()))
    }
}

fn decode_single(data: &[u8], param: ParamType) -> Result<Token, ChainError> {
    abi::decode(&[param], data)
        .map_err(|e| ChainError::Abi(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| ChainError::Abi("empty return data".into()))
}

/// Build `processRollup` calldata from a rollup proof and its attachments.
pub fn encode_process_rollup_calldata(
    proof_data: &[u8],
    signatures: &[[u8; COMPACT_SIG_SIZE]],
    sig_indexes: &[u32],
    viewing_keys: &[Vec<u8>],
) -> Vec<u8> {
    let mut calldata = selector(PROCESS_ROLLUP_SIG).to_vec();
    calldata.extend_from_slice(&abi::encode(&[
        Token::Bytes(proof_data.to_vec()),
        Token::Bytes(marshal_signatures(signatures)),
        Token::Array(
            sig_indexes
                .iter()
                .map(|i| Token::Uint(U256::from(*i)))
                .collect(),
        ),
        Token::Bytes(viewing_keys.concat()),
    ]));
    calldata
}

/// Decode a `processRollup` transaction back into a confirmed [`Block`].
pub fn decode_process_rollup_calldata(
    calldata: &[u8],
    block_num: u64,
    created: u64,
    tx_hash: [u8; 32],
) -> Result<Block, ChainError> {
    if calldata.len() < 4 || calldata[..4] != selector(PROCESS_ROLLUP_SIG) {
        return Err(ChainError::Decode("not a processRollup transaction".into()));
    }
    let tokens = abi::decode(
        &[
            ParamType::Bytes,
            ParamType::Bytes,
            ParamType::Array(Box::new(ParamType::Uint(256))),
            ParamType::Bytes,
        ],
        &calldata[4..],
    )
    .map_err(|e| ChainError::Abi(e.to_string()))?;

    let mut tokens = tokens.into_iter();
    let proof_data = tokens
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| ChainError::Abi("processRollup: missing proof data".into()))?;
    let _signatures = tokens.next();
    let _sig_indexes = tokens.next();
    let viewing_keys = tokens
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| ChainError::Abi("processRollup: missing viewing keys".into()))?;

    let parsed = RollupProofData::parse(&proof_data)?;
    Ok(Block::from_rollup_proof(
        parsed,
        proof_data,
        viewing_keys,
        block_num,
        created,
        tx_hash,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkra_common::{HashPath, Rollup, PROOF_DATA_SIZE};

    fn sample_rollup() -> Rollup {
        let mut inner = vec![0u8; PROOF_DATA_SIZE];
        inner[4 * 32..6 * 32].fill(0x11);
        inner[6 * 32..8 * 32].fill(0x22);
        inner[9 * 32 - 1] = 3;
        inner[10 * 32 - 1] = 4;
        Rollup {
            rollup_id: 1,
            rollup_size: 2,
            data_start_index: 2,
            proofs: vec![inner],
            rollup_root: [0u8; 32],
            old_data_root: [1u8; 32],
            new_data_root: [2u8; 32],
            old_data_path: HashPath(vec![]),
            new_data_path: HashPath(vec![]),
            old_null_root: [3u8; 32],
            new_null_roots: vec![],
            old_null_paths: vec![],
            new_null_paths: vec![],
            old_root_root: [4u8; 32],
            old_root_paths: vec![],
        }
    }

    #[test]
    fn calldata_round_trip() {
        let rollup = sample_rollup();
        let proof = RollupProofData::encode(&rollup, [5u8; 32], [6u8; 32]);
        let mut sig = [0x77u8; 65];
        sig[64] = 0x1b;
        let calldata = encode_process_rollup_calldata(
            &proof,
            &[sig],
            &[0],
            &[vec![0xde, 0xad], vec![0xbe, 0xef]],
        );

        let block = decode_process_rollup_calldata(&calldata, 12, 1_700_000_000, [9u8; 32]).unwrap();
        assert_eq!(block.rollup_id, 1);
        assert_eq!(block.rollup_size, 2);
        assert_eq!(block.data_start_index, 2);
        assert_eq!(block.num_data_entries, 4);
        assert_eq!(block.data_entries.len(), 2);
        assert_eq!(block.nullifiers, vec![3, 4]);
        assert_eq!(block.viewing_keys_data, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(block.block_num, 12);
        assert_eq!(block.rollup_proof_data, proof);
    }

    #[test]
    fn decode_rejects_foreign_selector() {
        let calldata = vec![0u8; 100];
        assert!(decode_process_rollup_calldata(&calldata, 0, 0, [0u8; 32]).is_err());
    }
}
