//! Chain client: polls bridge-contract deposit logs, and builds, signs and
//! submits Canton-originated withdrawals back onto the EVM side.

use std::str::FromStr;
use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::{keccak256, Address, FixedBytes, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signer, SignerSync};
use alloy::sol;
use alloy::transports::http::{Client, Http};
use eyre::{eyre, Result, WrapErr};
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::config::EthereumConfig;
use crate::types::{EvmAddress, Fingerprint};

sol! {
    #[sol(rpc)]
    interface CustodialBridge {
        event Deposit(address indexed depositor, address indexed token, uint256 amount, uint256 nonce);

        function WithdrawFromCanton(address token, uint256 amount, address recipient, bytes32 withdrawalId, bytes calldata proof) external;
        function isWithdrawalProcessed(bytes32 withdrawalId) external view returns (bool);
        function processedWithdrawals(bytes32 withdrawalId) external view returns (bool);
    }
}

const ETH_SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// A single bridge-contract deposit, bound for the ledger side via the
/// relayer engine's `EthereumSource`.
#[derive(Debug, Clone)]
pub struct DepositEvent {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub token: EvmAddress,
    pub depositor: EvmAddress,
    pub fingerprint: Fingerprint,
    pub amount_wei: U256,
    pub nonce: u64,
}

fn deposit_event_signature() -> FixedBytes<32> {
    keccak256(b"Deposit(address,address,uint256,uint256)")
}

fn parse_deposit_log(log: &Log, chain_id: u64) -> Result<DepositEvent> {
    let topics = log.topics();
    if topics.len() < 3 {
        return Err(eyre!("deposit log missing indexed topics"));
    }
    let depositor = EvmAddress::from_bytes32(&topics[1].0);
    let token = EvmAddress::from_bytes32(&topics[2].0);

    let data = log.data().data.as_ref();
    if data.len() < 64 {
        return Err(eyre!("deposit log data too short"));
    }
    let amount_wei = U256::from_be_slice(&data[0..32]);
    let nonce = U256::from_be_slice(&data[32..64]);

    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| eyre!("deposit log missing transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or_else(|| eyre!("deposit log missing block number"))?;
    let log_index = log
        .log_index
        .ok_or_else(|| eyre!("deposit log missing log index"))?;

    let fingerprint = Fingerprint::from_evm_address(&depositor);
    let _ = chain_id;

    Ok(DepositEvent {
        tx_hash: format!("{tx_hash:?}"),
        log_index,
        block_number,
        token,
        depositor,
        fingerprint,
        amount_wei,
        nonce: nonce.try_into().unwrap_or(u64::MAX),
    })
}

/// EVM-side half of the bridge: deposit scanning plus withdrawal proof
/// construction, signing and submission. Cheap to clone — the scan cursor
/// is shared via `Arc`, so a cloned handle used as a `Destination` observes
/// the same cursor as the one driving the `Source` poll loop.
#[derive(Clone)]
pub struct ChainClient {
    provider: RootProvider<Http<Client>>,
    signer: PrivateKeySigner,
    bridge_address: Address,
    rpc_url: String,
    chain_id: u64,
    finality_blocks: u64,
    gas_limit: u64,
    max_gas_price: u128,
    last_scanned: Arc<RwLock<u64>>,
}

impl ChainClient {
    pub fn new(config: &EthereumConfig) -> Result<Self> {
        let url = config
            .rpc_url
            .parse()
            .wrap_err("invalid ethereum.rpc_url")?;
        let provider = ProviderBuilder::new().on_http(url);

        let signer: PrivateKeySigner = config
            .relayer_private_key
            .parse()
            .wrap_err("invalid ethereum.relayer_private_key")?;

        let bridge_address =
            Address::from_str(&config.bridge_contract).wrap_err("invalid ethereum.bridge_contract")?;

        Ok(Self {
            provider,
            signer,
            bridge_address,
            rpc_url: config.rpc_url.clone(),
            chain_id: config.chain_id,
            finality_blocks: config.finality_blocks,
            gas_limit: config.gas_limit,
            max_gas_price: config.max_gas_price,
            last_scanned: Arc::new(RwLock::new(config.start_block.unwrap_or(0))),
        })
    }

    pub fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    /// Monotonic snapshot of the scan cursor, safe to read from another task.
    pub async fn last_scanned_block(&self) -> u64 {
        *self.last_scanned.read().await
    }

    async fn advance_scanned(&self, block: u64) {
        let mut guard = self.last_scanned.write().await;
        if block > *guard {
            *guard = block;
        }
    }

    /// Overrides the scan cursor, for the engine's startup offset policy.
    pub async fn set_scan_cursor(&self, block: u64) {
        let mut guard = self.last_scanned.write().await;
        *guard = block;
    }

    /// The chain's raw current head, unadjusted for finality — distinct
    /// from `finalized_head`, which the poll loop uses to only scan blocks
    /// unlikely to reorg.
    pub async fn head_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("failed to get block number")
    }

    async fn finalized_head(&self) -> Result<u64> {
        let head = self
            .provider
            .get_block_number()
            .await
            .wrap_err("failed to get block number")?;
        Ok(head.saturating_sub(self.finality_blocks))
    }

    /// One polling tick: scan `(scanned, head]`, hand each deposit to
    /// `handler` in chain order, then advance the cursor. A handler error is
    /// logged and does not abort the tick or block the cursor from advancing.
    pub async fn poll_once<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(DepositEvent) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let scanned = self.last_scanned_block().await;
        let head = self.finalized_head().await?;
        if head <= scanned {
            self.advance_scanned(head).await;
            return Ok(());
        }

        let events = self.scan_deposits(scanned + 1, head).await?;
        for event in events {
            if let Err(e) = handler(event.clone()).await {
                error!(tx_hash = %event.tx_hash, log_index = event.log_index, error = %e, "deposit handler failed");
            }
        }
        self.advance_scanned(head).await;
        Ok(())
    }

    async fn scan_deposits(&self, from_block: u64, to_block: u64) -> Result<Vec<DepositEvent>> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err("failed to get logs")?;

        let signature = deposit_event_signature();
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            let topics = log.topics();
            if topics.is_empty() || topics[0] != signature {
                continue;
            }
            match parse_deposit_log(log, self.chain_id) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "skipping unparseable deposit log"),
            }
        }
        Ok(events)
    }

    /// Builds the withdrawal proof preimage, signs it, and submits
    /// `WithdrawFromCanton`. Returns the transaction hash on success.
    pub async fn submit_withdrawal(
        &self,
        token: &EvmAddress,
        recipient: &EvmAddress,
        amount_wei: U256,
        withdrawal_id: [u8; 32],
    ) -> Result<String> {
        let proof = self.sign_withdrawal_proof(token, recipient, amount_wei, &withdrawal_id)?;

        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("invalid ethereum.rpc_url")?);

        let contract = CustodialBridge::new(self.bridge_address, provider);
        let token_addr = Address::from_slice(&token.0);
        let recipient_addr = Address::from_slice(&recipient.0);

        let (priority_fee, max_fee) = self.gas_fees().await?;

        let pending = contract
            .WithdrawFromCanton(
                token_addr,
                amount_wei,
                recipient_addr,
                FixedBytes::from(withdrawal_id),
                proof.into(),
            )
            .gas(self.gas_limit)
            .max_priority_fee_per_gas(priority_fee)
            .max_fee_per_gas(max_fee)
            .send()
            .await
            .map_err(|e| eyre!("failed to submit withdrawal: {e}"))?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| eyre!("failed to get withdrawal receipt: {e}"))?;

        if !receipt.status() {
            return Err(eyre!("withdrawal transaction reverted"));
        }

        Ok(format!("{:?}", receipt.transaction_hash))
    }

    /// Computes the withdrawal proof's signed hash and relayer signature.
    fn sign_withdrawal_proof(
        &self,
        token: &EvmAddress,
        recipient: &EvmAddress,
        amount_wei: U256,
        withdrawal_id: &[u8; 32],
    ) -> Result<Vec<u8>> {
        let mut preimage = Vec::with_capacity(20 + 32 + 20 + 32 + 32 + 20);
        preimage.extend_from_slice(&token.0);
        preimage.extend_from_slice(&amount_wei.to_be_bytes::<32>());
        preimage.extend_from_slice(&recipient.0);
        preimage.extend_from_slice(withdrawal_id);
        preimage.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        preimage.extend_from_slice(self.bridge_address.as_slice());

        let message_hash = keccak256(&preimage);

        let mut prefixed = Vec::with_capacity(ETH_SIGNED_MESSAGE_PREFIX.len() + 32);
        prefixed.extend_from_slice(ETH_SIGNED_MESSAGE_PREFIX);
        prefixed.extend_from_slice(message_hash.as_slice());
        let signed_hash = keccak256(&prefixed);

        let signature = self
            .signer
            .sign_hash_sync(&signed_hash)
            .map_err(|e| eyre!("failed to sign withdrawal proof: {e}"))?;

        let mut bytes = signature.as_bytes().to_vec();
        // alloy's `as_bytes` already yields the 27/28 recovery byte; this
        // defensive bump only fires if a future signer starts yielding 0/1.
        if let Some(v) = bytes.last_mut() {
            if *v < 27 {
                *v += 27;
            }
        }
        Ok(bytes)
    }

    /// Caps `maxPriorityFeePerGas`/`maxFeePerGas` against the configured
    /// ceiling, mirroring the teacher's EIP-1559 fee policy.
    async fn gas_fees(&self) -> Result<(u128, u128)> {
        const MIN_PRIORITY_FEE_WEI: u128 = 2_000_000_000; // 2 gwei

        let suggested_tip = self
            .provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(MIN_PRIORITY_FEE_WEI);
        let priority_fee = suggested_tip.max(MIN_PRIORITY_FEE_WEI);

        let base_fee = self
            .provider
            .get_gas_price()
            .await
            .wrap_err("failed to get gas price")?;

        let max_fee = (base_fee.saturating_mul(2) + priority_fee).min(self.max_gas_price);
        Ok((priority_fee, max_fee))
    }

    /// `IsWithdrawalProcessed`: queries the current contract function first,
    /// falling back to the legacy mapping accessor on any error.
    pub async fn is_withdrawal_processed(&self, withdrawal_id: [u8; 32]) -> Result<bool> {
        let contract = CustodialBridge::new(self.bridge_address, self.provider.clone());
        match contract
            .isWithdrawalProcessed(FixedBytes::from(withdrawal_id))
            .call()
            .await
        {
            Ok(result) => Ok(result._0),
            Err(e) => {
                warn!(error = %e, "isWithdrawalProcessed call failed, falling back to legacy mapping");
                let result = contract
                    .processedWithdrawals(FixedBytes::from(withdrawal_id))
                    .call()
                    .await
                    .wrap_err("legacy processedWithdrawals fallback failed")?;
                Ok(result._0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_event_signature_is_stable() {
        let sig = deposit_event_signature();
        assert_eq!(sig.len(), 32);
        assert_eq!(sig, deposit_event_signature());
    }

    #[test]
    fn test_withdrawal_preimage_length() {
        // token(20) + amount(32) + recipient(20) + withdrawalId(32) + chainId(32) + bridge(20)
        let expected_len = 20 + 32 + 20 + 32 + 32 + 20;
        assert_eq!(expected_len, 156);
    }
}
