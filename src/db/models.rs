#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{BridgeEventType, Direction, Symbol, TransferStatus};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub evm_address: String,
    pub ledger_party_id: String,
    pub owned_party_id: Option<String>,
    pub fingerprint: String,
    pub mapping_contract_id: Option<String>,
    #[serde(skip_serializing)]
    pub custodial_key_blob: Option<Vec<u8>>,
    pub prompt_balance: BigDecimal,
    pub demo_balance: BigDecimal,
    pub balance_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn balance(&self, symbol: Symbol) -> &BigDecimal {
        match symbol {
            Symbol::Prompt => &self.prompt_balance,
            Symbol::Demo => &self.demo_balance,
        }
    }
}

pub struct NewUser {
    pub evm_address: String,
    pub ledger_party_id: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Whitelist {
    pub evm_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transfer {
    pub id: String,
    pub direction: Direction,
    pub status: TransferStatus,
    pub src_chain_id: String,
    pub dest_chain_id: String,
    pub src_ref: String,
    pub token_address: String,
    pub amount: BigDecimal,
    pub sender: String,
    pub recipient: String,
    pub nonce: i64,
    pub src_block_or_offset: String,
    pub dest_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct NewTransfer {
    pub id: String,
    pub direction: Direction,
    pub src_chain_id: String,
    pub dest_chain_id: String,
    pub src_ref: String,
    pub token_address: String,
    pub amount: BigDecimal,
    pub sender: String,
    pub recipient: String,
    pub nonce: i64,
    pub src_block_or_offset: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChainState {
    pub chain_id: String,
    pub last_block_number: Option<i64>,
    pub last_offset: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BridgeEvent {
    pub id: i64,
    pub event_type: BridgeEventType,
    pub contract_id: String,
    pub user_fingerprint: String,
    pub amount: BigDecimal,
    pub symbol: Symbol,
    pub chain_tx_hash: Option<String>,
    pub dest_address: Option<String>,
    pub ledger_timestamp: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

pub struct NewBridgeEvent {
    pub event_type: BridgeEventType,
    pub contract_id: String,
    pub user_fingerprint: String,
    pub amount: BigDecimal,
    pub symbol: Symbol,
    pub chain_tx_hash: Option<String>,
    pub dest_address: Option<String>,
    pub ledger_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ReconciliationState {
    pub id: i16,
    pub last_offset: String,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub events_processed: i64,
    pub total_supply_prompt: BigDecimal,
    pub total_supply_demo: BigDecimal,
}

impl ReconciliationState {
    pub fn total_supply(&self, symbol: Symbol) -> &BigDecimal {
        match symbol {
            Symbol::Prompt => &self.total_supply_prompt,
            Symbol::Demo => &self.total_supply_demo,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EvmTransaction {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub nonce: i64,
    #[serde(skip_serializing)]
    pub input_data: Vec<u8>,
    pub value: BigDecimal,
    pub status: i16,
    pub block_number: i64,
    pub block_hash: String,
    pub tx_index: i32,
    pub gas_used: i64,
    pub created_at: DateTime<Utc>,
}

pub struct NewEvmTransaction {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub nonce: i64,
    pub input_data: Vec<u8>,
    pub block_number: i64,
    pub block_hash: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EvmLog {
    pub tx_hash: String,
    pub log_index: i32,
    pub address: String,
    pub topic0: Option<String>,
    pub topic1: Option<String>,
    pub topic2: Option<String>,
    pub topic3: Option<String>,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    pub block_number: i64,
    pub block_hash: String,
    pub tx_index: i32,
    pub removed: bool,
}

pub struct NewEvmLog {
    pub tx_hash: String,
    pub log_index: i32,
    pub address: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    pub block_number: i64,
    pub block_hash: String,
    pub tx_index: i32,
}
