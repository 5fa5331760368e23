//! `/eth`: the Ethereum-JSON-RPC-compatible facade. Lets a standard EVM
//! wallet believe it's talking to a real node serving one ERC-20 contract,
//! backed entirely by the balance cache and a synthetic block/tx/log store.

use std::str::FromStr;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, TxKind, U256};
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::db;
use crate::decimal::wei_to_decimal_string;
use crate::error::{BridgeError, BridgeResult};
use crate::types::{EvmAddress, Symbol, TRANSFER_EVENT_TOPIC};

use super::abi;
use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use super::AppState;

pub async fn handle(State(state): State<AppState>, Json(req): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    let id = req.id.clone();
    if !state.eth_rpc.enabled {
        let err = BridgeError::UnsupportedMethod(req.method.clone());
        return Json(JsonRpcResponse::err(id, &err));
    }
    let result = dispatch(&state, &req).await;
    Json(match result {
        Ok(value) => JsonRpcResponse::ok(id, value),
        Err(e) => JsonRpcResponse::err(id, &e),
    })
}

fn hex_u64(n: u64) -> String {
    format!("0x{n:x}")
}

fn hex_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn param_str(params: &Value, index: usize) -> BridgeResult<String> {
    params
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Validation(format!("missing string param at index {index}")))
}

fn param_address(params: &Value, index: usize) -> BridgeResult<Address> {
    let s = param_str(params, index)?;
    Address::from_str(&s).map_err(|e| BridgeError::Validation(format!("invalid address: {e}")))
}

async fn dispatch(state: &AppState, req: &JsonRpcRequest) -> BridgeResult<Value> {
    match req.method.as_str() {
        "eth_chainId" => Ok(json!(hex_u64(state.eth_rpc.chain_id))),
        "net_version" => Ok(json!(state.eth_rpc.chain_id.to_string())),
        "web3_clientVersion" => Ok(json!("wayfinder-bridge-relayer/1.0")),
        "web3_sha3" => {
            let input = param_str(&req.params, 0)?;
            let bytes = hex::decode(input.trim_start_matches("0x"))
                .map_err(|e| BridgeError::Validation(format!("invalid hex: {e}")))?;
            Ok(json!(hex_bytes(keccak256(bytes).as_slice())))
        }
        "net_listening" => Ok(json!(true)),
        "net_peerCount" => Ok(json!("0x0")),
        "eth_syncing" => Ok(json!(false)),
        "eth_blockNumber" => {
            let latest = db::get_latest_block_number(&state.db).await?;
            let reported = if state.eth_rpc.exact_head { latest } else { latest + 12 };
            Ok(json!(hex_u64(reported)))
        }
        "eth_gasPrice" => Ok(json!(format!("0x{:x}", state.eth_rpc.gas_price_wei))),
        "eth_maxPriorityFeePerGas" => Ok(json!("0x3b9aca00")),
        "eth_estimateGas" => Ok(json!(hex_u64(state.eth_rpc.gas_limit))),
        "eth_getBalance" => {
            let address = param_address(&req.params, 0)?;
            let evm = EvmAddress::from_hex(&address.to_string())
                .map_err(|e| BridgeError::Validation(e.to_string()))?;
            let user = db::get_user_by_evm_address(&state.db, &evm.as_hex()).await?;
            let balance = if user.is_some() { state.eth_rpc.native_balance_wei } else { 0 };
            Ok(json!(format!("0x{:x}", balance)))
        }
        "eth_getTransactionCount" => {
            let address = param_address(&req.params, 0)?;
            let count = db::get_evm_transaction_count(&state.db, &address.to_string()).await?;
            Ok(json!(hex_u64(count)))
        }
        "eth_getCode" => {
            let address = param_address(&req.params, 0)?;
            let addr_str = address.to_string().to_lowercase();
            let is_token = addr_str == state.eth_rpc.token_address.to_lowercase()
                || addr_str == state.eth_rpc.demo_token_address.to_lowercase();
            Ok(json!(if is_token { "0x6080" } else { "0x" }))
        }
        "eth_call" => eth_call(state, &req.params).await,
        "eth_sendRawTransaction" => eth_send_raw_transaction(state, &req.params).await,
        "eth_getTransactionReceipt" => eth_get_transaction_receipt(state, &req.params).await,
        "eth_getTransactionByHash" => eth_get_transaction_by_hash(state, &req.params).await,
        "eth_getBlockByNumber" => eth_get_block_by_number(state, &req.params).await,
        "eth_getLogs" => eth_get_logs(state, &req.params).await,
        other => Err(BridgeError::UnsupportedMethod(other.to_string())),
    }
}

fn token_symbol_for(state: &AppState, address: Address) -> Option<Symbol> {
    let addr_str = address.to_string().to_lowercase();
    if addr_str == state.eth_rpc.token_address.to_lowercase() {
        Some(Symbol::Prompt)
    } else if addr_str == state.eth_rpc.demo_token_address.to_lowercase() {
        Some(Symbol::Demo)
    } else {
        None
    }
}

async fn eth_call(state: &AppState, params: &Value) -> BridgeResult<Value> {
    let call = params
        .get(0)
        .ok_or_else(|| BridgeError::Validation("eth_call requires a transaction object".into()))?;
    let to = call
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::Validation("eth_call requires `to`".into()))?;
    let to = Address::from_str(to).map_err(|e| BridgeError::Validation(format!("invalid to: {e}")))?;
    let symbol = token_symbol_for(state, to)
        .ok_or_else(|| BridgeError::Validation("unknown token contract".into()))?;

    let data_hex = call.get("data").or_else(|| call.get("input")).and_then(Value::as_str).unwrap_or("0x");
    let data = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| BridgeError::Validation(format!("invalid call data: {e}")))?;
    if data.len() < 4 {
        return Err(BridgeError::Validation("eth_call data missing selector".into()));
    }
    let selector: [u8; 4] = data[0..4].try_into().unwrap();

    if selector == *abi::NAME_SELECTOR {
        let name = match symbol {
            Symbol::Prompt => state.token.name.clone(),
            Symbol::Demo => format!("Demo {}", state.token.name),
        };
        return Ok(json!(hex_bytes(&abi::encode_string(&name))));
    }
    if selector == *abi::SYMBOL_SELECTOR {
        let sym = match symbol {
            Symbol::Prompt => state.token.symbol.clone(),
            Symbol::Demo => Symbol::Demo.as_str().to_string(),
        };
        return Ok(json!(hex_bytes(&abi::encode_string(&sym))));
    }
    if selector == *abi::DECIMALS_SELECTOR {
        let word = abi::word_from_bytes(&[state.token.decimals]);
        return Ok(json!(hex_bytes(&word)));
    }
    if selector == *abi::TOTAL_SUPPLY_SELECTOR {
        let supply = state.token_service.get_total_supply(symbol).await?;
        let wei = crate::decimal::decimal_to_wei(&supply, state.token.decimals)?;
        return Ok(json!(hex_bytes(&abi::word_from_u256(wei))));
    }
    if selector == *abi::BALANCE_OF_SELECTOR {
        let owner = abi::read_address_arg(&data, 0)
            .ok_or_else(|| BridgeError::Validation("balanceOf missing address arg".into()))?;
        let owner = Address::from(owner);
        let balance = state.token_service.get_balance(&owner.to_string(), symbol).await?;
        let wei = crate::decimal::decimal_to_wei(&balance, state.token.decimals)?;
        return Ok(json!(hex_bytes(&abi::word_from_u256(wei))));
    }
    if selector == *abi::ALLOWANCE_SELECTOR {
        return Ok(json!(hex_bytes(&abi::word_from_u256(U256::ZERO))));
    }

    Err(BridgeError::UnsupportedMethod(format!(
        "unrecognized selector 0x{}",
        hex::encode(selector)
    )))
}

fn decode_envelope(raw: &[u8]) -> BridgeResult<TxEnvelope> {
    let mut slice = raw;
    TxEnvelope::decode_2718(&mut slice)
        .map_err(|e| BridgeError::Validation(format!("invalid raw transaction: {e}")))
}

fn recover_sender(envelope: &TxEnvelope) -> BridgeResult<Address> {
    let result = match envelope {
        TxEnvelope::Legacy(tx) => tx.recover_signer(),
        TxEnvelope::Eip2930(tx) => tx.recover_signer(),
        TxEnvelope::Eip1559(tx) => tx.recover_signer(),
        TxEnvelope::Eip4844(tx) => tx.recover_signer(),
        TxEnvelope::Eip7702(tx) => tx.recover_signer(),
    };
    result.map_err(|e| BridgeError::Validation(format!("could not recover sender: {e}")))
}

/// `(to, value, input, nonce)` for the transaction kinds a wallet sends for a
/// plain ERC-20 transfer. Blob and authorization-list transactions aren't
/// valid calls into an ERC-20 contract and are rejected before reaching here.
fn basic_fields(envelope: &TxEnvelope) -> BridgeResult<(TxKind, U256, Vec<u8>, u64)> {
    match envelope {
        TxEnvelope::Legacy(tx) => {
            let t = tx.tx();
            Ok((t.to, t.value, t.input.to_vec(), t.nonce))
        }
        TxEnvelope::Eip2930(tx) => {
            let t = tx.tx();
            Ok((t.to, t.value, t.input.to_vec(), t.nonce))
        }
        TxEnvelope::Eip1559(tx) => {
            let t = tx.tx();
            Ok((t.to, t.value, t.input.to_vec(), t.nonce))
        }
        _ => Err(BridgeError::Validation("unsupported transaction type".into())),
    }
}

async fn eth_send_raw_transaction(state: &AppState, params: &Value) -> BridgeResult<Value> {
    let raw_hex = param_str(params, 0)?;
    let raw = hex::decode(raw_hex.trim_start_matches("0x"))
        .map_err(|e| BridgeError::Validation(format!("invalid raw transaction hex: {e}")))?;

    let envelope = decode_envelope(&raw)?;
    let sender = recover_sender(&envelope)?;
    let (to_kind, value, input, nonce) = basic_fields(&envelope)?;

    let to = match to_kind {
        TxKind::Call(addr) => addr,
        TxKind::Create => return Err(BridgeError::Validation("contract creation not supported".into())),
    };
    let symbol = token_symbol_for(state, to)
        .ok_or_else(|| BridgeError::Validation("`to` is not a bridged token contract".into()))?;
    if value != U256::ZERO {
        return Err(BridgeError::Validation("native value must be zero".into()));
    }

    let sender_evm = EvmAddress::from_hex(&sender.to_string()).map_err(|e| BridgeError::Validation(e.to_string()))?;
    if !db::is_whitelisted(&state.db, &sender_evm.as_hex()).await? {
        return Err(BridgeError::Validation("sender is not whitelisted".into()));
    }

    if input.len() < 4 || input[0..4] != *abi::TRANSFER_SELECTOR {
        return Err(BridgeError::Validation("only ERC-20 transfer is supported".into()));
    }
    let recipient = abi::read_address_arg(&input, 0)
        .ok_or_else(|| BridgeError::Validation("transfer missing recipient arg".into()))?;
    let amount_wei = abi::read_u256_arg(&input, 1)
        .ok_or_else(|| BridgeError::Validation("transfer missing amount arg".into()))?;
    let amount_decimal_str = wei_to_decimal_string(amount_wei, state.token.decimals);
    let amount = bigdecimal::BigDecimal::from_str(&amount_decimal_str)
        .map_err(|e| BridgeError::Validation(format!("amount not representable: {e}")))?;

    let recipient_address = Address::from(recipient);

    state
        .token_service
        .transfer(&sender.to_string(), &recipient_address.to_string(), &amount, symbol)
        .await?;

    let tx_hash = keccak256(&raw);
    let tx_hash_hex = hex_bytes(tx_hash.as_slice());

    let (block_number, block_hash) = db::next_evm_block(&state.db, state.eth_rpc.chain_id).await?;
    let block_hash_hex = hex_bytes(&block_hash);

    db::insert_evm_transaction(
        &state.db,
        &db::NewEvmTransaction {
            tx_hash: tx_hash_hex.clone(),
            from_address: sender.to_string(),
            to_address: to.to_string(),
            nonce: nonce as i64,
            input_data: input.to_vec(),
            block_number: block_number as i64,
            block_hash: block_hash_hex.clone(),
        },
        &block_hash_hex,
    )
    .await?;

    let topics = vec![
        hex_bytes(TRANSFER_EVENT_TOPIC.as_slice()),
        hex_bytes(&abi::word_from_bytes(sender.as_slice())),
        hex_bytes(&abi::word_from_address(&recipient)),
    ];
    db::insert_evm_log(
        &state.db,
        &db::NewEvmLog {
            tx_hash: tx_hash_hex.clone(),
            log_index: 0,
            address: to.to_string(),
            topics,
            data: abi::word_from_u256(amount_wei).to_vec(),
            block_number: block_number as i64,
            block_hash: block_hash_hex.clone(),
            tx_index: 0,
        },
        &block_hash_hex,
    )
    .await?;

    Ok(json!(tx_hash_hex))
}

fn add_to_bloom(bloom: &mut [u8; 256], item: &[u8]) {
    let hash = keccak256(item);
    for i in [0usize, 2, 4] {
        let bit = (u16::from_be_bytes([hash[i], hash[i + 1]]) & 0x7ff) as usize;
        let byte_index = 255 - bit / 8;
        let bit_index = bit % 8;
        bloom[byte_index] |= 1 << bit_index;
    }
}

fn logs_bloom(logs: &[db::EvmLog]) -> String {
    let mut bloom = [0u8; 256];
    for log in logs {
        if let Ok(addr) = hex::decode(log.address.trim_start_matches("0x")) {
            add_to_bloom(&mut bloom, &addr);
        }
        for topic in [&log.topic0, &log.topic1, &log.topic2, &log.topic3].into_iter().flatten() {
            if let Ok(bytes) = hex::decode(topic.trim_start_matches("0x")) {
                add_to_bloom(&mut bloom, &bytes);
            }
        }
    }
    hex_bytes(&bloom)
}

fn log_to_json(log: &db::EvmLog) -> Value {
    let topics: Vec<String> = [&log.topic0, &log.topic1, &log.topic2, &log.topic3]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    json!({
        "address": log.address,
        "topics": topics,
        "data": hex_bytes(&log.data),
        "blockNumber": hex_u64(log.block_number as u64),
        "blockHash": log.block_hash,
        "transactionHash": log.tx_hash,
        "transactionIndex": hex_u64(log.tx_index as u64),
        "logIndex": hex_u64(log.log_index as u64),
        "removed": log.removed,
    })
}

async fn eth_get_transaction_receipt(state: &AppState, params: &Value) -> BridgeResult<Value> {
    let tx_hash = param_str(params, 0)?;
    let tx = match db::get_evm_transaction_by_hash(&state.db, &tx_hash).await? {
        Some(tx) => tx,
        None => return Ok(Value::Null),
    };
    let logs = db::get_evm_logs_by_tx_hash(&state.db, &tx_hash).await?;
    Ok(json!({
        "transactionHash": tx.tx_hash,
        "transactionIndex": hex_u64(tx.tx_index as u64),
        "blockHash": tx.block_hash,
        "blockNumber": hex_u64(tx.block_number as u64),
        "from": tx.from_address,
        "to": tx.to_address,
        "cumulativeGasUsed": hex_u64(tx.gas_used as u64),
        "gasUsed": hex_u64(tx.gas_used as u64),
        "contractAddress": Value::Null,
        "logs": logs.iter().map(log_to_json).collect::<Vec<_>>(),
        "logsBloom": logs_bloom(&logs),
        "status": hex_u64(tx.status as u64),
        "type": "0x2",
    }))
}

async fn eth_get_transaction_by_hash(state: &AppState, params: &Value) -> BridgeResult<Value> {
    let tx_hash = param_str(params, 0)?;
    let tx = match db::get_evm_transaction_by_hash(&state.db, &tx_hash).await? {
        Some(tx) => tx,
        None => return Ok(Value::Null),
    };
    Ok(json!({
        "hash": tx.tx_hash,
        "nonce": hex_u64(tx.nonce as u64),
        "blockHash": tx.block_hash,
        "blockNumber": hex_u64(tx.block_number as u64),
        "transactionIndex": hex_u64(tx.tx_index as u64),
        "from": tx.from_address,
        "to": tx.to_address,
        "value": "0x0",
        "input": hex_bytes(&tx.input_data),
        "gas": hex_u64(tx.gas_used as u64),
        "gasPrice": format!("0x{:x}", state.eth_rpc.gas_price_wei),
        "type": "0x2",
    }))
}

async fn eth_get_block_by_number(state: &AppState, params: &Value) -> BridgeResult<Value> {
    let tag = param_str(params, 0)?;
    let latest = db::get_latest_block_number(&state.db).await?;
    let block_number = match tag.as_str() {
        "latest" | "pending" => latest,
        hex if hex.starts_with("0x") => u64::from_str_radix(&hex[2..], 16)
            .map_err(|e| BridgeError::Validation(format!("invalid block tag: {e}")))?,
        other => return Err(BridgeError::Validation(format!("unsupported block tag: {other}"))),
    };
    let block_hash = db::synthetic_block_hash(state.eth_rpc.chain_id, block_number);
    let logs = db::get_evm_logs_in_range(&state.db, block_number as i64, block_number as i64).await?;
    let tx_hashes: Vec<String> = logs.iter().map(|l| l.tx_hash.clone()).collect();
    Ok(json!({
        "number": hex_u64(block_number),
        "hash": hex_bytes(&block_hash),
        "parentHash": if block_number == 0 { hex_bytes(&[0u8; 32]) } else { hex_bytes(&db::synthetic_block_hash(state.eth_rpc.chain_id, block_number - 1)) },
        "timestamp": "0x0",
        "transactions": tx_hashes,
        "logsBloom": logs_bloom(&logs),
    }))
}

async fn eth_get_logs(state: &AppState, params: &Value) -> BridgeResult<Value> {
    let filter = params.get(0).cloned().unwrap_or(json!({}));
    let latest = db::get_latest_block_number(&state.db).await?;
    let parse_tag = |v: Option<&str>, default: u64| -> BridgeResult<u64> {
        match v {
            None | Some("latest") | Some("pending") => Ok(default),
            Some("earliest") => Ok(0),
            Some(hex) if hex.starts_with("0x") => u64::from_str_radix(&hex[2..], 16)
                .map_err(|e| BridgeError::Validation(format!("invalid block tag: {e}"))),
            Some(other) => Err(BridgeError::Validation(format!("unsupported block tag: {other}"))),
        }
    };
    let from_block = parse_tag(filter.get("fromBlock").and_then(Value::as_str), latest)?;
    let to_block = parse_tag(filter.get("toBlock").and_then(Value::as_str), latest)?;

    let logs = db::get_evm_logs_in_range(&state.db, from_block as i64, to_block as i64).await?;
    Ok(json!(logs.iter().map(log_to_json).collect::<Vec<_>>()))
}
