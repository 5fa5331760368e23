//! `/rpc`: the internal JSON-RPC surface, a thin envelope around the Token
//! Service — `transfer`, `getBalance`, `getTotalSupply` — for callers that
//! don't need the Ethereum-compatible emulation on `/eth`.

use axum::extract::State;
use axum::Json;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

use crate::error::BridgeError;
use crate::types::Symbol;

use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use super::AppState;

#[derive(Deserialize)]
struct TransferParams {
    from: String,
    to: String,
    amount: String,
    #[serde(default = "default_symbol")]
    symbol: String,
}

#[derive(Deserialize)]
struct BalanceParams {
    evm: String,
    #[serde(default = "default_symbol")]
    symbol: String,
}

#[derive(Deserialize)]
struct TotalSupplyParams {
    #[serde(default = "default_symbol")]
    symbol: String,
}

fn default_symbol() -> String {
    "PROMPT".to_string()
}

fn parse_symbol(s: &str) -> Result<Symbol, BridgeError> {
    Symbol::from_str_loose(s).ok_or_else(|| BridgeError::Validation(format!("unknown symbol: {s}")))
}

fn parse_amount(s: &str) -> Result<BigDecimal, BridgeError> {
    BigDecimal::from_str(s).map_err(|e| BridgeError::Validation(format!("invalid amount: {e}")))
}

pub async fn handle(State(state): State<AppState>, Json(req): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    let id = req.id.clone();
    let result = dispatch(&state, &req).await;
    Json(match result {
        Ok(value) => JsonRpcResponse::ok(id, value),
        Err(e) => JsonRpcResponse::err(id, &e),
    })
}

async fn dispatch(state: &AppState, req: &JsonRpcRequest) -> Result<Value, BridgeError> {
    match req.method.as_str() {
        "transfer" => {
            let params: TransferParams = serde_json::from_value(req.params.clone())
                .map_err(|e| BridgeError::Validation(format!("bad params: {e}")))?;
            let symbol = parse_symbol(&params.symbol)?;
            let amount = parse_amount(&params.amount)?;
            state.token_service.transfer(&params.from, &params.to, &amount, symbol).await?;
            Ok(json!({ "ok": true }))
        }
        "getBalance" => {
            let params: BalanceParams = serde_json::from_value(req.params.clone())
                .map_err(|e| BridgeError::Validation(format!("bad params: {e}")))?;
            let symbol = parse_symbol(&params.symbol)?;
            let balance = state.token_service.get_balance(&params.evm, symbol).await?;
            Ok(json!({ "balance": balance.to_string() }))
        }
        "getTotalSupply" => {
            let params: TotalSupplyParams = serde_json::from_value(req.params.clone())
                .map_err(|e| BridgeError::Validation(format!("bad params: {e}")))?;
            let symbol = parse_symbol(&params.symbol)?;
            let supply = state.token_service.get_total_supply(symbol).await?;
            Ok(json!({ "totalSupply": supply.to_string() }))
        }
        other => Err(BridgeError::UnsupportedMethod(other.to_string())),
    }
}
