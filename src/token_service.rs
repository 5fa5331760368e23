//! Custodial token operations backing the EVM facade's ERC-20 surface:
//! party-authorized transfers between registered users, cache-only balance
//! reads, and authoritative total supply. Grounded on the same
//! store-then-ledger sequencing the relayer engine uses, but driven by an
//! inbound RPC call instead of a chain/ledger event.

use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::db;
use crate::db::models::User;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::LedgerClient;
use crate::types::{EvmAddress, Symbol};

/// A user's acting ledger party: their own party once registered for
/// self-custody, the shared relayer party otherwise.
fn acting_party(user: &User) -> &str {
    user.owned_party_id.as_deref().unwrap_or(&user.ledger_party_id)
}

fn normalize(evm_address: &str) -> BridgeResult<String> {
    Ok(EvmAddress::from_hex(evm_address)
        .map_err(|e| BridgeError::Validation(format!("invalid EVM address: {e}")))?
        .as_hex())
}

#[derive(Clone)]
pub struct TokenService {
    db: PgPool,
    ledger: LedgerClient,
}

impl TokenService {
    pub fn new(db: PgPool, ledger: LedgerClient) -> Self {
        Self { db, ledger }
    }

    /// Moves `amount` of `symbol` from `from_evm` to `to_evm`: resolves both
    /// sides to registered users, picks a covering holding and a mergeable
    /// recipient holding on the ledger, exercises the transfer, then updates
    /// the cache atomically. Both ledger-side and store-side failures map to
    /// the same error vocabulary the relayer engine uses.
    pub async fn transfer(
        &self,
        from_evm: &str,
        to_evm: &str,
        amount: &BigDecimal,
        symbol: Symbol,
    ) -> BridgeResult<()> {
        let from_evm = normalize(from_evm)?;
        let to_evm = normalize(to_evm)?;

        let sender = db::get_user_by_evm_address(&self.db, &from_evm)
            .await?
            .ok_or_else(|| BridgeError::UserNotRegistered(from_evm.clone()))?;
        let recipient = db::get_user_by_evm_address(&self.db, &to_evm)
            .await?
            .ok_or_else(|| BridgeError::RecipientNotFound(to_evm.clone()))?;

        let mut ledger = self.ledger.clone();
        let sender_party = acting_party(&sender).to_string();
        let recipient_party = acting_party(&recipient).to_string();

        let holding = ledger
            .find_holding_for_transfer(&sender_party, amount, symbol)
            .await?;
        let existing_recipient_holding = ledger
            .find_recipient_holding(&recipient_party, symbol)
            .await?;

        ledger
            .transfer_as_user(
                &sender_party,
                &holding.contract_id,
                &recipient_party,
                amount,
                existing_recipient_holding.as_ref().map(|h| h.contract_id.as_str()),
            )
            .await?;

        db::transfer_balance_by_fingerprint(
            &self.db,
            symbol,
            &sender.fingerprint,
            &recipient.fingerprint,
            amount,
        )
        .await
    }

    /// Cache-only read. An unregistered address has a balance of zero, not
    /// an error — the facade reports a fresh wallet exactly as an ERC-20
    /// would.
    pub async fn get_balance(&self, evm_address: &str, symbol: Symbol) -> BridgeResult<BigDecimal> {
        let evm_address = normalize(evm_address)?;
        let user = db::get_user_by_evm_address(&self.db, &evm_address).await?;
        Ok(user
            .map(|u| u.balance(symbol).clone())
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    /// The reconciler's persisted authoritative total, not a live sum over
    /// the ledger's active-contract set.
    pub async fn get_total_supply(&self, symbol: Symbol) -> BridgeResult<BigDecimal> {
        let state = db::get_reconciliation_state(&self.db).await?;
        Ok(state.total_supply(symbol).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_either_case() {
        let lower = normalize("0xf39fd6e51aad88f6f4ce6ab8827279cfffb9226").unwrap();
        let mixed = normalize("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb9226").unwrap();
        assert_eq!(lower, mixed);
    }

    #[test]
    fn test_normalize_rejects_short_address() {
        assert!(normalize("0xdead").is_err());
    }
}
