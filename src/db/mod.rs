#![allow(dead_code)]

use bigdecimal::BigDecimal;
use eyre::{Result, WrapErr};
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::error;

use crate::error::{BridgeError, BridgeResult};
use crate::types::{BridgeEventType, Symbol, TransferStatus};

pub mod models;

pub use models::*;

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

// ---------------------------------------------------------------- users ---

pub async fn get_user_by_evm_address(pool: &PgPool, evm_address: &str) -> BridgeResult<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE evm_address = $1")
        .bind(evm_address)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Looks up by fingerprint in either accepted stored/query form (§3, §8 property 8).
pub async fn get_user_by_fingerprint(pool: &PgPool, fingerprint: &crate::types::Fingerprint) -> BridgeResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE fingerprint IN ($1, $2)",
    )
    .bind(fingerprint.prefixed())
    .bind(fingerprint.unprefixed())
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn create_user(pool: &PgPool, new_user: &NewUser) -> BridgeResult<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (evm_address, ledger_party_id, fingerprint)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(&new_user.evm_address)
    .bind(&new_user.ledger_party_id)
    .bind(&new_user.fingerprint)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn set_owned_party(
    pool: &PgPool,
    evm_address: &str,
    owned_party_id: &str,
    mapping_contract_id: &str,
) -> BridgeResult<()> {
    sqlx::query(
        "UPDATE users SET owned_party_id = $1, mapping_contract_id = $2 WHERE evm_address = $3",
    )
    .bind(owned_party_id)
    .bind(mapping_contract_id)
    .bind(evm_address)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_whitelisted(pool: &PgPool, evm_address: &str) -> BridgeResult<bool> {
    let row: (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM whitelist WHERE evm_address = $1)")
            .bind(evm_address)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

// ------------------------------------------------------------- transfers ---

pub async fn get_transfer(pool: &PgPool, id: &str) -> BridgeResult<Option<Transfer>> {
    let transfer = sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(transfer)
}

/// Create-if-absent; `id` is the idempotency key (§3, §8 property 1).
pub async fn create_transfer(pool: &PgPool, transfer: &NewTransfer) -> BridgeResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transfers (id, direction, status, src_chain_id, dest_chain_id, src_ref,
            token_address, amount, sender, recipient, nonce, src_block_or_offset)
        VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&transfer.id)
    .bind(transfer.direction)
    .bind(&transfer.src_chain_id)
    .bind(&transfer.dest_chain_id)
    .bind(&transfer.src_ref)
    .bind(&transfer.token_address)
    .bind(&transfer.amount)
    .bind(&transfer.sender)
    .bind(&transfer.recipient)
    .bind(transfer.nonce)
    .bind(&transfer.src_block_or_offset)
    .execute(pool)
    .await?;
    Ok(())
}

/// Single terminal transition; never called twice for the same id in practice
/// (the Processor checks `get_transfer` first), but idempotent regardless.
pub async fn update_transfer_status(
    pool: &PgPool,
    id: &str,
    status: TransferStatus,
    dest_tx_hash: Option<&str>,
) -> BridgeResult<()> {
    sqlx::query(
        r#"
        UPDATE transfers SET status = $1, dest_tx_hash = $2, completed_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(status)
    .bind(dest_tx_hash)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Transfers stuck at `pending` past `max_age` — a crash between
/// `create_transfer` and `update_transfer_status` leaves these behind.
pub async fn list_stale_pending_transfers(pool: &PgPool, max_age: std::time::Duration) -> BridgeResult<Vec<Transfer>> {
    let max_age_secs = max_age.as_secs() as i64;
    let transfers = sqlx::query_as::<_, Transfer>(
        "SELECT * FROM transfers WHERE status = 'pending' AND created_at < NOW() - make_interval(secs => $1)",
    )
    .bind(max_age_secs)
    .fetch_all(pool)
    .await?;
    Ok(transfers)
}

// ----------------------------------------------------------- chain_state ---

pub async fn get_chain_state(pool: &PgPool, chain_id: &str) -> BridgeResult<Option<ChainState>> {
    let state = sqlx::query_as::<_, ChainState>("SELECT * FROM chain_state WHERE chain_id = $1")
        .bind(chain_id)
        .fetch_optional(pool)
        .await?;
    Ok(state)
}

pub async fn set_chain_offset(
    pool: &PgPool,
    chain_id: &str,
    last_block_number: Option<i64>,
    last_offset: Option<&str>,
) -> BridgeResult<()> {
    sqlx::query(
        r#"
        INSERT INTO chain_state (chain_id, last_block_number, last_offset)
        VALUES ($1, $2, $3)
        ON CONFLICT (chain_id) DO UPDATE SET
            last_block_number = EXCLUDED.last_block_number,
            last_offset = EXCLUDED.last_offset,
            updated_at = NOW()
        "#,
    )
    .bind(chain_id)
    .bind(last_block_number)
    .bind(last_offset)
    .execute(pool)
    .await?;
    Ok(())
}

// --------------------------------------------------------- bridge events ---

/// Inserts a bridge event and applies the balance delta atomically (§3
/// Invariant, §8 property 4). Returns `true` if the event was newly applied,
/// `false` if `contract_id` was already present (no-op, idempotent replay).
pub async fn store_bridge_event(pool: &PgPool, event: &NewBridgeEvent) -> BridgeResult<bool> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO bridge_events (event_type, contract_id, user_fingerprint, amount, symbol,
            chain_tx_hash, dest_address, ledger_timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (contract_id) DO NOTHING
        "#,
    )
    .bind(event.event_type)
    .bind(&event.contract_id)
    .bind(&event.user_fingerprint)
    .bind(&event.amount)
    .bind(event.symbol)
    .bind(&event.chain_tx_hash)
    .bind(&event.dest_address)
    .bind(event.ledger_timestamp)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let signed_amount: BigDecimal = match event.event_type {
        BridgeEventType::Mint => event.amount.clone(),
        BridgeEventType::Burn => -event.amount.clone(),
    };
    let column = match event.symbol {
        Symbol::Prompt => "prompt_balance",
        Symbol::Demo => "demo_balance",
    };
    let query = format!(
        r#"UPDATE users SET {column} = COALESCE({column}, 0) + $1, balance_updated_at = NOW()
           WHERE fingerprint IN ($2, $3)"#,
    );
    sqlx::query(&query)
        .bind(&signed_amount)
        .bind(event.user_fingerprint.trim_start_matches("0x"))
        .bind(format!("0x{}", event.user_fingerprint.trim_start_matches("0x")))
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE reconciliation_state SET events_processed = events_processed + 1 WHERE id = 1")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// Truncates bridge_events and resets the processed counter (§4.4
/// `FullBalanceReconciliation`).
pub async fn clear_bridge_events(pool: &PgPool) -> BridgeResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("TRUNCATE TABLE bridge_events").execute(&mut *tx).await?;
    sqlx::query("UPDATE reconciliation_state SET events_processed = 0 WHERE id = 1")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Decrements sender, increments recipient in one transaction; both rows
/// must exist or the whole transfer rolls back (§4.6 Token Service).
pub async fn transfer_balance_by_fingerprint(
    pool: &PgPool,
    symbol: Symbol,
    from_fingerprint: &str,
    to_fingerprint: &str,
    amount: &BigDecimal,
) -> BridgeResult<()> {
    let column = match symbol {
        Symbol::Prompt => "prompt_balance",
        Symbol::Demo => "demo_balance",
    };
    let mut tx = pool.begin().await?;

    let debit_query = format!(
        r#"UPDATE users SET {column} = {column} - $1, balance_updated_at = NOW()
           WHERE fingerprint IN ($2, $3)"#,
    );
    let debited = sqlx::query(&debit_query)
        .bind(amount)
        .bind(from_fingerprint.trim_start_matches("0x"))
        .bind(format!("0x{}", from_fingerprint.trim_start_matches("0x")))
        .execute(&mut *tx)
        .await?;
    if debited.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(BridgeError::UserNotRegistered(from_fingerprint.to_string()));
    }

    let credit_query = format!(
        r#"UPDATE users SET {column} = COALESCE({column}, 0) + $1, balance_updated_at = NOW()
           WHERE fingerprint IN ($2, $3)"#,
    );
    let credited = sqlx::query(&credit_query)
        .bind(amount)
        .bind(to_fingerprint.trim_start_matches("0x"))
        .bind(format!("0x{}", to_fingerprint.trim_start_matches("0x")))
        .execute(&mut *tx)
        .await?;
    if credited.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(BridgeError::RecipientNotFound(to_fingerprint.to_string()));
    }

    tx.commit().await?;
    Ok(())
}

// ------------------------------------------------------ reconciliation ----

pub async fn get_reconciliation_state(pool: &PgPool) -> BridgeResult<ReconciliationState> {
    let state = sqlx::query_as::<_, ReconciliationState>(
        "SELECT * FROM reconciliation_state WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(state)
}

pub async fn touch_reconciliation_state(pool: &PgPool, last_offset: &str) -> BridgeResult<()> {
    sqlx::query(
        "UPDATE reconciliation_state SET last_offset = $1, last_reconciled_at = NOW() WHERE id = 1",
    )
    .bind(last_offset)
    .execute(pool)
    .await?;
    Ok(())
}

/// Marks a reconciliation pass complete without disturbing `last_offset`,
/// which belongs to the engine's resume cursor, not the reconciler.
pub async fn mark_reconciled(pool: &PgPool) -> BridgeResult<()> {
    sqlx::query("UPDATE reconciliation_state SET last_reconciled_at = NOW() WHERE id = 1")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_user_balance(pool: &PgPool, evm_address: &str, symbol: Symbol, amount: &BigDecimal) -> BridgeResult<()> {
    let column = match symbol {
        Symbol::Prompt => "prompt_balance",
        Symbol::Demo => "demo_balance",
    };
    let query = format!(
        "UPDATE users SET {column} = $1, balance_updated_at = NOW() WHERE evm_address = $2",
    );
    sqlx::query(&query)
        .bind(amount)
        .bind(evm_address)
        .execute(pool)
        .await?;
    Ok(())
}

/// Sets a user's balance by ledger party (either `ledger_party_id` or
/// `owned_party_id`), for the reconciler's per-party rebuild.
pub async fn set_user_balance_by_party(pool: &PgPool, party: &str, symbol: Symbol, amount: &BigDecimal) -> BridgeResult<bool> {
    let column = match symbol {
        Symbol::Prompt => "prompt_balance",
        Symbol::Demo => "demo_balance",
    };
    let query = format!(
        "UPDATE users SET {column} = $1, balance_updated_at = NOW() \
         WHERE ledger_party_id = $2 OR owned_party_id = $2",
    );
    let result = sqlx::query(&query)
        .bind(amount)
        .bind(party)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Zeroes every user's balance for `symbol` ahead of a full rebuild.
pub async fn clear_all_balances(pool: &PgPool, symbol: Symbol) -> BridgeResult<()> {
    let column = match symbol {
        Symbol::Prompt => "prompt_balance",
        Symbol::Demo => "demo_balance",
    };
    let query = format!("UPDATE users SET {column} = 0, balance_updated_at = NOW()");
    sqlx::query(&query).execute(pool).await?;
    Ok(())
}

pub async fn list_users(pool: &PgPool) -> BridgeResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users").fetch_all(pool).await?;
    Ok(users)
}

pub async fn set_total_supply(pool: &PgPool, symbol: Symbol, amount: &BigDecimal) -> BridgeResult<()> {
    let column = match symbol {
        Symbol::Prompt => "total_supply_prompt",
        Symbol::Demo => "total_supply_demo",
    };
    let query = format!("UPDATE reconciliation_state SET {column} = $1 WHERE id = 1");
    sqlx::query(&query).bind(amount).execute(pool).await?;
    Ok(())
}

// --------------------------------------------------------- synthetic evm ---

/// Allocates the next synthetic block under a row lock, so concurrent
/// callers observe a strictly increasing sequence (§3, §8 property 5).
pub async fn next_evm_block(pool: &PgPool, chain_id: u64) -> BridgeResult<(u64, [u8; 32])> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT value FROM evm_meta WHERE key = 'latest_block_number' FOR UPDATE")
        .fetch_one(&mut *tx)
        .await?;
    let current: u64 = row
        .get::<String, _>("value")
        .parse()
        .map_err(|_| BridgeError::Internal(eyre::eyre!("corrupt latest_block_number")))?;
    let next = current + 1;

    sqlx::query("UPDATE evm_meta SET value = $1 WHERE key = 'latest_block_number'")
        .bind(next.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((next, synthetic_block_hash(chain_id, next)))
}

/// `sha256(be64(chain_id)||be64(block_number))`, per §3/§8 property 5.
pub fn synthetic_block_hash(chain_id: u64, block_number: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(chain_id.to_be_bytes());
    hasher.update(block_number.to_be_bytes());
    hasher.finalize().into()
}

pub async fn insert_evm_transaction(
    pool: &PgPool,
    tx: &NewEvmTransaction,
    block_hash: &str,
) -> BridgeResult<()> {
    sqlx::query(
        r#"
        INSERT INTO evm_transactions (tx_hash, from_address, to_address, nonce, input_data,
            block_number, block_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tx_hash) DO NOTHING
        "#,
    )
    .bind(&tx.tx_hash)
    .bind(&tx.from_address)
    .bind(&tx.to_address)
    .bind(tx.nonce)
    .bind(&tx.input_data)
    .bind(tx.block_number)
    .bind(block_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_evm_log(pool: &PgPool, log: &NewEvmLog, block_hash: &str) -> BridgeResult<()> {
    sqlx::query(
        r#"
        INSERT INTO evm_logs (tx_hash, log_index, address, topic0, topic1, topic2, topic3,
            data, block_number, block_hash, tx_index)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(&log.tx_hash)
    .bind(log.log_index)
    .bind(&log.address)
    .bind(log.topics.first())
    .bind(log.topics.get(1))
    .bind(log.topics.get(2))
    .bind(log.topics.get(3))
    .bind(&log.data)
    .bind(log.block_number)
    .bind(block_hash)
    .bind(log.tx_index)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_evm_transaction_by_hash(pool: &PgPool, tx_hash: &str) -> BridgeResult<Option<EvmTransaction>> {
    let tx = sqlx::query_as::<_, EvmTransaction>("SELECT * FROM evm_transactions WHERE tx_hash = $1")
        .bind(tx_hash)
        .fetch_optional(pool)
        .await?;
    Ok(tx)
}

pub async fn get_evm_logs_by_tx_hash(pool: &PgPool, tx_hash: &str) -> BridgeResult<Vec<EvmLog>> {
    let logs = sqlx::query_as::<_, EvmLog>(
        "SELECT * FROM evm_logs WHERE tx_hash = $1 ORDER BY log_index ASC",
    )
    .bind(tx_hash)
    .fetch_all(pool)
    .await?;
    Ok(logs)
}

pub async fn get_evm_logs_in_range(pool: &PgPool, from_block: i64, to_block: i64) -> BridgeResult<Vec<EvmLog>> {
    let logs = sqlx::query_as::<_, EvmLog>(
        "SELECT * FROM evm_logs WHERE block_number BETWEEN $1 AND $2 ORDER BY block_number ASC, log_index ASC",
    )
    .bind(from_block)
    .bind(to_block)
    .fetch_all(pool)
    .await?;
    Ok(logs)
}

/// `MAX(nonce)+1` of stored synthetic transactions for `from`, or 0 if none
/// (§4.3 Nonce).
pub async fn get_evm_transaction_count(pool: &PgPool, from_address: &str) -> BridgeResult<u64> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(nonce) FROM evm_transactions WHERE from_address = $1")
            .bind(from_address)
            .fetch_one(pool)
            .await?;
    Ok(row.0.map(|n| (n + 1) as u64).unwrap_or(0))
}

pub async fn get_latest_block_number(pool: &PgPool) -> BridgeResult<u64> {
    let row = sqlx::query("SELECT value FROM evm_meta WHERE key = 'latest_block_number'")
        .fetch_one(pool)
        .await?;
    let value: String = row.get("value");
    value
        .parse()
        .map_err(|_| BridgeError::Internal(eyre::eyre!("corrupt latest_block_number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_block_hash_deterministic() {
        let a = synthetic_block_hash(1, 100);
        let b = synthetic_block_hash(1, 100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_synthetic_block_hash_differs_by_block() {
        let a = synthetic_block_hash(1, 100);
        let b = synthetic_block_hash(1, 101);
        assert_ne!(a, b);
    }

    #[test]
    fn test_synthetic_block_hash_differs_by_chain() {
        let a = synthetic_block_hash(1, 100);
        let b = synthetic_block_hash(2, 100);
        assert_ne!(a, b);
    }
}
