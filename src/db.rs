use anyhow::{Context, Result};
use bigdecimal::{BigDecimal, Zero};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::time::Duration;
use tracing::{debug, info};

use crate::coin::Coin;
use crate::decoders::Movement;
use crate::denoms::{Asset, DenomRegistry};

// Define migrations
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub mod models;
pub mod schema;

use models::{Block, Denom, DenomUnit, DenomUnitAlias, Epoch, NewTaxableEvent};

/// Type alias for database connection pool
pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Creates a Postgres connection pool
pub fn create_connection_pool(database_url: &str, max_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);

    Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(30))
        .test_on_check_out(true)
        .build(manager)
        .context("Failed to create database connection pool")
}

/// Runs database migrations
pub fn run_migrations(conn: &mut PgConnection) -> Result<()> {
    info!("Running database migrations");

    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(_) => {
            info!("Database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            anyhow::bail!("Failed to run database migrations: {}", e)
        }
    }
}

/// Chain identity as configured.
#[derive(Debug, Clone)]
pub struct ChainIdentity {
    pub chain_id: String,
    pub name: String,
}

/// A fee coin and who paid it.
#[derive(Debug, Clone)]
pub struct FeeRecord {
    pub payer: String,
    pub coin: Coin,
}

/// One message of a transaction. `movements` is empty for undecoded types.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub index: i32,
    pub type_url: String,
    pub movements: Vec<Movement>,
}

#[derive(Debug, Clone)]
pub struct TxRecord {
    pub hash: String,
    pub code: i64,
    pub signer: Option<String>,
    pub fees: Vec<FeeRecord>,
    pub messages: Vec<MessageRecord>,
}

/// Everything decoded for one height, ready to be written in one transaction.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub height: i64,
    pub time: NaiveDateTime,
    pub txs: Vec<TxRecord>,
}

/// What `store_block` did with a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    AlreadyIndexed,
    Stored { txs: usize, movements: usize },
}

/// Write a decoded height: chain, block, then per tx the signer, fees and
/// messages with their movements. All-or-nothing.
pub fn store_block(
    conn: &mut PgConnection,
    denoms: &DenomRegistry,
    chain: &ChainIdentity,
    block: &BlockRecord,
    reindex: bool,
) -> Result<StoreOutcome> {
    conn.transaction(|tx_conn| {
        let chain_pk = get_or_create_chain(tx_conn, &chain.chain_id, &chain.name)?;
        let block_row = get_or_create_block(tx_conn, chain_pk, block.height, block.time)?;

        if block_row.tx_indexed {
            if !reindex {
                debug!("Block {} already indexed, skipping", block.height);
                return Ok(StoreOutcome::AlreadyIndexed);
            }
            let deleted = delete_block_contents(tx_conn, block_row.id)?;
            info!("Reindexing block {}: removed {} existing rows", block.height, deleted);
        }

        let mut movement_count = 0;
        for tx in &block.txs {
            let signer_id = match &tx.signer {
                Some(signer) => Some(get_or_create_address(tx_conn, &signer.to_lowercase())?),
                None => None,
            };
            let tx_pk = get_or_create_tx(tx_conn, &tx.hash, tx.code, block_row.id, signer_id)?;

            for fee in &tx.fees {
                if fee.coin.amount.is_zero() {
                    continue;
                }
                let denom = denoms.ensure_denom(tx_conn, &fee.coin.denom)?;
                let payer_id = get_or_create_address(tx_conn, &fee.payer.to_lowercase())?;
                insert_fee(tx_conn, tx_pk, &fee.coin.amount, denom.id, payer_id)?;
            }

            for message in &tx.messages {
                let type_id = get_or_create_message_type(tx_conn, &message.type_url)?;
                let message_pk = insert_message(tx_conn, tx_pk, type_id, message.index)?;
                for movement in &message.movements {
                    insert_taxable_tx(tx_conn, denoms, message_pk, movement)?;
                    movement_count += 1;
                }
            }
        }

        mark_block_tx_indexed(tx_conn, block_row.id)?;
        Ok(StoreOutcome::Stored {
            txs: block.txs.len(),
            movements: movement_count,
        })
    })
}

pub fn get_or_create_chain(conn: &mut PgConnection, chain_id_val: &str, name_val: &str) -> Result<i32> {
    use crate::db::models::NewChain;
    use diesel::insert_into;
    use schema::chains::dsl::*;

    // DB INSERT!
    let inserted = insert_into(chains)
        .values(&NewChain {
            chain_id: chain_id_val,
            name: name_val,
        })
        .on_conflict(chain_id)
        .do_nothing()
        .returning(id)
        .get_result::<i32>(conn)
        .optional()
        .with_context(|| format!("Failed to insert chain {}", chain_id_val))?;
    if let Some(inserted) = inserted {
        return Ok(inserted);
    }

    // DB QUERY!
    chains
        .filter(chain_id.eq(chain_id_val))
        .select(id)
        .first::<i32>(conn)
        .with_context(|| format!("Failed to query chain {}", chain_id_val))
}

/// Block row for `(chain, height)`, inserting it when new.
pub fn get_or_create_block(
    conn: &mut PgConnection,
    chain_pk: i32,
    height_val: i64,
    time_val: NaiveDateTime,
) -> Result<Block> {
    use crate::db::models::NewBlock;
    use diesel::insert_into;
    use schema::blocks::dsl::*;

    // DB INSERT!
    let inserted = insert_into(blocks)
        .values(&NewBlock {
            height: height_val,
            time_stamp: time_val,
            blockchain_id: chain_pk,
        })
        .on_conflict((blockchain_id, height))
        .do_nothing()
        .returning(Block::as_returning())
        .get_result(conn)
        .optional()
        .with_context(|| format!("Failed to insert block {}", height_val))?;
    if let Some(block) = inserted {
        return Ok(block);
    }

    // DB QUERY!
    blocks
        .filter(blockchain_id.eq(chain_pk))
        .filter(height.eq(height_val))
        .select(Block::as_select())
        .first(conn)
        .with_context(|| format!("Failed to query block {}", height_val))
}

/// Highest height with committed transactions.
pub fn highest_indexed_height(conn: &mut PgConnection, chain_pk: i32) -> Result<Option<i64>> {
    use schema::blocks::dsl::*;

    // DB QUERY!
    blocks
        .filter(blockchain_id.eq(chain_pk))
        .filter(tx_indexed.eq(true))
        .select(height)
        .order(height.desc())
        .first::<i64>(conn)
        .optional()
        .context("Failed to query highest indexed block")
}

fn mark_block_tx_indexed(conn: &mut PgConnection, block_pk: i32) -> Result<()> {
    use diesel::update;
    use schema::blocks::dsl::*;

    // DB UPDATE!
    update(blocks.filter(id.eq(block_pk)))
        .set(tx_indexed.eq(true))
        .execute(conn)
        .context("Failed to mark block as indexed")?;
    Ok(())
}

pub fn mark_block_events_indexed(conn: &mut PgConnection, block_pk: i32) -> Result<()> {
    use diesel::update;
    use schema::blocks::dsl::*;

    // DB UPDATE!
    update(blocks.filter(id.eq(block_pk)))
        .set(block_events_indexed.eq(true))
        .execute(conn)
        .context("Failed to mark block events as indexed")?;
    Ok(())
}

/// Remove the movements, messages and fees under a block so it can be rebuilt.
fn delete_block_contents(conn: &mut PgConnection, block_pk: i32) -> Result<usize> {
    use schema::{fees, messages, taxable_txs, txes};

    let block_txs = || txes::table.filter(txes::block_id.eq(block_pk)).select(txes::id);
    let block_messages = messages::table
        .filter(messages::tx_id.eq_any(block_txs()))
        .select(messages::id);

    // DB DELETE!
    let movements = diesel::delete(taxable_txs::table.filter(taxable_txs::message_id.eq_any(block_messages)))
        .execute(conn)
        .context("Failed to delete taxable transactions")?;
    let message_rows = diesel::delete(messages::table.filter(messages::tx_id.eq_any(block_txs())))
        .execute(conn)
        .context("Failed to delete messages")?;
    let fee_rows = diesel::delete(fees::table.filter(fees::tx_id.eq_any(block_txs())))
        .execute(conn)
        .context("Failed to delete fees")?;
    Ok(movements + message_rows + fee_rows)
}

/// Gets or creates an address record, returning the address id
pub fn get_or_create_address(conn: &mut PgConnection, address_val: &str) -> Result<i32> {
    use crate::db::models::NewAddress;
    use diesel::insert_into;
    use schema::addresses::dsl::*;

    // DB INSERT!
    let inserted = insert_into(addresses)
        .values(&NewAddress { address: address_val })
        .on_conflict(address)
        .do_nothing()
        .returning(id)
        .get_result::<i32>(conn)
        .optional()
        .with_context(|| format!("Failed to insert address {}", address_val))?;
    if let Some(inserted) = inserted {
        return Ok(inserted);
    }

    // DB QUERY!
    addresses
        .filter(address.eq(address_val))
        .select(id)
        .first::<i32>(conn)
        .with_context(|| format!("Failed to query address {}", address_val))
}

pub fn get_or_create_message_type(conn: &mut PgConnection, type_url: &str) -> Result<i32> {
    use crate::db::models::NewMessageType;
    use diesel::insert_into;
    use schema::message_types::dsl::*;

    // DB INSERT!
    let inserted = insert_into(message_types)
        .values(&NewMessageType { message_type: type_url })
        .on_conflict(message_type)
        .do_nothing()
        .returning(id)
        .get_result::<i32>(conn)
        .optional()
        .with_context(|| format!("Failed to insert message type {}", type_url))?;
    if let Some(inserted) = inserted {
        return Ok(inserted);
    }

    // DB QUERY!
    message_types
        .filter(message_type.eq(type_url))
        .select(id)
        .first::<i32>(conn)
        .with_context(|| format!("Failed to query message type {}", type_url))
}

/// Tx row by hash. An existing row keeps its original block and signer.
pub fn get_or_create_tx(
    conn: &mut PgConnection,
    hash_val: &str,
    code_val: i64,
    block_pk: i32,
    signer_id: Option<i32>,
) -> Result<i32> {
    use crate::db::models::NewTx;
    use diesel::insert_into;
    use schema::txes::dsl::*;

    // DB INSERT!
    let inserted = insert_into(txes)
        .values(&NewTx {
            hash: hash_val,
            code: code_val,
            block_id: block_pk,
            signer_address_id: signer_id,
        })
        .on_conflict(hash)
        .do_nothing()
        .returning(id)
        .get_result::<i32>(conn)
        .optional()
        .with_context(|| format!("Failed to insert tx {}", hash_val))?;
    if let Some(inserted) = inserted {
        return Ok(inserted);
    }

    // DB QUERY!
    txes.filter(hash.eq(hash_val))
        .select(id)
        .first(conn)
        .with_context(|| format!("Failed to query tx {}", hash_val))
}

fn insert_fee(
    conn: &mut PgConnection,
    tx_pk: i32,
    amount_val: &BigDecimal,
    denom_pk: i32,
    payer_id: i32,
) -> Result<()> {
    use crate::db::models::NewFee;
    use diesel::insert_into;
    use schema::fees::dsl::*;

    // DB INSERT!
    insert_into(fees)
        .values(&NewFee {
            tx_id: tx_pk,
            amount: amount_val.clone(),
            denomination_id: denom_pk,
            payer_address_id: payer_id,
        })
        .on_conflict((tx_id, denomination_id))
        .do_nothing()
        .execute(conn)
        .context("Failed to insert fee")?;
    Ok(())
}

fn insert_message(conn: &mut PgConnection, tx_pk: i32, type_id: i32, index: i32) -> Result<i32> {
    use crate::db::models::NewMessage;
    use diesel::insert_into;
    use schema::messages::dsl::*;

    // DB INSERT!
    let inserted = insert_into(messages)
        .values(&NewMessage {
            tx_id: tx_pk,
            message_type_id: type_id,
            message_index: index,
        })
        .on_conflict((tx_id, message_index))
        .do_nothing()
        .returning(id)
        .get_result::<i32>(conn)
        .optional()
        .context("Failed to insert message")?;
    if let Some(inserted) = inserted {
        return Ok(inserted);
    }

    // DB QUERY!
    messages
        .filter(tx_id.eq(tx_pk))
        .filter(message_index.eq(index))
        .select(id)
        .first(conn)
        .context("Failed to query message")
}

fn insert_taxable_tx(
    conn: &mut PgConnection,
    denoms: &DenomRegistry,
    message_pk: i32,
    movement: &Movement,
) -> Result<()> {
    use crate::db::models::NewTaxableTx;
    use diesel::insert_into;
    use schema::taxable_txs::dsl::*;

    let denom_id = |conn: &mut PgConnection, base: &Option<String>| -> Result<Option<i32>> {
        match base.as_deref().filter(|b| !b.is_empty()) {
            Some(base) => Ok(Some(denoms.ensure_denom(conn, base)?.id)),
            None => Ok(None),
        }
    };
    let address_id = |conn: &mut PgConnection, addr: &str| -> Result<Option<i32>> {
        if addr.is_empty() {
            return Ok(None);
        }
        Ok(Some(get_or_create_address(conn, &addr.to_lowercase())?))
    };

    let row = NewTaxableTx {
        message_id: message_pk,
        amount_sent: movement.amount_sent.clone().unwrap_or_else(BigDecimal::zero),
        amount_received: movement.amount_received.clone().unwrap_or_else(BigDecimal::zero),
        denomination_sent_id: denom_id(conn, &movement.denom_sent)?,
        denomination_received_id: denom_id(conn, &movement.denom_received)?,
        sender_address_id: address_id(conn, &movement.sender)?,
        receiver_address_id: address_id(conn, &movement.receiver)?,
    };

    // DB INSERT!
    insert_into(taxable_txs)
        .values(&row)
        .execute(conn)
        .context("Failed to insert taxable transaction")?;
    Ok(())
}

pub fn upsert_failed_block(conn: &mut PgConnection, chain_pk: i32, height_val: i64) -> Result<()> {
    use crate::db::models::NewFailedBlock;
    use diesel::insert_into;
    use schema::failed_blocks::dsl::*;

    // DB INSERT!
    insert_into(failed_blocks)
        .values(&NewFailedBlock {
            height: height_val,
            blockchain_id: chain_pk,
        })
        .on_conflict((blockchain_id, height))
        .do_nothing()
        .execute(conn)
        .with_context(|| format!("Failed to record failed block {}", height_val))?;
    Ok(())
}

pub fn is_failed_block(conn: &mut PgConnection, chain_pk: i32, height_val: i64) -> Result<bool> {
    use diesel::dsl::exists;
    use diesel::select;
    use schema::failed_blocks::dsl::*;

    // DB QUERY!
    select(exists(
        failed_blocks
            .filter(blockchain_id.eq(chain_pk))
            .filter(height.eq(height_val)),
    ))
    .get_result(conn)
    .context("Failed to query failed blocks")
}

/// Store rows for block events, skipping hashes already present.
pub fn insert_taxable_events(conn: &mut PgConnection, rows: &[NewTaxableEvent]) -> Result<usize> {
    use diesel::insert_into;
    use schema::taxable_events::dsl::*;

    // DB INSERT!
    insert_into(taxable_events)
        .values(rows)
        .on_conflict(event_hash)
        .do_nothing()
        .execute(conn)
        .context("Failed to insert taxable events")
}

/// Record an epoch boundary. Known epochs keep their indexed flag.
pub fn upsert_epoch(
    conn: &mut PgConnection,
    chain_pk: i32,
    identifier_val: &str,
    epoch_number_val: i64,
    start_height_val: i64,
) -> Result<()> {
    use crate::db::models::NewEpoch;
    use diesel::insert_into;
    use schema::epochs::dsl::*;

    // DB INSERT!
    insert_into(epochs)
        .values(&NewEpoch {
            blockchain_id: chain_pk,
            identifier: identifier_val,
            epoch_number: epoch_number_val,
            start_height: start_height_val,
        })
        .on_conflict((blockchain_id, identifier, epoch_number))
        .do_nothing()
        .execute(conn)
        .with_context(|| format!("Failed to record {} epoch {}", identifier_val, epoch_number_val))?;
    Ok(())
}

/// Recorded epochs in `[first, last]` whose events are not indexed yet, oldest first.
/// A negative `last` means no upper bound.
pub fn unindexed_epochs(
    conn: &mut PgConnection,
    chain_pk: i32,
    identifier_val: &str,
    first: i64,
    last: i64,
) -> Result<Vec<Epoch>> {
    use schema::epochs::dsl::*;

    let mut query = epochs
        .filter(blockchain_id.eq(chain_pk))
        .filter(identifier.eq(identifier_val))
        .filter(block_events_indexed.eq(false))
        .filter(epoch_number.ge(first))
        .into_boxed();
    if last >= 0 {
        query = query.filter(epoch_number.le(last));
    }

    // DB QUERY!
    query
        .order(epoch_number.asc())
        .select(Epoch::as_select())
        .load(conn)
        .context("Failed to query epochs")
}

pub fn latest_epoch(conn: &mut PgConnection, chain_pk: i32, identifier_val: &str) -> Result<Option<Epoch>> {
    use schema::epochs::dsl::*;

    // DB QUERY!
    epochs
        .filter(blockchain_id.eq(chain_pk))
        .filter(identifier.eq(identifier_val))
        .order(epoch_number.desc())
        .select(Epoch::as_select())
        .first(conn)
        .optional()
        .context("Failed to query latest epoch")
}

pub fn mark_epoch_indexed(conn: &mut PgConnection, epoch_pk: i32) -> Result<()> {
    use diesel::update;
    use schema::epochs::dsl::*;

    // DB UPDATE!
    update(epochs.filter(id.eq(epoch_pk)))
        .set(block_events_indexed.eq(true))
        .execute(conn)
        .context("Failed to mark epoch as indexed")?;
    Ok(())
}

/// All denom rows with their units and aliases.
pub fn load_denoms(conn: &mut PgConnection) -> Result<(Vec<Denom>, Vec<DenomUnit>, Vec<DenomUnitAlias>)> {
    use schema::{denom_unit_aliases, denom_units, denoms};

    // DB QUERY!
    let denom_rows = denoms::table
        .select(Denom::as_select())
        .load(conn)
        .context("Failed to load denoms")?;
    let unit_rows = denom_units::table
        .select(DenomUnit::as_select())
        .load(conn)
        .context("Failed to load denom units")?;
    let alias_rows = denom_unit_aliases::table
        .select(DenomUnitAlias::as_select())
        .load(conn)
        .context("Failed to load denom unit aliases")?;
    Ok((denom_rows, unit_rows, alias_rows))
}

/// Denom row for `base`, inserting a placeholder with no name or symbol when missing.
pub fn get_or_create_denom(conn: &mut PgConnection, base_val: &str) -> Result<Denom> {
    use crate::db::models::NewDenom;
    use diesel::insert_into;
    use schema::denoms::dsl::*;

    // DB INSERT!
    let inserted = insert_into(denoms)
        .values(&NewDenom {
            base: base_val,
            name: None,
            symbol: None,
        })
        .on_conflict(base)
        .do_nothing()
        .returning(Denom::as_returning())
        .get_result(conn)
        .optional()
        .with_context(|| format!("Failed to insert denom {}", base_val))?;
    if let Some(denom) = inserted {
        return Ok(denom);
    }

    // DB QUERY!
    denoms
        .filter(base.eq(base_val))
        .select(Denom::as_select())
        .first(conn)
        .with_context(|| format!("Failed to query denom {}", base_val))
}

/// Write asset-list entries: denoms by base, units by name, aliases by value.
/// Returns the number of denoms written.
pub fn upsert_denoms(conn: &mut PgConnection, assets: &[&Asset]) -> Result<usize> {
    use crate::db::models::{NewDenom, NewDenomUnit, NewDenomUnitAlias};
    use diesel::insert_into;
    use diesel::upsert::excluded;
    use schema::{denom_unit_aliases, denom_units, denoms};

    let non_empty = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };

    conn.transaction(|tx_conn| {
        for asset in assets {
            let name = non_empty(&asset.name);
            let symbol = non_empty(&asset.symbol);

            // DB INSERT!
            let denom_pk: i32 = insert_into(denoms::table)
                .values(&NewDenom {
                    base: &asset.base,
                    name: name.as_deref(),
                    symbol: symbol.as_deref(),
                })
                .on_conflict(denoms::base)
                .do_update()
                .set((
                    denoms::name.eq(excluded(denoms::name)),
                    denoms::symbol.eq(excluded(denoms::symbol)),
                ))
                .returning(denoms::id)
                .get_result(tx_conn)
                .with_context(|| format!("Failed to upsert denom {}", asset.base))?;

            for unit in &asset.denom_units {
                let exponent = i32::try_from(unit.exponent)
                    .with_context(|| format!("Exponent of {} out of range", unit.denom))?;

                // DB INSERT!
                let unit_pk: i32 = insert_into(denom_units::table)
                    .values(&NewDenomUnit {
                        denom_id: denom_pk,
                        exponent,
                        name: &unit.denom,
                    })
                    .on_conflict(denom_units::name)
                    .do_update()
                    .set(denom_units::exponent.eq(excluded(denom_units::exponent)))
                    .returning(denom_units::id)
                    .get_result(tx_conn)
                    .with_context(|| format!("Failed to upsert denom unit {}", unit.denom))?;

                for alias in &unit.aliases {
                    // DB INSERT!
                    insert_into(denom_unit_aliases::table)
                        .values(&NewDenomUnitAlias {
                            denom_unit_id: unit_pk,
                            alias,
                        })
                        .on_conflict(denom_unit_aliases::alias)
                        .do_nothing()
                        .execute(tx_conn)
                        .with_context(|| format!("Failed to upsert alias {}", alias))?;
                }
            }
        }
        Ok::<usize, anyhow::Error>(assets.len())
    })
}

const EXPORT_MOVEMENTS_SQL: &str = "\
SELECT b.time_stamp, b.height, t.hash, mt.message_type, tt.amount_sent, tt.amount_received, \
       ds.base AS denom_sent, dr.base AS denom_received, sa.address AS sender, ra.address AS receiver \
FROM taxable_txs tt \
JOIN messages m ON m.id = tt.message_id \
JOIN message_types mt ON mt.id = m.message_type_id \
JOIN txes t ON t.id = m.tx_id \
JOIN blocks b ON b.id = t.block_id \
LEFT JOIN denoms ds ON ds.id = tt.denomination_sent_id \
LEFT JOIN denoms dr ON dr.id = tt.denomination_received_id \
LEFT JOIN addresses sa ON sa.id = tt.sender_address_id \
LEFT JOIN addresses ra ON ra.id = tt.receiver_address_id \
WHERE (sa.address = $1 OR ra.address = $1) AND b.time_stamp >= $2 AND b.time_stamp < $3 \
ORDER BY b.time_stamp ASC, t.hash ASC, m.message_index ASC, tt.id ASC";

const EXPORT_EVENTS_SQL: &str = "\
SELECT b.time_stamp, b.height, te.source, te.amount, d.base AS denom, a.address \
FROM taxable_events te \
JOIN blocks b ON b.id = te.block_id \
JOIN denoms d ON d.id = te.denomination_id \
JOIN addresses a ON a.id = te.address_id \
WHERE a.address = $1 AND b.time_stamp >= $2 AND b.time_stamp < $3 \
ORDER BY b.time_stamp ASC, te.event_hash ASC";

const EXPORT_FEES_SQL: &str = "\
SELECT b.time_stamp, b.height, t.hash, f.amount, d.base AS denom, a.address AS payer \
FROM fees f \
JOIN txes t ON t.id = f.tx_id \
JOIN blocks b ON b.id = t.block_id \
JOIN denoms d ON d.id = f.denomination_id \
JOIN addresses a ON a.id = f.payer_address_id \
WHERE a.address = $1 AND b.time_stamp >= $2 AND b.time_stamp < $3 \
ORDER BY b.time_stamp ASC, t.hash ASC, f.id ASC";

/// Taxable transactions, block events and fees touching `address` in `[start, end)`.
pub fn export_rows(
    conn: &mut PgConnection,
    address_val: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<(Vec<models::MovementRow>, Vec<models::EventRow>, Vec<models::FeeRow>)> {
    use diesel::sql_query;
    use diesel::sql_types::{Text, Timestamp};

    let address_val = address_val.to_lowercase();

    // DB QUERY!
    let movements = sql_query(EXPORT_MOVEMENTS_SQL)
        .bind::<Text, _>(&address_val)
        .bind::<Timestamp, _>(start)
        .bind::<Timestamp, _>(end)
        .load(conn)
        .context("Failed to export taxable transactions")?;
    let events = sql_query(EXPORT_EVENTS_SQL)
        .bind::<Text, _>(&address_val)
        .bind::<Timestamp, _>(start)
        .bind::<Timestamp, _>(end)
        .load(conn)
        .context("Failed to export taxable events")?;
    let fee_rows = sql_query(EXPORT_FEES_SQL)
        .bind::<Text, _>(&address_val)
        .bind::<Timestamp, _>(start)
        .bind::<Timestamp, _>(end)
        .load(conn)
        .context("Failed to export fees")?;
    Ok((movements, events, fee_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_events::{persist_block_events, BlockEventRecord, EventSource};
    use chrono::NaiveDate;
    use testcontainers::{clients::Cli, images::postgres::Postgres};

    fn database_url(node: &testcontainers::Container<'_, Postgres>) -> String {
        format!(
            "postgres://postgres@127.0.0.1:{}/postgres",
            node.get_host_port_ipv4(5432)
        )
    }

    fn connect(docker: &Cli) -> (testcontainers::Container<'_, Postgres>, PgConnection) {
        let node = docker.run(Postgres::default());
        let mut conn = PgConnection::establish(&database_url(&node)).expect("connect to postgres");
        run_migrations(&mut conn).expect("migrations");
        (node, conn)
    }

    fn chain() -> ChainIdentity {
        ChainIdentity {
            chain_id: "osmosis-1".to_string(),
            name: "osmosis".to_string(),
        }
    }

    fn time(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid date")
    }

    fn block(height: i64) -> BlockRecord {
        let coin = Coin::new(BigDecimal::from(1_000), "uosmo");
        BlockRecord {
            height,
            time: time(1),
            txs: vec![TxRecord {
                hash: format!("HASH{}", height),
                code: 0,
                signer: Some("OSMO1SIGNER".to_string()),
                fees: vec![
                    FeeRecord {
                        payer: "osmo1signer".to_string(),
                        coin: Coin::new(BigDecimal::from(250), "uosmo"),
                    },
                    FeeRecord {
                        payer: "osmo1signer".to_string(),
                        coin: Coin::new(BigDecimal::zero(), "uion"),
                    },
                ],
                messages: vec![
                    MessageRecord {
                        index: 0,
                        type_url: "/cosmos.bank.v1beta1.MsgSend".to_string(),
                        movements: vec![Movement::transfer("osmo1signer", "osmo1other", &coin)],
                    },
                    MessageRecord {
                        index: 1,
                        type_url: "/unknown.v1.MsgNothing".to_string(),
                        movements: vec![],
                    },
                ],
            }],
        }
    }

    macro_rules! count {
        ($conn:expr, $table:path) => {
            $table.count().get_result::<i64>($conn).expect("count")
        };
    }

    #[test]
    #[ignore = "needs docker"]
    fn block_is_stored_once_and_reindexed_in_place() {
        let docker = Cli::default();
        let (_node, mut conn) = connect(&docker);
        let denoms = DenomRegistry::new();

        let outcome = store_block(&mut conn, &denoms, &chain(), &block(10), false).unwrap();
        assert_eq!(outcome, StoreOutcome::Stored { txs: 1, movements: 1 });
        assert_eq!(
            store_block(&mut conn, &denoms, &chain(), &block(10), false).unwrap(),
            StoreOutcome::AlreadyIndexed
        );

        // zero fee coins are skipped
        assert_eq!(count!(&mut conn, schema::fees::table), 1);
        assert_eq!(count!(&mut conn, schema::messages::table), 2);
        assert_eq!(count!(&mut conn, schema::taxable_txs::table), 1);

        store_block(&mut conn, &denoms, &chain(), &block(10), true).unwrap();
        assert_eq!(count!(&mut conn, schema::fees::table), 1);
        assert_eq!(count!(&mut conn, schema::messages::table), 2);
        assert_eq!(count!(&mut conn, schema::taxable_txs::table), 1);

        let chain_pk = get_or_create_chain(&mut conn, "osmosis-1", "osmosis").unwrap();
        assert_eq!(highest_indexed_height(&mut conn, chain_pk).unwrap(), Some(10));

        let stored: Vec<String> = schema::addresses::table
            .select(schema::addresses::address)
            .order(schema::addresses::address.asc())
            .load(&mut conn)
            .unwrap();
        assert_eq!(stored, vec!["osmo1other".to_string(), "osmo1signer".to_string()]);
    }

    #[test]
    #[ignore = "needs docker"]
    fn concurrent_workers_share_new_rows() {
        use std::sync::{Arc, Barrier};

        let docker = Cli::default();
        let (node, _conn) = connect(&docker);
        let url = database_url(&node);
        let barrier = Arc::new(Barrier::new(2));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let url = url.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut conn = PgConnection::establish(&url).expect("connect to postgres");
                    conn.transaction(|tx_conn| {
                        barrier.wait();
                        let chain_pk = get_or_create_chain(tx_conn, "race-1", "race")?;
                        let address_pk = get_or_create_address(tx_conn, "osmo1shared")?;
                        let type_pk = get_or_create_message_type(tx_conn, "/cosmos.bank.v1beta1.MsgSend")?;
                        Ok::<_, anyhow::Error>((chain_pk, address_pk, type_pk))
                    })
                })
            })
            .collect();

        let results: Vec<_> = workers
            .into_iter()
            .map(|w| w.join().expect("worker thread").expect("worker transaction"))
            .collect();
        assert_eq!(results[0], results[1]);

        let mut conn = PgConnection::establish(&url).expect("connect to postgres");
        assert_eq!(count!(&mut conn, schema::chains::table), 1);
        assert_eq!(count!(&mut conn, schema::addresses::table), 1);
        assert_eq!(count!(&mut conn, schema::message_types::table), 1);
    }

    #[test]
    #[ignore = "needs docker"]
    fn block_events_are_deduplicated_by_hash() {
        let docker = Cli::default();
        let (_node, mut conn) = connect(&docker);
        let denoms = DenomRegistry::new();
        let chain_pk = get_or_create_chain(&mut conn, "osmosis-1", "osmosis").unwrap();
        let block_row = get_or_create_block(&mut conn, chain_pk, 20, time(2)).unwrap();

        let records = vec![BlockEventRecord {
            source: EventSource::OsmosisRewardDistribution,
            address: "osmo1r".to_string(),
            coin: Coin::new(BigDecimal::from(5), "uosmo"),
        }];
        assert_eq!(persist_block_events(&mut conn, &denoms, block_row.id, 20, &records).unwrap(), 1);
        assert_eq!(persist_block_events(&mut conn, &denoms, block_row.id, 20, &records).unwrap(), 0);
        assert_eq!(count!(&mut conn, schema::taxable_events::table), 1);
    }

    #[test]
    #[ignore = "needs docker"]
    fn failed_blocks_and_epochs() {
        let docker = Cli::default();
        let (_node, mut conn) = connect(&docker);
        let chain_pk = get_or_create_chain(&mut conn, "osmosis-1", "osmosis").unwrap();

        upsert_failed_block(&mut conn, chain_pk, 7).unwrap();
        upsert_failed_block(&mut conn, chain_pk, 7).unwrap();
        assert!(is_failed_block(&mut conn, chain_pk, 7).unwrap());
        assert!(!is_failed_block(&mut conn, chain_pk, 8).unwrap());

        upsert_epoch(&mut conn, chain_pk, "day", 1, 100).unwrap();
        upsert_epoch(&mut conn, chain_pk, "day", 2, 200).unwrap();
        let pending = unindexed_epochs(&mut conn, chain_pk, "day", 0, -1).unwrap();
        assert_eq!(pending.len(), 2);
        mark_epoch_indexed(&mut conn, pending[0].id).unwrap();
        let pending = unindexed_epochs(&mut conn, chain_pk, "day", 0, -1).unwrap();
        assert_eq!(pending[0].start_height, 200);
        assert_eq!(latest_epoch(&mut conn, chain_pk, "day").unwrap().map(|e| e.epoch_number), Some(2));
    }

    #[test]
    #[ignore = "needs docker"]
    fn export_matches_sender_receiver_and_payer() {
        let docker = Cli::default();
        let (_node, mut conn) = connect(&docker);
        let denoms = DenomRegistry::new();
        store_block(&mut conn, &denoms, &chain(), &block(30), false).unwrap();

        let (movements, events, fee_rows) =
            export_rows(&mut conn, "OSMO1SIGNER", time(1), time(2)).unwrap();
        assert_eq!(movements.len(), 1);
        assert!(events.is_empty());
        assert_eq!(fee_rows.len(), 1);
        assert_eq!(fee_rows[0].amount, BigDecimal::from(250));

        let (movements, _, fee_rows) = export_rows(&mut conn, "osmo1other", time(1), time(2)).unwrap();
        assert_eq!(movements.len(), 1);
        assert!(fee_rows.is_empty());

        let (movements, _, _) = export_rows(&mut conn, "osmo1other", time(2), time(3)).unwrap();
        assert!(movements.is_empty());
    }
}
