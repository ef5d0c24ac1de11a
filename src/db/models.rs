use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;

use super::schema::{
    addresses, blocks, chains, denom_unit_aliases, denom_units, denoms, epochs, failed_blocks,
    fees, message_types, messages, taxable_events, taxable_txs, txes,
};

// Model for inserting into the 'chains' table
#[derive(Insertable)]
#[diesel(table_name = chains)]
pub struct NewChain<'a> {
    pub chain_id: &'a str,
    pub name: &'a str,
}

// Model for inserting into the 'blocks' table
#[derive(Insertable)]
#[diesel(table_name = blocks)]
pub struct NewBlock {
    pub height: i64,
    pub time_stamp: NaiveDateTime,
    pub blockchain_id: i32,
}

// Model for querying 'blocks' table
#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = blocks)]
pub struct Block {
    pub id: i32,
    pub height: i64,
    pub time_stamp: NaiveDateTime,
    pub blockchain_id: i32,
    pub tx_indexed: bool,
    pub block_events_indexed: bool,
}

// Model for inserting into the 'failed_blocks' table
#[derive(Insertable)]
#[diesel(table_name = failed_blocks)]
pub struct NewFailedBlock {
    pub height: i64,
    pub blockchain_id: i32,
}

// Model for inserting into the 'addresses' table
#[derive(Insertable)]
#[diesel(table_name = addresses)]
pub struct NewAddress<'a> {
    pub address: &'a str,
}

// Model for inserting into the 'denoms' table.
// name and symbol stay empty for placeholders until the asset list is upserted
#[derive(Insertable)]
#[diesel(table_name = denoms)]
pub struct NewDenom<'a> {
    pub base: &'a str,
    pub name: Option<&'a str>,
    pub symbol: Option<&'a str>,
}

// Model for querying 'denoms' table
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = denoms)]
pub struct Denom {
    pub id: i32,
    pub base: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

// Model for inserting into the 'denom_units' table
#[derive(Insertable)]
#[diesel(table_name = denom_units)]
pub struct NewDenomUnit<'a> {
    pub denom_id: i32,
    pub exponent: i32,
    pub name: &'a str,
}

// Model for querying 'denom_units' table
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = denom_units)]
pub struct DenomUnit {
    pub id: i32,
    pub denom_id: i32,
    pub exponent: i32,
    pub name: String,
}

// Model for inserting into the 'denom_unit_aliases' table
#[derive(Insertable)]
#[diesel(table_name = denom_unit_aliases)]
pub struct NewDenomUnitAlias<'a> {
    pub denom_unit_id: i32,
    pub alias: &'a str,
}

// Model for querying 'denom_unit_aliases' table
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = denom_unit_aliases)]
pub struct DenomUnitAlias {
    pub id: i32,
    pub denom_unit_id: i32,
    pub alias: String,
}

// Model for inserting into the 'txes' table
#[derive(Insertable)]
#[diesel(table_name = txes)]
pub struct NewTx<'a> {
    pub hash: &'a str,
    pub code: i64,
    pub block_id: i32,
    pub signer_address_id: Option<i32>,
}

// Model for inserting into the 'fees' table
#[derive(Insertable)]
#[diesel(table_name = fees)]
pub struct NewFee {
    pub tx_id: i32,
    pub amount: BigDecimal, // NUMERIC(78,0)
    pub denomination_id: i32,
    pub payer_address_id: i32,
}

// Model for inserting into the 'message_types' table
#[derive(Insertable)]
#[diesel(table_name = message_types)]
pub struct NewMessageType<'a> {
    pub message_type: &'a str,
}

// Model for inserting into the 'messages' table
#[derive(Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub tx_id: i32,
    pub message_type_id: i32,
    pub message_index: i32,
}

// Model for inserting into the 'taxable_txs' table
#[derive(Insertable)]
#[diesel(table_name = taxable_txs)]
pub struct NewTaxableTx {
    pub message_id: i32,
    pub amount_sent: BigDecimal,
    pub amount_received: BigDecimal,
    pub denomination_sent_id: Option<i32>,
    pub denomination_received_id: Option<i32>,
    pub sender_address_id: Option<i32>,
    pub receiver_address_id: Option<i32>,
}

// Model for inserting into the 'taxable_events' table
#[derive(Insertable, Debug)]
#[diesel(table_name = taxable_events)]
pub struct NewTaxableEvent {
    pub source: i32,
    pub amount: BigDecimal,
    pub denomination_id: i32,
    pub address_id: i32,
    pub event_hash: String,
    pub block_id: i32,
}

// Model for inserting into the 'epochs' table
#[derive(Insertable)]
#[diesel(table_name = epochs)]
pub struct NewEpoch<'a> {
    pub blockchain_id: i32,
    pub identifier: &'a str,
    pub epoch_number: i64,
    pub start_height: i64,
}

// Model for querying 'epochs' table
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = epochs)]
pub struct Epoch {
    pub id: i32,
    pub blockchain_id: i32,
    pub identifier: String,
    pub epoch_number: i64,
    pub start_height: i64,
    pub block_events_indexed: bool,
}

// Export rows, loaded with raw SQL joins
#[derive(QueryableByName, Debug, Clone)]
pub struct MovementRow {
    #[diesel(sql_type = diesel::sql_types::Timestamp)]
    pub time_stamp: NaiveDateTime,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub height: i64,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub hash: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub message_type: String,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub amount_sent: BigDecimal,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub amount_received: BigDecimal,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub denom_sent: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub denom_received: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub sender: Option<String>,
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub receiver: Option<String>,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct EventRow {
    #[diesel(sql_type = diesel::sql_types::Timestamp)]
    pub time_stamp: NaiveDateTime,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub height: i64,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    pub source: i32,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub amount: BigDecimal,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub denom: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub address: String,
}

#[derive(QueryableByName, Debug, Clone)]
pub struct FeeRow {
    #[diesel(sql_type = diesel::sql_types::Timestamp)]
    pub time_stamp: NaiveDateTime,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    pub height: i64,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub hash: String,
    #[diesel(sql_type = diesel::sql_types::Numeric)]
    pub amount: BigDecimal,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub denom: String,
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub payer: String,
}
