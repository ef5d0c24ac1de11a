use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::PgConnection;
use serde::Serialize;

use crate::block_events::EventSource;
use crate::db::{self, models::{EventRow, FeeRow, MovementRow}};
use crate::denoms::DenomRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Transaction,
    Event,
    Fee,
}

/// Raw amount in its base denom, with the display value next to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportAmount {
    pub amount: BigDecimal,
    pub denom: String,
    pub value: BigDecimal,
    pub symbol: String,
}

/// One line of an address's tax history, ready for a CSV renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub kind: RowKind,
    pub time: NaiveDateTime,
    pub height: i64,
    /// Transaction hash; empty for block events.
    pub tx_hash: String,
    /// Message type URL, event source name, or "fee".
    pub label: String,
    pub sent: Option<ExportAmount>,
    pub received: Option<ExportAmount>,
    pub sender: Option<String>,
    pub receiver: Option<String>,
}

/// All taxable rows for `address` with `start <= block time < end`, oldest first.
pub fn export(
    conn: &mut PgConnection,
    denoms: &DenomRegistry,
    address: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<ExportRow>> {
    let (movements, events, fees) = db::export_rows(conn, address, start, end)
        .with_context(|| format!("Failed to export rows for {}", address))?;
    Ok(build_rows(denoms, &movements, &events, &fees))
}

pub fn build_rows(
    denoms: &DenomRegistry,
    movements: &[MovementRow],
    events: &[EventRow],
    fees: &[FeeRow],
) -> Vec<ExportRow> {
    let mut rows = Vec::with_capacity(movements.len() + events.len() + fees.len());
    rows.extend(movements.iter().map(|m| movement_row(denoms, m)));
    rows.extend(events.iter().map(|e| event_row(denoms, e)));
    rows.extend(fees.iter().map(|f| fee_row(denoms, f)));
    // stable, so each kind keeps its query order within a timestamp
    rows.sort_by_key(|row| row.time);
    rows
}

fn amount(denoms: &DenomRegistry, amount: &BigDecimal, denom: Option<&str>) -> Option<ExportAmount> {
    let denom = denom.filter(|d| !d.is_empty())?;
    let (value, symbol) = denoms.convert_or_raw(amount, denom);
    Some(ExportAmount {
        amount: amount.clone(),
        denom: denom.to_string(),
        value,
        symbol,
    })
}

fn movement_row(denoms: &DenomRegistry, row: &MovementRow) -> ExportRow {
    ExportRow {
        kind: RowKind::Transaction,
        time: row.time_stamp,
        height: row.height,
        tx_hash: row.hash.clone(),
        label: row.message_type.clone(),
        sent: amount(denoms, &row.amount_sent, row.denom_sent.as_deref()),
        received: amount(denoms, &row.amount_received, row.denom_received.as_deref()),
        sender: row.sender.clone(),
        receiver: row.receiver.clone(),
    }
}

fn event_row(denoms: &DenomRegistry, row: &EventRow) -> ExportRow {
    let source = EventSource::from_code(row.source);
    let coin = amount(denoms, &row.amount, Some(&row.denom));
    let outflow = source.is_some_and(EventSource::is_outflow);
    ExportRow {
        kind: RowKind::Event,
        time: row.time_stamp,
        height: row.height,
        tx_hash: String::new(),
        label: source.map_or_else(|| format!("source {}", row.source), |s| format!("{:?}", s)),
        sent: if outflow { coin.clone() } else { None },
        received: if outflow { None } else { coin },
        sender: outflow.then(|| row.address.clone()),
        receiver: (!outflow).then(|| row.address.clone()),
    }
}

fn fee_row(denoms: &DenomRegistry, row: &FeeRow) -> ExportRow {
    ExportRow {
        kind: RowKind::Fee,
        time: row.time_stamp,
        height: row.height,
        tx_hash: row.hash.clone(),
        label: "fee".to_string(),
        sent: amount(denoms, &row.amount, Some(&row.denom)),
        received: None,
        sender: Some(row.payer.clone()),
        receiver: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoms::{Asset, AssetDenomUnit};
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Arc;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn denoms() -> DenomRegistry {
        let registry = DenomRegistry::new();
        let osmo = Asset {
            base: "uosmo".into(),
            symbol: "OSMO".into(),
            denom_units: vec![
                AssetDenomUnit { denom: "uosmo".into(), exponent: 0, aliases: vec![] },
                AssetDenomUnit { denom: "osmo".into(), exponent: 6, aliases: vec![] },
            ],
            ..Default::default()
        };
        let mut assets = HashMap::new();
        assets.insert(osmo.base.clone(), osmo);
        registry.replace_assets(Arc::new(assets));
        registry
    }

    fn swap_row() -> MovementRow {
        MovementRow {
            time_stamp: at(3),
            height: 30,
            hash: "TX3".into(),
            message_type: "/osmosis.gamm.v1beta1.MsgSwapExactAmountIn".into(),
            amount_sent: BigDecimal::from(2_500_000),
            amount_received: BigDecimal::from(7),
            denom_sent: Some("uosmo".into()),
            denom_received: Some("ibc/ABC".into()),
            sender: Some("osmo1me".into()),
            receiver: Some("osmo1me".into()),
        }
    }

    #[test]
    fn converts_known_denoms_and_keeps_raw_unknown() {
        let rows = build_rows(&denoms(), &[swap_row()], &[], &[]);
        let sent = rows[0].sent.as_ref().unwrap();
        assert_eq!(sent.value, BigDecimal::from_str("2.5").unwrap());
        assert_eq!(sent.symbol, "OSMO");
        assert_eq!(sent.amount, BigDecimal::from(2_500_000));

        let received = rows[0].received.as_ref().unwrap();
        assert_eq!(received.value, BigDecimal::from(7));
        assert_eq!(received.symbol, "ibc/ABC");
    }

    #[test]
    fn rows_merge_in_time_order() {
        let event = EventRow {
            time_stamp: at(1),
            height: 10,
            source: EventSource::OsmosisRewardDistribution.code(),
            amount: BigDecimal::from(100),
            denom: "uosmo".into(),
            address: "osmo1me".into(),
        };
        let fee = FeeRow {
            time_stamp: at(2),
            height: 20,
            hash: "TX2".into(),
            amount: BigDecimal::from(5000),
            denom: "uosmo".into(),
            payer: "osmo1me".into(),
        };
        let rows = build_rows(&denoms(), &[swap_row()], &[event], &[fee]);
        let kinds: Vec<RowKind> = rows.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RowKind::Event, RowKind::Fee, RowKind::Transaction]);

        assert_eq!(rows[0].receiver.as_deref(), Some("osmo1me"));
        assert!(rows[0].sent.is_none());
        assert_eq!(rows[1].sender.as_deref(), Some("osmo1me"));
        assert_eq!(rows[1].label, "fee");
    }

    #[test]
    fn outflow_events_are_sent() {
        let event = EventRow {
            time_stamp: at(1),
            height: 10,
            source: EventSource::LiquiditySwapCoinSent.code(),
            amount: BigDecimal::from(100),
            denom: "uatom".into(),
            address: "cosmos1me".into(),
        };
        let rows = build_rows(&DenomRegistry::new(), &[], &[event], &[]);
        assert_eq!(rows[0].sender.as_deref(), Some("cosmos1me"));
        assert!(rows[0].received.is_none());
        assert_eq!(rows[0].label, "LiquiditySwapCoinSent");
    }
}
