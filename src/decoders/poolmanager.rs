//! Osmosis pool manager swaps. Every variant reduces to one swap by the sender.

use std::fmt;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

use super::{body, id_string, require_action, require_log, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{parse_amount, parse_coin, Coin, JsonCoin};
use crate::error::DecodeError;
use crate::events::{attr_first, attr_last, event_of_type, events_of_type, parse_transfer_event};
use crate::rpc_client::types::{Event, LogEntry};

pub const MSG_SWAP_EXACT_AMOUNT_IN: &str = "/osmosis.poolmanager.v1beta1.MsgSwapExactAmountIn";
pub const MSG_SWAP_EXACT_AMOUNT_OUT: &str = "/osmosis.poolmanager.v1beta1.MsgSwapExactAmountOut";
pub const MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_IN: &str =
    "/osmosis.poolmanager.v1beta1.MsgSplitRouteSwapExactAmountIn";
pub const MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_OUT: &str =
    "/osmosis.poolmanager.v1beta1.MsgSplitRouteSwapExactAmountOut";

/// Transfer events inspected from the end of the log before giving up.
const TRANSFER_LOOKBACK: usize = 2;

type Parse = fn(&str, &Value, Option<&LogEntry>) -> Result<Option<Swap>, DecodeError>;

pub fn register(registry: &mut MessageRegistry) {
    let variants: [(&'static str, Parse); 4] = [
        (MSG_SWAP_EXACT_AMOUNT_IN, swap_exact_amount_in),
        (MSG_SWAP_EXACT_AMOUNT_OUT, swap_exact_amount_out),
        (MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_IN, split_route_in),
        (MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_OUT, split_route_out),
    ];
    for (type_url, parse) in variants {
        registry.register_fn(type_url, move || RoutedSwap::new(type_url, parse));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swap {
    pub address: String,
    pub token_in: Coin,
    pub token_out: Coin,
}

/// A pool manager message. Split routes with nothing to route decode to no swap.
pub struct RoutedSwap {
    type_url: &'static str,
    parse: Parse,
    swap: Option<Swap>,
}

impl RoutedSwap {
    pub fn new(type_url: &'static str, parse: Parse) -> Self {
        RoutedSwap {
            type_url,
            parse,
            swap: None,
        }
    }
}

impl MessageDecoder for RoutedSwap {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        self.swap = (self.parse)(type_url, msg, log)?;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.swap
            .iter()
            .map(|s| Movement::swap(&s.address, &s.token_in, &s.token_out))
            .collect()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for RoutedSwap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = super::short_name(self.type_url);
        match &self.swap {
            Some(s) => write!(f, "{}: {} swapped {} for {}", name, s.address, s.token_in, s.token_out),
            None => write!(f, "{}: no route", name),
        }
    }
}

#[derive(Deserialize)]
struct InRoute {
    #[serde(default, deserialize_with = "id_string")]
    pool_id: String,
    #[serde(default)]
    token_out_denom: String,
}

#[derive(Deserialize)]
struct SwapInBody {
    sender: String,
    #[serde(default)]
    routes: Vec<InRoute>,
    token_in: JsonCoin,
}

fn swap_exact_amount_in(type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<Option<Swap>, DecodeError> {
    let entry = require_action(type_url, log)?;
    let parsed: SwapInBody = body(msg)?;
    let token_in = Coin::try_from(&parsed.token_in)?;
    let last_route = parsed
        .routes
        .last()
        .ok_or_else(|| DecodeError::log_format(type_url, "no routes"))?;

    if let Some(swapped) = events_of_type(entry, "token_swapped").last() {
        let out = attr_last(swapped, "tokens_out");
        if !out.is_empty() {
            let coin = parse_coin(out)?;
            if coin.denom == last_route.token_out_denom && attr_last(swapped, "pool_id") == last_route.pool_id {
                return Ok(Some(Swap {
                    address: parsed.sender,
                    token_in,
                    token_out: coin,
                }));
            }
        }
    }

    let transfers = events_of_type(entry, "transfer");
    for (index, event) in transfers.iter().enumerate().rev().take(TRANSFER_LOOKBACK) {
        let received = payout_to(event, &parsed.sender, &last_route.token_out_denom).map_err(|e| {
            DecodeError::log_format(type_url, format!("Last processed index {}: {}", index, e))
        })?;
        if let Some(token_out) = received {
            return Ok(Some(Swap {
                address: parsed.sender,
                token_in,
                token_out,
            }));
        }
    }
    Err(DecodeError::log_format(type_url, "no output found for the final route"))
}

/// The final transfer group of `event`, when it pays `denom` to `recipient`.
fn payout_to(event: &Event, recipient: &str, denom: &str) -> Result<Option<Coin>, DecodeError> {
    let Some(last) = parse_transfer_event(event)?.pop() else {
        return Ok(None);
    };
    if last.recipient != recipient {
        return Ok(None);
    }
    let coin = parse_coin(&last.amount)?;
    Ok((coin.denom == denom).then_some(coin))
}

#[derive(Deserialize)]
struct OutRoute {
    #[serde(default)]
    token_in_denom: String,
}

#[derive(Deserialize)]
struct SwapOutBody {
    sender: String,
    #[serde(default)]
    routes: Vec<OutRoute>,
    token_out: JsonCoin,
}

fn swap_exact_amount_out(type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<Option<Swap>, DecodeError> {
    let entry = require_log(type_url, log)?;
    let parsed: SwapOutBody = body(msg)?;

    let token_in = if let Some(swapped) = event_of_type(entry, "token_swapped") {
        parse_coin(attr_first(swapped, "tokens_in"))?
    } else if event_of_type(entry, "wasm").is_some() {
        contract_routed_input(type_url, entry, &parsed)?
    } else {
        return Err(DecodeError::log_format(type_url, "neither token_swapped nor wasm event"));
    };

    Ok(Some(Swap {
        token_out: Coin::try_from(&parsed.token_out)?,
        address: parsed.sender,
        token_in,
    }))
}

/// Swaps routed through a contract pool: the input is what the user paid the
/// contract less anything the contract refunded.
fn contract_routed_input(type_url: &str, entry: &LogEntry, parsed: &SwapOutBody) -> Result<Coin, DecodeError> {
    let first_denom = parsed
        .routes
        .first()
        .map(|r| r.token_in_denom.as_str())
        .ok_or_else(|| DecodeError::log_format(type_url, "no routes"))?;
    let contract = events_of_type(entry, "wasm")
        .into_iter()
        .rev()
        .map(|e| attr_last(e, "_contract_address"))
        .find(|a| !a.is_empty())
        .ok_or_else(|| DecodeError::log_format(type_url, "wasm event without contract address"))?;

    let mut paid = None;
    let mut refunded = None;
    for event in events_of_type(entry, "transfer") {
        for transfer in parse_transfer_event(event)? {
            let coin = parse_coin(&transfer.amount)?;
            if coin.denom != first_denom {
                continue;
            }
            if paid.is_none() && transfer.sender == parsed.sender && transfer.recipient == contract {
                paid = Some(coin);
            } else if refunded.is_none() && transfer.sender == contract && transfer.recipient == parsed.sender {
                refunded = Some(coin);
            }
        }
    }

    let paid = paid.ok_or_else(|| DecodeError::log_format(type_url, "no payment to the swap contract"))?;
    let refunded = refunded.map(|c| c.amount).unwrap_or_default();
    let net = &paid.amount - refunded;
    if net < BigDecimal::from(0) {
        return Err(DecodeError::log_format(type_url, "contract refunded more than it was paid"));
    }
    Ok(Coin::new(net, first_denom))
}

#[derive(Deserialize)]
struct SplitInPool {
    #[serde(default)]
    token_out_denom: String,
}

#[derive(Deserialize)]
struct SplitInRoute {
    #[serde(default)]
    pools: Vec<SplitInPool>,
    token_in_amount: String,
}

#[derive(Deserialize)]
struct SplitInBody {
    sender: String,
    #[serde(default)]
    routes: Vec<SplitInRoute>,
    token_in_denom: String,
}

fn split_route_in(type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<Option<Swap>, DecodeError> {
    let entry = require_log(type_url, log)?;
    let parsed: SplitInBody = body(msg)?;
    if parsed.routes.is_empty() {
        return Ok(None);
    }
    let denom_out = parsed
        .routes
        .iter()
        .find_map(|r| r.pools.last())
        .map(|p| p.token_out_denom.clone())
        .unwrap_or_default();
    if denom_out.is_empty() {
        return Ok(None);
    }

    let mut total_in = BigDecimal::from(0);
    for route in &parsed.routes {
        total_in += parse_amount(&route.token_in_amount)?;
    }
    let event = event_of_type(entry, "split_route_swap_exact_amount_in")
        .ok_or_else(|| DecodeError::log_format(type_url, "missing split route event"))?;
    let amount_out = parse_amount(attr_first(event, "tokens_out"))?;

    Ok(Some(Swap {
        address: parsed.sender,
        token_in: Coin::new(total_in, parsed.token_in_denom),
        token_out: Coin::new(amount_out, denom_out),
    }))
}

#[derive(Deserialize)]
struct SplitOutPool {
    #[serde(default)]
    token_in_denom: String,
}

#[derive(Deserialize)]
struct SplitOutRoute {
    #[serde(default)]
    pools: Vec<SplitOutPool>,
    token_out_amount: String,
}

#[derive(Deserialize)]
struct SplitOutBody {
    sender: String,
    #[serde(default)]
    routes: Vec<SplitOutRoute>,
    token_out_denom: String,
}

fn split_route_out(type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<Option<Swap>, DecodeError> {
    let entry = require_log(type_url, log)?;
    let parsed: SplitOutBody = body(msg)?;
    if parsed.routes.is_empty() {
        return Ok(None);
    }

    let mut denom_in: Option<&str> = None;
    let mut total_out = BigDecimal::from(0);
    for route in &parsed.routes {
        if let Some(first) = route.pools.first() {
            match denom_in {
                None => denom_in = Some(first.token_in_denom.as_str()),
                Some(d) if d != first.token_in_denom => {
                    return Err(DecodeError::log_format(type_url, "routes spend different input denoms"))
                }
                Some(_) => {}
            }
        }
        total_out += parse_amount(&route.token_out_amount)?;
    }
    let Some(denom_in) = denom_in.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    // The event names the input amount `tokens_out`.
    let event = event_of_type(entry, "split_route_swap_exact_amount_out")
        .ok_or_else(|| DecodeError::log_format(type_url, "missing split route event"))?;
    let amount_in = parse_amount(attr_first(event, "tokens_out"))?;

    Ok(Some(Swap {
        token_in: Coin::new(amount_in, denom_in),
        token_out: Coin::new(total_out, parsed.token_out_denom),
        address: parsed.sender,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use serde_json::json;

    fn decode(type_url: &'static str, parse: Parse, msg: Value, log: &LogEntry) -> Result<Vec<Movement>, DecodeError> {
        let mut decoder = RoutedSwap::new(type_url, parse);
        decoder.handle_msg(type_url, &msg, Some(log))?;
        Ok(decoder.parse_relevant_data())
    }

    fn swap_in_msg() -> Value {
        json!({
            "sender": "osmo1s",
            "routes": [{"pool_id": "1", "token_out_denom": "uion"}, {"pool_id": "9", "token_out_denom": "uatom"}],
            "token_in": {"denom": "uosmo", "amount": "100"},
            "token_out_min_amount": "1"
        })
    }

    #[test]
    fn swap_in_from_token_swapped() {
        let log = log_with_action(
            "/osmosis.poolmanager.v1beta1.MsgSwapExactAmountIn",
            vec![event(
                "token_swapped",
                &[("pool_id", "1"), ("tokens_out", "7uion"), ("pool_id", "9"), ("tokens_out", "3uatom")],
            )],
        );
        let rows = decode(MSG_SWAP_EXACT_AMOUNT_IN, swap_exact_amount_in, swap_in_msg(), &log).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(100)));
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(3)));
        assert_eq!(rows[0].denom_received.as_deref(), Some("uatom"));
    }

    #[test]
    fn swap_in_falls_back_to_transfers() {
        let log = log_with_action(
            "swap_exact_amount_in",
            vec![
                event("token_swapped", &[("pool_id", "9"), ("tokens_out", "1uion")]),
                event("transfer", &[("recipient", "osmo1s"), ("sender", "osmo1pool"), ("amount", "4uatom")]),
                event("transfer", &[("recipient", "osmo1fee"), ("sender", "osmo1s"), ("amount", "1uosmo")]),
            ],
        );
        let rows = decode(MSG_SWAP_EXACT_AMOUNT_IN, swap_exact_amount_in, swap_in_msg(), &log).unwrap();
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(4)));

        let nothing = log_with_action("swap_exact_amount_in", vec![]);
        assert!(decode(MSG_SWAP_EXACT_AMOUNT_IN, swap_exact_amount_in, swap_in_msg(), &nothing).is_err());
    }

    #[test]
    fn swap_out_through_contract_nets_refund() {
        let msg = json!({
            "sender": "osmo1s",
            "routes": [{"pool_id": "1", "token_in_denom": "uosmo"}],
            "token_out": {"denom": "uatom", "amount": "5"}
        });
        let log = log_with_action(
            "/osmosis.poolmanager.v1beta1.MsgSwapExactAmountOut",
            vec![
                event(
                    "transfer",
                    &[
                        ("recipient", "osmo1contract"), ("sender", "osmo1s"), ("amount", "100uosmo"),
                        ("recipient", "osmo1s"), ("sender", "osmo1contract"), ("amount", "5uatom"),
                        ("recipient", "osmo1s"), ("sender", "osmo1contract"), ("amount", "20uosmo"),
                    ],
                ),
                event("wasm", &[("_contract_address", "osmo1contract")]),
            ],
        );
        let rows = decode(MSG_SWAP_EXACT_AMOUNT_OUT, swap_exact_amount_out, msg, &log).unwrap();
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(80)));
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(5)));
    }

    #[test]
    fn split_route_in_sums_route_inputs() {
        let msg = json!({
            "sender": "osmo1s",
            "routes": [
                {"pools": [{"pool_id": "1", "token_out_denom": "uatom"}], "token_in_amount": "60"},
                {"pools": [{"pool_id": "2", "token_out_denom": "uion"}, {"pool_id": "3", "token_out_denom": "uatom"}], "token_in_amount": "40"}
            ],
            "token_in_denom": "uosmo",
            "token_out_min_amount": "1"
        });
        let log = log_with_action(
            "split_route_swap_exact_amount_in",
            vec![event("split_route_swap_exact_amount_in", &[("sender", "osmo1s"), ("tokens_out", "9")])],
        );
        let rows = decode(MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_IN, split_route_in, msg, &log).unwrap();
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(100)));
        assert_eq!(rows[0].denom_received.as_deref(), Some("uatom"));
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(9)));

        let empty = json!({"sender": "osmo1s", "routes": [], "token_in_denom": "uosmo"});
        assert!(decode(MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_IN, split_route_in, empty, &log)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn split_route_out_rejects_mixed_inputs() {
        let msg = json!({
            "sender": "osmo1s",
            "routes": [
                {"pools": [{"pool_id": "1", "token_in_denom": "uosmo"}], "token_out_amount": "3"},
                {"pools": [{"pool_id": "2", "token_in_denom": "uion"}], "token_out_amount": "4"}
            ],
            "token_out_denom": "uatom"
        });
        let log = log_with_action(
            "split_route_swap_exact_amount_out",
            vec![event("split_route_swap_exact_amount_out", &[("tokens_out", "50")])],
        );
        assert!(decode(MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_OUT, split_route_out, msg.clone(), &log).is_err());

        let mut same = msg;
        same["routes"][1]["pools"][0]["token_in_denom"] = json!("uosmo");
        let rows = decode(MSG_SPLIT_ROUTE_SWAP_EXACT_AMOUNT_OUT, split_route_out, same, &log).unwrap();
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(50)));
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(7)));
    }
}
