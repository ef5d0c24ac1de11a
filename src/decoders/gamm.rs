//! Osmosis balancer pools (`gamm`). Pool logs changed shape several times, so
//! most message types register more than one parser and the first that
//! accepts the log wins.

use std::fmt;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;

use super::{body, id_string, join_coins, require_action, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{parse_amount, parse_coin, parse_coins, Coin, JsonCoin};
use crate::error::DecodeError;
use crate::events::{
    attr_all, attr_first, attr_last, attr_nth, coins_received, coins_spent, event_of_type,
    events_of_type, parse_transfer_event,
};
use crate::rpc_client::types::{Event, LogEntry};

pub const MSG_SWAP_EXACT_AMOUNT_IN: &str = "/osmosis.gamm.v1beta1.MsgSwapExactAmountIn";
pub const MSG_SWAP_EXACT_AMOUNT_OUT: &str = "/osmosis.gamm.v1beta1.MsgSwapExactAmountOut";
pub const MSG_JOIN_SWAP_EXTERN_AMOUNT_IN: &str = "/osmosis.gamm.v1beta1.MsgJoinSwapExternAmountIn";
pub const MSG_JOIN_SWAP_SHARE_AMOUNT_OUT: &str = "/osmosis.gamm.v1beta1.MsgJoinSwapShareAmountOut";
pub const MSG_JOIN_POOL: &str = "/osmosis.gamm.v1beta1.MsgJoinPool";
pub const MSG_EXIT_SWAP_SHARE_AMOUNT_IN: &str = "/osmosis.gamm.v1beta1.MsgExitSwapShareAmountIn";
pub const MSG_EXIT_SWAP_EXTERN_AMOUNT_OUT: &str = "/osmosis.gamm.v1beta1.MsgExitSwapExternAmountOut";
pub const MSG_EXIT_POOL: &str = "/osmosis.gamm.v1beta1.MsgExitPool";
pub const MSG_CREATE_POOL: &str = "/osmosis.gamm.v1beta1.MsgCreatePool";
pub const MSG_CREATE_BALANCER_POOL: &str = "/osmosis.gamm.v1beta1.MsgCreateBalancerPool";
pub const MSG_CREATE_BALANCER_POOL_LEGACY: &str =
    "/osmosis.gamm.poolmodels.balancer.v1beta1.MsgCreateBalancerPool";

const POOL_SHARE_MARKER: &str = "gamm";

type Parse = fn(&str, &Value, &LogEntry) -> Result<Outcome, DecodeError>;

const SHAPES: &[(&str, &str, Parse)] = &[
    (MSG_SWAP_EXACT_AMOUNT_IN, "token_swapped", swap_in_token_swapped),
    (MSG_SWAP_EXACT_AMOUNT_IN, "claim", swap_in_claim),
    (MSG_SWAP_EXACT_AMOUNT_IN, "transfer", swap_in_transfer),
    (MSG_SWAP_EXACT_AMOUNT_IN, "last_transfer", swap_in_last_transfer),
    (MSG_SWAP_EXACT_AMOUNT_OUT, "swap", swap_out),
    (MSG_JOIN_SWAP_EXTERN_AMOUNT_IN, "coinbase", join_swap_extern_coinbase),
    (MSG_JOIN_SWAP_EXTERN_AMOUNT_IN, "transfer", join_swap_extern_transfer),
    (MSG_JOIN_SWAP_SHARE_AMOUNT_OUT, "coinbase", join_swap_share_coinbase),
    (MSG_JOIN_SWAP_SHARE_AMOUNT_OUT, "transfer", join_swap_share_transfer),
    (MSG_JOIN_POOL, "join", join_pool),
    (MSG_EXIT_SWAP_SHARE_AMOUNT_IN, "burn", exit_swap_share),
    (MSG_EXIT_SWAP_EXTERN_AMOUNT_OUT, "burn", exit_swap_extern),
    (MSG_EXIT_POOL, "pool_exited", exit_pool_event),
    (MSG_EXIT_POOL, "transfer", exit_pool_transfer),
    (MSG_CREATE_POOL, "coin_events", create_pool_coin_events),
    (MSG_CREATE_POOL, "transfer", create_pool_transfers),
    (MSG_CREATE_BALANCER_POOL, "coin_events", create_pool_coin_events),
    (MSG_CREATE_BALANCER_POOL, "transfer", create_pool_transfers),
    (MSG_CREATE_BALANCER_POOL_LEGACY, "coin_events", create_pool_coin_events),
    (MSG_CREATE_BALANCER_POOL_LEGACY, "transfer", create_pool_transfers),
];

pub fn register(registry: &mut MessageRegistry) {
    for &(type_url, parser, parse) in SHAPES {
        registry.register_fn(type_url, move || PoolMessage::new(type_url, parser, parse));
    }
}

/// What a parser extracted: the acting address and its movements.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub address: String,
    pub movements: Vec<Movement>,
}

impl Outcome {
    fn swap(address: &str, sent: &Coin, received: &Coin) -> Self {
        Outcome {
            address: address.to_string(),
            movements: vec![Movement::swap(address, sent, received)],
        }
    }
}

/// A gamm message decoded by one named log parser.
pub struct PoolMessage {
    type_url: &'static str,
    parser: &'static str,
    parse: Parse,
    outcome: Outcome,
}

impl PoolMessage {
    pub fn new(type_url: &'static str, parser: &'static str, parse: Parse) -> Self {
        PoolMessage {
            type_url,
            parser,
            parse,
            outcome: Outcome::default(),
        }
    }
}

impl MessageDecoder for PoolMessage {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let entry = require_action(type_url, log)?;
        self.outcome = (self.parse)(type_url, msg, entry)?;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.outcome.movements.clone()
    }

    fn message_type(&self) -> &str {
        self.type_url
    }
}

impl fmt::Display for PoolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sent: Vec<Coin> = self
            .outcome
            .movements
            .iter()
            .filter_map(|m| Some(Coin::new(m.amount_sent.clone()?, m.denom_sent.clone()?)))
            .collect();
        let received: Vec<Coin> = self
            .outcome
            .movements
            .iter()
            .filter_map(|m| Some(Coin::new(m.amount_received.clone()?, m.denom_received.clone()?)))
            .collect();
        write!(
            f,
            "{} ({}): {} sent {} and received {}",
            super::short_name(self.type_url),
            self.parser,
            self.outcome.address,
            join_coins(&sent),
            join_coins(&received)
        )
    }
}

/// Split `shares` into `n` legs: each gets `total / n`, the last takes the remainder.
pub fn split_shares(shares: &Coin, n: usize) -> Vec<Coin> {
    if n == 0 {
        return Vec::new();
    }
    let legs = BigDecimal::from(n as u64);
    let nth = (&shares.amount / &legs).with_scale(0);
    let last = &shares.amount - &nth * BigDecimal::from((n - 1) as u64);
    let mut split = vec![Coin::new(nth, shares.denom.clone()); n - 1];
    split.push(Coin::new(last, shares.denom.clone()));
    split
}

fn is_pool_share(denom: &str) -> bool {
    denom.contains(POOL_SHARE_MARKER)
}

fn missing(type_url: &str, what: &str) -> DecodeError {
    DecodeError::log_format(type_url, format!("missing {}", what))
}

fn or_body<'a>(from_log: &'a str, from_body: &'a str) -> &'a str {
    if from_log.is_empty() {
        from_body
    } else {
        from_log
    }
}

fn required_event<'a>(type_url: &str, entry: &'a LogEntry, kind: &str) -> Result<&'a Event, DecodeError> {
    event_of_type(entry, kind).ok_or_else(|| missing(type_url, &format!("{} event", kind)))
}

#[derive(Deserialize)]
struct SwapInRoute {
    #[serde(default, deserialize_with = "id_string")]
    pool_id: String,
    #[serde(default)]
    token_out_denom: String,
}

#[derive(Deserialize)]
struct SwapExactAmountInBody {
    sender: String,
    #[serde(default)]
    routes: Vec<SwapInRoute>,
    token_in: JsonCoin,
}

impl SwapExactAmountInBody {
    fn check_final_denom(&self, type_url: &str, out: &Coin) -> Result<(), DecodeError> {
        match self.routes.last() {
            Some(route) if route.token_out_denom == out.denom => Ok(()),
            _ => Err(DecodeError::log_format(type_url, "token out does not match last route")),
        }
    }
}

fn swap_in_token_swapped(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SwapExactAmountInBody = body(msg)?;
    let swapped = required_event(type_url, entry, "token_swapped")?;
    let sender = or_body(attr_first(swapped, "sender"), &parsed.sender);
    let token_in = match attr_first(swapped, "tokens_in") {
        "" => Coin::try_from(&parsed.token_in)?,
        tokens_in => parse_coin(tokens_in)?,
    };
    // Multi-hop routes log every hop; only the final output counts.
    let token_out = parse_coin(attr_last(swapped, "tokens_out"))?;
    Ok(Outcome::swap(sender, &token_in, &token_out))
}

fn swap_in_claim(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SwapExactAmountInBody = body(msg)?;
    let claim = required_event(type_url, entry, "claim")?;
    let sender = or_body(attr_first(claim, "sender"), &parsed.sender);
    let token_in = Coin::try_from(&parsed.token_in)?;
    let token_out = parse_coin(attr_last(claim, "amount"))?;
    Ok(Outcome::swap(sender, &token_in, &token_out))
}

fn swap_in_transfer(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SwapExactAmountInBody = body(msg)?;
    let transfer = required_event(type_url, entry, "transfer")?;
    let token_in = Coin::try_from(&parsed.token_in)?;

    if attr_nth(transfer, "sender", 1) != parsed.sender
        || parse_coin(attr_nth(transfer, "amount", 1))? != token_in
    {
        return Err(DecodeError::log_format(type_url, "first transfer is not the token in"));
    }
    if attr_nth(transfer, "recipient", 2) != parsed.sender {
        return Err(DecodeError::log_format(type_url, "second transfer is not to the sender"));
    }
    let token_out = parse_coin(attr_nth(transfer, "amount", 2))?;
    parsed.check_final_denom(type_url, &token_out)?;
    Ok(Outcome::swap(&parsed.sender, &token_in, &token_out))
}

fn swap_in_last_transfer(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SwapExactAmountInBody = body(msg)?;
    let transfer = required_event(type_url, entry, "transfer")?;
    let token_in = Coin::try_from(&parsed.token_in)?;

    if attr_nth(transfer, "sender", 1) != parsed.sender
        || parse_coin(attr_nth(transfer, "amount", 1))? != token_in
    {
        return Err(DecodeError::log_format(type_url, "first transfer is not the token in"));
    }
    if attr_last(transfer, "recipient") != parsed.sender {
        return Err(DecodeError::log_format(type_url, "last transfer is not to the sender"));
    }
    let token_out = parse_coin(attr_last(transfer, "amount"))?;
    parsed.check_final_denom(type_url, &token_out)?;
    Ok(Outcome::swap(&parsed.sender, &token_in, &token_out))
}

#[derive(Deserialize)]
struct SwapOutRoute {
    #[serde(default)]
    token_in_denom: String,
}

#[derive(Deserialize)]
struct SwapExactAmountOutBody {
    sender: String,
    #[serde(default)]
    routes: Vec<SwapOutRoute>,
    token_out: JsonCoin,
}

fn swap_out(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SwapExactAmountOutBody = body(msg)?;

    if let Some(swapped) = event_of_type(entry, "token_swapped") {
        let token_in = parse_coin(attr_first(swapped, "tokens_in"))?;
        let sender = or_body(attr_first(swapped, "sender"), &parsed.sender);
        let token_out = parse_coin(attr_last(swapped, "tokens_out"))?;
        return Ok(Outcome::swap(sender, &token_in, &token_out));
    }

    let transfer = required_event(type_url, entry, "transfer")?;
    let first_denom = parsed
        .routes
        .first()
        .map(|r| r.token_in_denom.as_str())
        .ok_or_else(|| missing(type_url, "routes"))?;
    let mut token_in = None;
    for amount in attr_all(transfer, "amount") {
        let coin = parse_coin(amount)?;
        if coin.denom == first_denom {
            token_in = Some(coin);
            break;
        }
    }
    let token_in = token_in.ok_or_else(|| missing(type_url, "transfer of the route's input denom"))?;
    let sender = or_body(attr_first(transfer, "sender"), &parsed.sender);
    let token_out = parse_coin(attr_last(transfer, "amount"))?;
    Ok(Outcome::swap(sender, &token_in, &token_out))
}

#[derive(Deserialize)]
struct JoinSwapExternBody {
    sender: String,
    #[serde(default, deserialize_with = "id_string")]
    pool_id: String,
    token_in: JsonCoin,
}

#[derive(Deserialize)]
struct JoinSwapShareBody {
    sender: String,
    #[serde(default, deserialize_with = "id_string")]
    pool_id: String,
}

/// Pool shares minted straight to the joiner, read from the `coinbase` event.
fn minted_shares(type_url: &str, entry: &LogEntry) -> Result<Coin, DecodeError> {
    let coinbase = required_event(type_url, entry, "coinbase")?;
    let amount = attr_first(coinbase, "amount");
    if !is_pool_share(amount) {
        return Err(DecodeError::log_format(type_url, "coinbase amount is not a pool share"));
    }
    parse_coin(amount)
}

/// Pool shares of `pool_id` transferred to `recipient`, scanning the first
/// `transfer` event from the end.
fn shares_transferred_to(
    type_url: &str,
    entry: &LogEntry,
    recipient: &str,
    pool_id: &str,
) -> Result<Coin, DecodeError> {
    let transfer = required_event(type_url, entry, "transfer")?;
    let attrs = &transfer.attributes;
    let suffix = format!("/{}", pool_id);
    let found = (2..attrs.len()).rev().find(|&i| {
        attrs[i].key == "amount"
            && is_pool_share(&attrs[i].value)
            && attrs[i].value.ends_with(&suffix)
            && attrs[i - 2].key == "recipient"
            && attrs[i - 2].value == recipient
    });
    match found {
        Some(i) => parse_coin(&attrs[i].value),
        None => Err(missing(type_url, "pool share transfer to the sender")),
    }
}

fn join_swap_extern_coinbase(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: JoinSwapExternBody = body(msg)?;
    let shares = minted_shares(type_url, entry)?;
    let joined = required_event(type_url, entry, "pool_joined")?;
    let sender = or_body(attr_first(joined, "sender"), &parsed.sender);
    Ok(Outcome::swap(sender, &Coin::try_from(&parsed.token_in)?, &shares))
}

fn join_swap_extern_transfer(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: JoinSwapExternBody = body(msg)?;
    let shares = shares_transferred_to(type_url, entry, &parsed.sender, &parsed.pool_id)?;
    Ok(Outcome::swap(&parsed.sender, &Coin::try_from(&parsed.token_in)?, &shares))
}

fn pool_joined_single(type_url: &str, entry: &LogEntry, fallback: &str) -> Result<(String, Coin), DecodeError> {
    let joined = required_event(type_url, entry, "pool_joined")?;
    let sender = or_body(attr_first(joined, "sender"), fallback).to_string();
    let token_in = parse_coin(attr_first(joined, "tokens_in"))?;
    Ok((sender, token_in))
}

fn join_swap_share_coinbase(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: JoinSwapShareBody = body(msg)?;
    let shares = minted_shares(type_url, entry)?;
    let (sender, token_in) = pool_joined_single(type_url, entry, &parsed.sender)?;
    Ok(Outcome::swap(&sender, &token_in, &shares))
}

fn join_swap_share_transfer(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: JoinSwapShareBody = body(msg)?;
    let shares = shares_transferred_to(type_url, entry, &parsed.sender, &parsed.pool_id)?;
    let (sender, token_in) = pool_joined_single(type_url, entry, &parsed.sender)?;
    Ok(Outcome::swap(&sender, &token_in, &shares))
}

#[derive(Deserialize)]
struct SenderBody {
    sender: String,
}

/// One movement per token deposited, each receiving an equal slice of the shares.
fn deposit_legs(address: &str, tokens: &[Coin], shares: &Coin) -> Vec<Movement> {
    split_shares(shares, tokens.len())
        .iter()
        .zip(tokens)
        .map(|(slice, token)| Movement::swap(address, token, slice))
        .collect()
}

/// One movement per token withdrawn, each paid for with an equal slice of the shares.
fn withdrawal_legs(address: &str, shares: &Coin, tokens: &[Coin]) -> Vec<Movement> {
    split_shares(shares, tokens.len())
        .iter()
        .zip(tokens)
        .map(|(slice, token)| Movement::swap(address, slice, token))
        .collect()
}

fn join_pool(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SenderBody = body(msg)?;
    let transfer = required_event(type_url, entry, "transfer")?;

    // Older logs fold an incentive claim into the same transfer event.
    let claim = if event_of_type(entry, "claim").is_some() {
        Some(parse_coins(attr_last(transfer, "amount"))?)
    } else {
        None
    };
    let shares = if claim.is_some() {
        parse_coin(attr_nth(transfer, "amount", 2))?
    } else {
        parse_coin(attr_last(transfer, "amount"))?
    };
    if !is_pool_share(&shares.denom) {
        return Err(DecodeError::log_format(type_url, "join did not return pool shares"));
    }

    let (address, tokens_in) = match event_of_type(entry, "pool_joined") {
        Some(joined) => (
            or_body(attr_first(joined, "sender"), &parsed.sender).to_string(),
            parse_coins(attr_first(joined, "tokens_in"))?,
        ),
        None => {
            let attrs = &transfer.attributes;
            let index = attrs
                .iter()
                .position(|a| a.key == "amount" && a.value.contains(','))
                .ok_or_else(|| missing(type_url, "multi-coin deposit transfer"))?;
            let depositor = index
                .checked_sub(1)
                .map(|i| &attrs[i])
                .filter(|a| a.key == "sender")
                .map(|a| a.value.as_str())
                .unwrap_or_default();
            if depositor != parsed.sender {
                return Err(DecodeError::log_format(type_url, "deposit sender does not match"));
            }
            (parsed.sender.clone(), parse_coins(&attrs[index].value)?)
        }
    };

    let mut movements = deposit_legs(&address, &tokens_in, &shares);
    for coin in claim.unwrap_or_default() {
        movements.push(Movement::received(&address, &coin));
    }
    Ok(Outcome { address, movements })
}

fn burned_shares(type_url: &str, entry: &LogEntry) -> Result<Coin, DecodeError> {
    let burn = required_event(type_url, entry, "burn")?;
    let shares = parse_coin(attr_first(burn, "amount"))?;
    if !is_pool_share(&shares.denom) {
        return Err(DecodeError::log_format(type_url, "burned coin is not a pool share"));
    }
    Ok(shares)
}

fn pool_exited(type_url: &str, entry: &LogEntry, fallback: &str) -> Result<(String, Vec<Coin>), DecodeError> {
    let exited = required_event(type_url, entry, "pool_exited")?;
    let sender = or_body(attr_first(exited, "sender"), fallback).to_string();
    let tokens_out = parse_coins(attr_first(exited, "tokens_out"))?;
    if tokens_out.is_empty() {
        return Err(missing(type_url, "tokens_out"));
    }
    Ok((sender, tokens_out))
}

fn exit_swap_share(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SenderBody = body(msg)?;
    let shares = burned_shares(type_url, entry)?;
    let (address, tokens_out) = pool_exited(type_url, entry, &parsed.sender)?;

    let mut movements = withdrawal_legs(&address, &shares, &tokens_out);
    // Newer logs exit to every pool asset and then swap into the requested one.
    for swapped in events_of_type(entry, "token_swapped") {
        let token_in = parse_coin(attr_first(swapped, "tokens_in"))?;
        let token_out = parse_coin(attr_last(swapped, "tokens_out"))?;
        movements.push(Movement::swap(&address, &token_in, &token_out));
    }
    Ok(Outcome { address, movements })
}

fn exit_swap_extern(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SenderBody = body(msg)?;
    let shares = burned_shares(type_url, entry)?;
    let (address, tokens_out) = pool_exited(type_url, entry, &parsed.sender)?;
    let movements = withdrawal_legs(&address, &shares, &tokens_out);
    Ok(Outcome { address, movements })
}

#[derive(Deserialize)]
struct ExitPoolBody {
    sender: String,
    #[serde(default, deserialize_with = "id_string")]
    pool_id: String,
    #[serde(default)]
    share_in_amount: String,
}

fn exit_pool_event(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: ExitPoolBody = body(msg)?;
    let transfer = required_event(type_url, entry, "transfer")?;
    let shares = parse_coin(attr_last(transfer, "amount"))?;
    if !is_pool_share(&shares.denom) {
        return Err(DecodeError::log_format(type_url, "last transfer is not a pool share"));
    }
    let (address, tokens_out) = pool_exited(type_url, entry, &parsed.sender)?;
    let movements = withdrawal_legs(&address, &shares, &tokens_out);
    Ok(Outcome { address, movements })
}

fn exit_pool_transfer(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: ExitPoolBody = body(msg)?;
    let transfer = required_event(type_url, entry, "transfer")?;
    if attr_first(transfer, "recipient") != parsed.sender {
        return Err(DecodeError::log_format(type_url, "first transfer is not to the sender"));
    }
    let tokens_out = parse_coins(attr_first(transfer, "amount"))?;
    let shares = Coin::new(
        parse_amount(&parsed.share_in_amount)?,
        format!("gamm/pool/{}", parsed.pool_id),
    );
    let movements = withdrawal_legs(&parsed.sender, &shares, &tokens_out);
    Ok(Outcome {
        address: parsed.sender,
        movements,
    })
}

fn create_pool_coin_events(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SenderBody = body(msg)?;
    let spent = coins_spent(&parsed.sender, &events_of_type(entry, "coin_spent"))?;
    if spent.len() < 2 {
        return Err(DecodeError::log_format(type_url, "pool creation spent fewer than two assets"));
    }
    let received = coins_received(&parsed.sender, &events_of_type(entry, "coin_received"))?;
    let shares = match received.as_slice() {
        [only] if only.denom.starts_with("gamm/pool/") => only.clone(),
        _ => return Err(DecodeError::log_format(type_url, "expected exactly one pool share credit")),
    };
    let movements = deposit_legs(&parsed.sender, &spent, &shares);
    Ok(Outcome {
        address: parsed.sender,
        movements,
    })
}

fn create_pool_transfers(type_url: &str, msg: &Value, entry: &LogEntry) -> Result<Outcome, DecodeError> {
    let parsed: SenderBody = body(msg)?;
    let creator = parsed.sender.as_str();

    let mut spent = Vec::new();
    let mut shares = None;
    let mut other_received = Vec::new();
    for event in events_of_type(entry, "transfer") {
        for transfer in parse_transfer_event(event)? {
            if transfer.recipient == creator {
                for coin in parse_coins(&transfer.amount)? {
                    if coin.denom.starts_with("gamm/pool/") {
                        shares = Some(coin);
                    } else {
                        other_received.push((transfer.sender.clone(), coin));
                    }
                }
            } else if transfer.sender == creator {
                spent.extend(parse_coins(&transfer.amount)?);
            }
        }
    }

    let shares = shares.ok_or_else(|| missing(type_url, "pool share transfer to the creator"))?;
    if spent.is_empty() {
        return Err(missing(type_url, "assets spent by the creator"));
    }
    let mut movements = deposit_legs(creator, &spent, &shares);
    for (from, coin) in &other_received {
        movements.push(Movement::transfer(from, creator, coin));
    }
    Ok(Outcome {
        address: parsed.sender,
        movements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use serde_json::json;
    use std::str::FromStr;

    fn decode(type_url: &'static str, parser: Parse, msg: Value, log: &LogEntry) -> Result<Vec<Movement>, DecodeError> {
        let mut decoder = PoolMessage::new(type_url, "test", parser);
        decoder.handle_msg(type_url, &msg, Some(log))?;
        Ok(decoder.parse_relevant_data())
    }

    #[test]
    fn split_gives_remainder_to_last_leg() {
        let legs = split_shares(&Coin::new(BigDecimal::from(100), "gamm/pool/1"), 3);
        let amounts: Vec<BigDecimal> = legs.into_iter().map(|c| c.amount).collect();
        assert_eq!(amounts, vec![BigDecimal::from(33), BigDecimal::from(33), BigDecimal::from(34)]);

        let big = BigDecimal::from_str("100000000000000000000000000001").unwrap();
        let legs = split_shares(&Coin::new(big.clone(), "gamm/pool/1"), 2);
        assert_eq!(&legs[0].amount + &legs[1].amount, big);
        assert!(split_shares(&Coin::new(big, "gamm/pool/1"), 0).is_empty());
    }

    #[test]
    fn multi_hop_swap_records_final_output_only() {
        let msg = json!({
            "sender": "osmo1s",
            "routes": [{"pool_id": "1", "token_out_denom": "bar"}, {"pool_id": "2", "token_out_denom": "baz"}],
            "token_in": {"denom": "foo", "amount": "100"},
            "token_out_min_amount": "1"
        });
        let log = log_with_action(
            "swap_exact_amount_in",
            vec![event(
                "token_swapped",
                &[("pool_id", "1"), ("tokens_out", "50bar"), ("pool_id", "2"), ("tokens_out", "25baz")],
            )],
        );
        let rows = decode(MSG_SWAP_EXACT_AMOUNT_IN, swap_in_token_swapped, msg, &log).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_sent, Some(BigDecimal::from(100)));
        assert_eq!(rows[0].denom_sent.as_deref(), Some("foo"));
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(25)));
        assert_eq!(rows[0].denom_received.as_deref(), Some("baz"));
        assert_eq!(rows[0].sender, "osmo1s");
    }

    #[test]
    fn transfer_shaped_swap_checks_route() {
        let msg = json!({
            "sender": "osmo1s",
            "routes": [{"pool_id": "1", "token_out_denom": "uion"}],
            "token_in": {"denom": "uosmo", "amount": "10"}
        });
        let log = log_with_action(
            "swap_exact_amount_in",
            vec![event(
                "transfer",
                &[
                    ("recipient", "osmo1pool"), ("sender", "osmo1s"), ("amount", "10uosmo"),
                    ("recipient", "osmo1s"), ("sender", "osmo1pool"), ("amount", "3uion"),
                ],
            )],
        );
        let rows = decode(MSG_SWAP_EXACT_AMOUNT_IN, swap_in_transfer, msg.clone(), &log).unwrap();
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(3)));

        let mut wrong_route = msg;
        wrong_route["routes"][0]["token_out_denom"] = json!("uatom");
        assert!(decode(MSG_SWAP_EXACT_AMOUNT_IN, swap_in_transfer, wrong_route, &log).is_err());
    }

    #[test]
    fn join_pool_splits_shares_across_deposits() {
        let msg = json!({"sender": "osmo1s", "pool_id": "1", "share_out_amount": "101"});
        let log = log_with_action(
            "join_pool",
            vec![
                event(
                    "transfer",
                    &[
                        ("recipient", "osmo1pool"), ("sender", "osmo1s"), ("amount", "10uatom,20uosmo"),
                        ("recipient", "osmo1s"), ("sender", "osmo1pool"), ("amount", "101gamm/pool/1"),
                    ],
                ),
                event("pool_joined", &[("sender", "osmo1s"), ("pool_id", "1"), ("tokens_in", "10uatom,20uosmo")]),
            ],
        );
        let rows = decode(MSG_JOIN_POOL, join_pool, msg, &log).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].denom_sent.as_deref(), Some("uatom"));
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(50)));
        assert_eq!(rows[1].amount_received, Some(BigDecimal::from(51)));
    }

    #[test]
    fn exit_pool_from_transfer() {
        let msg = json!({"sender": "osmo1s", "pool_id": 7, "share_in_amount": "1000"});
        let log = log_with_action(
            "exit_pool",
            vec![event("transfer", &[("recipient", "osmo1s"), ("sender", "osmo1pool"), ("amount", "4uatom,6uosmo")])],
        );
        assert!(decode(MSG_EXIT_POOL, exit_pool_event, msg.clone(), &log).is_err());
        let rows = decode(MSG_EXIT_POOL, exit_pool_transfer, msg, &log).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].denom_sent.as_deref(), Some("gamm/pool/7"));
        assert_eq!(rows[1].amount_sent, Some(BigDecimal::from(500)));
        assert_eq!(rows[1].amount_received, Some(BigDecimal::from(6)));
    }

    #[test]
    fn exit_swap_share_records_internal_swaps() {
        let msg = json!({"sender": "osmo1s", "pool_id": "1", "token_out_denom": "uosmo"});
        let log = log_with_action(
            "exit_swap_share_amount_in",
            vec![
                event("burn", &[("burner", "osmo1gamm"), ("amount", "10gamm/pool/1")]),
                event("pool_exited", &[("sender", "osmo1s"), ("tokens_out", "2uatom,3uosmo")]),
                event("token_swapped", &[("tokens_in", "2uatom"), ("tokens_out", "3uosmo")]),
            ],
        );
        let rows = decode(MSG_EXIT_SWAP_SHARE_AMOUNT_IN, exit_swap_share, msg, &log).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].denom_sent.as_deref(), Some("uatom"));
        assert_eq!(rows[2].denom_received.as_deref(), Some("uosmo"));
    }

    #[test]
    fn join_swap_extern_scans_transfers_backwards() {
        let msg = json!({"sender": "osmo1s", "pool_id": "3", "token_in": {"denom": "uosmo", "amount": "50"}});
        let log = log_with_action(
            "join_swap_extern_amount_in",
            vec![event(
                "transfer",
                &[
                    ("recipient", "osmo1pool"), ("sender", "osmo1s"), ("amount", "50uosmo"),
                    ("recipient", "osmo1s"), ("sender", "osmo1pool"), ("amount", "999gamm/pool/3"),
                ],
            )],
        );
        assert!(decode(MSG_JOIN_SWAP_EXTERN_AMOUNT_IN, join_swap_extern_coinbase, msg.clone(), &log).is_err());
        let rows = decode(MSG_JOIN_SWAP_EXTERN_AMOUNT_IN, join_swap_extern_transfer, msg, &log).unwrap();
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(999)));
    }

    #[test]
    fn create_pool_from_transfers() {
        let msg = json!({"sender": "osmo1c"});
        let log = log_with_action(
            MSG_CREATE_BALANCER_POOL,
            vec![event(
                "transfer",
                &[
                    ("recipient", "osmo1pool"), ("sender", "osmo1c"), ("amount", "100uatom,200uosmo"),
                    ("recipient", "osmo1c"), ("sender", "osmo1gamm"), ("amount", "100000gamm/pool/9"),
                    ("recipient", "osmo1c"), ("sender", "osmo1refund"), ("amount", "5uion"),
                ],
            )],
        );
        let rows = decode(MSG_CREATE_BALANCER_POOL, create_pool_transfers, msg, &log).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(50000)));
        assert_eq!(rows[2].sender, "osmo1refund");
        assert_eq!(rows[2].receiver, "osmo1c");
    }

    #[test]
    fn registry_falls_through_swap_shapes() {
        let mut registry = MessageRegistry::new();
        register(&mut registry);
        let msg = json!({
            "sender": "osmo1s",
            "routes": [{"pool_id": "1", "token_out_denom": "uion"}],
            "token_in": {"denom": "uosmo", "amount": "10"}
        });
        let log = log_with_action(
            "swap_exact_amount_in",
            vec![event(
                "transfer",
                &[
                    ("recipient", "osmo1pool"), ("sender", "osmo1s"), ("amount", "10uosmo"),
                    ("recipient", "osmo1fee"), ("sender", "osmo1pool"), ("amount", "1uion"),
                    ("recipient", "osmo1s"), ("sender", "osmo1pool"), ("amount", "3uion"),
                ],
            )],
        );
        let decoded = registry.decode(MSG_SWAP_EXACT_AMOUNT_IN, &msg, Some(&log)).unwrap();
        assert!(decoded.description.contains("(last_transfer)"));
        assert_eq!(decoded.movements[0].amount_received, Some(BigDecimal::from(3)));
    }
}
