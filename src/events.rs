//! Lookups over the per-message event log returned with each transaction.

use crate::coin::{parse_coins, Coin};
use crate::error::DecodeError;
use crate::rpc_client::types::{Event, LogEntry};

/// One `recipient`/`sender`/`amount` group out of a `transfer` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub recipient: String,
    pub sender: String,
    pub amount: String,
}

pub fn log_for_message(logs: &[LogEntry], index: i64) -> Option<&LogEntry> {
    logs.iter().find(|l| l.msg_index == index)
}

pub fn event_of_type<'a>(entry: &'a LogEntry, kind: &str) -> Option<&'a Event> {
    entry.events.iter().find(|e| e.kind == kind)
}

pub fn events_of_type<'a>(entry: &'a LogEntry, kind: &str) -> Vec<&'a Event> {
    entry.events.iter().filter(|e| e.kind == kind).collect()
}

pub fn attr_first<'a>(event: &'a Event, key: &str) -> &'a str {
    event
        .attributes
        .iter()
        .find(|a| a.key == key)
        .map_or("", |a| a.value.as_str())
}

pub fn attr_last<'a>(event: &'a Event, key: &str) -> &'a str {
    event
        .attributes
        .iter()
        .rev()
        .find(|a| a.key == key)
        .map_or("", |a| a.value.as_str())
}

/// Value of the `n`th (1-based) attribute named `key`.
pub fn attr_nth<'a>(event: &'a Event, key: &str, n: usize) -> &'a str {
    if n == 0 {
        return "";
    }
    event
        .attributes
        .iter()
        .filter(|a| a.key == key)
        .nth(n - 1)
        .map_or("", |a| a.value.as_str())
}

/// Every value of attribute `key`, in log order.
pub fn attr_all<'a>(event: &'a Event, key: &str) -> Vec<&'a str> {
    event
        .attributes
        .iter()
        .filter(|a| a.key == key)
        .map(|a| a.value.as_str())
        .collect()
}

fn coins_following(
    party_key: &str,
    party: &str,
    events: &[&Event],
) -> Result<Vec<Coin>, DecodeError> {
    let mut coins = Vec::new();
    for event in events {
        let attrs = &event.attributes;
        for (i, attr) in attrs.iter().enumerate() {
            if attr.key != party_key || attr.value != party {
                continue;
            }
            if let Some(next) = attrs.get(i + 1).filter(|a| a.key == "amount") {
                coins.extend(parse_coins(&next.value)?);
            }
        }
    }
    Ok(coins)
}

/// Coins credited to `receiver` across `coin_received` events, duplicates kept.
pub fn coins_received(receiver: &str, events: &[&Event]) -> Result<Vec<Coin>, DecodeError> {
    coins_following("receiver", receiver, events)
}

/// Coins debited from `spender` across `coin_spent` events, duplicates kept.
pub fn coins_spent(spender: &str, events: &[&Event]) -> Result<Vec<Coin>, DecodeError> {
    coins_following("spender", spender, events)
}

/// Split a `transfer` event into its recipient/sender/amount groups.
pub fn parse_transfer_event(event: &Event) -> Result<Vec<Transfer>, DecodeError> {
    if event.kind != "transfer" {
        return Err(DecodeError::log_format(
            &event.kind,
            "expected a transfer event",
        ));
    }

    let mut transfers = Vec::new();
    let mut current: Option<Transfer> = None;
    for attr in &event.attributes {
        match attr.key.as_str() {
            "recipient" => {
                if let Some(done) = current.take() {
                    transfers.push(done);
                }
                current = Some(Transfer {
                    recipient: attr.value.clone(),
                    sender: String::new(),
                    amount: String::new(),
                });
            }
            "sender" => match current.as_mut() {
                Some(t) => t.sender = attr.value.clone(),
                None => return Err(DecodeError::log_format("transfer", "sender before recipient")),
            },
            "amount" => match current.as_mut() {
                Some(t) => t.amount = attr.value.clone(),
                None => return Err(DecodeError::log_format("transfer", "amount before recipient")),
            },
            _ => {}
        }
    }
    if let Some(done) = current {
        transfers.push(done);
    }
    Ok(transfers)
}

/// Legacy action name for a type URL: `/cosmos.bank.v1beta1.MsgMultiSend` -> `multi_send`.
pub fn legacy_action(type_url: &str) -> String {
    if type_url.ends_with(".MsgUndelegate") {
        return "begin_unbonding".to_string();
    }

    let name = match type_url.rfind(".Msg") {
        Some(pos) => &type_url[pos + 4..],
        None => return String::new(),
    };
    let mut action = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                action.push('_');
            }
            action.push(c.to_ascii_lowercase());
        } else {
            action.push(c);
        }
    }
    action
}

/// True when the first `action` attribute of the `message` event names this message type.
pub fn is_message_action_equals(type_url: &str, entry: &LogEntry) -> bool {
    let Some(message) = event_of_type(entry, "message") else {
        return false;
    };
    match message.attributes.iter().find(|a| a.key == "action") {
        Some(action) => action.value == type_url || action.value == legacy_action(type_url),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_client::types::Attribute;
    use bigdecimal::BigDecimal;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<Attribute> {
        pairs.iter().map(|(k, v)| Attribute::new(*k, *v)).collect()
    }

    #[test]
    fn nth_and_last_attribute() {
        let ev = Event::new(
            "token_swapped",
            attrs(&[("pool_id", "1"), ("tokens_out", "50bar"), ("pool_id", "2"), ("tokens_out", "25baz")]),
        );
        assert_eq!(attr_first(&ev, "pool_id"), "1");
        assert_eq!(attr_last(&ev, "tokens_out"), "25baz");
        assert_eq!(attr_nth(&ev, "pool_id", 2), "2");
        assert_eq!(attr_nth(&ev, "pool_id", 3), "");
        assert_eq!(attr_nth(&ev, "pool_id", 0), "");
        assert_eq!(attr_first(&ev, "missing"), "");
    }

    #[test]
    fn coins_received_keeps_duplicates_in_order() {
        let a = Event::new(
            "coin_received",
            attrs(&[("receiver", "d"), ("amount", "5uatom,10uosmo"), ("receiver", "x"), ("amount", "1uatom")]),
        );
        let b = Event::new("coin_received", attrs(&[("receiver", "d"), ("amount", "5uatom")]));
        let coins = coins_received("d", &[&a, &b]).unwrap();
        assert_eq!(coins.len(), 3);
        assert_eq!(coins[0], Coin::new(BigDecimal::from(5), "uatom"));
        assert_eq!(coins[1].denom, "uosmo");
        assert_eq!(coins[2], Coin::new(BigDecimal::from(5), "uatom"));
    }

    #[test]
    fn coins_spent_ignores_empty_amount() {
        let ev = Event::new("coin_spent", attrs(&[("spender", "s"), ("amount", "")]));
        assert!(coins_spent("s", &[&ev]).unwrap().is_empty());
    }

    #[test]
    fn transfer_groups() {
        let ev = Event::new(
            "transfer",
            attrs(&[
                ("recipient", "r1"),
                ("sender", "s1"),
                ("amount", "1uosmo"),
                ("recipient", "r2"),
                ("sender", "s2"),
                ("amount", "2uion"),
            ]),
        );
        let transfers = parse_transfer_event(&ev).unwrap();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[1].recipient, "r2");
        assert_eq!(transfers[1].amount, "2uion");

        let bad = Event::new("transfer", attrs(&[("amount", "1uosmo")]));
        assert!(parse_transfer_event(&bad).is_err());
    }

    #[test]
    fn legacy_action_names() {
        assert_eq!(legacy_action("/cosmos.bank.v1beta1.MsgSend"), "send");
        assert_eq!(legacy_action("/cosmos.bank.v1beta1.MsgMultiSend"), "multi_send");
        assert_eq!(
            legacy_action("/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward"),
            "withdraw_delegator_reward"
        );
        assert_eq!(legacy_action("/cosmos.staking.v1beta1.MsgUndelegate"), "begin_unbonding");
    }

    #[test]
    fn action_matches_either_form() {
        let entry = LogEntry {
            msg_index: 0,
            events: vec![Event::new("message", attrs(&[("action", "swap_exact_amount_in")]))],
        };
        assert!(is_message_action_equals("/osmosis.gamm.v1beta1.MsgSwapExactAmountIn", &entry));
        assert!(!is_message_action_equals("/osmosis.gamm.v1beta1.MsgJoinPool", &entry));

        let modern = LogEntry {
            msg_index: 0,
            events: vec![Event::new("message", attrs(&[("action", "/cosmos.bank.v1beta1.MsgSend")]))],
        };
        assert!(is_message_action_equals("/cosmos.bank.v1beta1.MsgSend", &modern));
        assert!(!is_message_action_equals("/cosmos.bank.v1beta1.MsgSend", &LogEntry::default()));
    }
}
