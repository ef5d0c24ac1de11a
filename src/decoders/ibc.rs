use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::hashes::{sha256, Hash};
use serde::Deserialize;
use serde_json::Value;

use super::{body, require_action, require_log, MessageDecoder, MessageRegistry, Movement};
use crate::coin::{parse_amount, Coin, JsonCoin};
use crate::error::DecodeError;
use crate::events::{attr_first, event_of_type};
use crate::rpc_client::types::LogEntry;

pub const MSG_TRANSFER: &str = "/ibc.applications.transfer.v1.MsgTransfer";
pub const MSG_RECV_PACKET: &str = "/ibc.core.channel.v1.MsgRecvPacket";
pub const MSG_ACKNOWLEDGEMENT: &str = "/ibc.core.channel.v1.MsgAcknowledgement";

pub fn register(registry: &mut MessageRegistry) {
    registry.register_fn(MSG_TRANSFER, Transfer::default);
    registry.register_fn(MSG_RECV_PACKET, RecvPacket::default);
    registry.register_fn(MSG_ACKNOWLEDGEMENT, Acknowledgement::default);
}

/// `ibc/<SHA-256(trace) in upper hex>`.
pub fn ibc_denom(trace: &str) -> String {
    let hash = sha256::Hash::hash(trace.as_bytes()).to_byte_array();
    format!("ibc/{}", hex::encode_upper(hash))
}

/// Local denom for a full denom trace: traces carrying a `port/channel-N` path
/// become vouchers, bare bases stay as they are.
pub fn local_denom(trace: &str) -> String {
    let segments: Vec<&str> = trace.split('/').collect();
    let mut path_len = 0;
    while path_len + 2 < segments.len() && segments[path_len + 1].starts_with("channel-") {
        path_len += 2;
    }
    if path_len == 0 {
        trace.to_string()
    } else {
        ibc_denom(trace)
    }
}

/// Denom credited on this chain for an incoming packet.
pub fn received_denom(packet: &Packet, trace: &str) -> String {
    let source_prefix = format!("{}/{}/", packet.source_port, packet.source_channel);
    match trace.strip_prefix(&source_prefix) {
        // Token is coming home: drop the hop it took on the way out.
        Some(unprefixed) => local_denom(unprefixed),
        None => ibc_denom(&format!(
            "{}/{}/{}",
            packet.destination_port, packet.destination_channel, trace
        )),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Packet {
    #[serde(default)]
    pub source_port: String,
    #[serde(default)]
    pub source_channel: String,
    #[serde(default)]
    pub destination_port: String,
    #[serde(default)]
    pub destination_channel: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FungibleTokenPacketData {
    #[serde(default)]
    denom: String,
    #[serde(default)]
    amount: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    receiver: String,
}

impl Packet {
    fn token_data(&self) -> Result<FungibleTokenPacketData, DecodeError> {
        let raw = STANDARD.decode(self.data.trim())?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Deserialize)]
struct TransferBody {
    sender: String,
    receiver: String,
    token: Option<JsonCoin>,
}

#[derive(Debug, Default)]
pub struct Transfer {
    sender: String,
    receiver: String,
    token: Option<Coin>,
}

impl MessageDecoder for Transfer {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        require_action(type_url, log)?;
        let parsed: TransferBody = body(msg)?;
        self.sender = parsed.sender;
        self.receiver = parsed.receiver;
        self.token = parsed.token.as_ref().map(Coin::try_from).transpose()?;
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.token
            .iter()
            .map(|coin| Movement::transfer(&self.sender, &self.receiver, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        MSG_TRANSFER
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(token) => write!(
                f,
                "MsgTransfer: IBC transfer of {} from {} to {}",
                token, self.sender, self.receiver
            ),
            None => write!(
                f,
                "MsgTransfer: IBC transfer from {} to {} did not include an amount",
                self.sender, self.receiver
            ),
        }
    }
}

#[derive(Deserialize)]
struct RecvPacketBody {
    packet: Packet,
}

/// Incoming transfer. Only recorded when the `fungible_token_packet` event
/// reports success; relayed packets for other applications decode to nothing.
#[derive(Debug, Default)]
pub struct RecvPacket {
    sender: String,
    receiver: String,
    token: Option<Coin>,
}

impl MessageDecoder for RecvPacket {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        let entry = require_log(type_url, log)?;
        let parsed: RecvPacketBody = body(msg)?;

        let Some(packet_event) = event_of_type(entry, "fungible_token_packet") else {
            return Ok(());
        };
        if attr_first(packet_event, "success") != "true" {
            return Ok(());
        }

        let data = parsed.packet.token_data()?;
        let denom = received_denom(&parsed.packet, &data.denom);
        self.sender = data.sender;
        self.receiver = data.receiver;
        self.token = Some(Coin::new(parse_amount(&data.amount)?, denom));
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.token
            .iter()
            .map(|coin| Movement {
                sender: self.sender.clone(),
                ..Movement::received(&self.receiver, coin)
            })
            .collect()
    }

    fn message_type(&self) -> &str {
        MSG_RECV_PACKET
    }
}

impl fmt::Display for RecvPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(token) => write!(
                f,
                "MsgRecvPacket: {} received {} from {}",
                self.receiver, token, self.sender
            ),
            None => f.write_str("MsgRecvPacket: no fungible token received"),
        }
    }
}

#[derive(Deserialize)]
struct AcknowledgementBody {
    packet: Packet,
    #[serde(default)]
    acknowledgement: String,
}

/// Acknowledgement of an outgoing transfer. A failed ack refunds the sender.
#[derive(Debug, Default)]
pub struct Acknowledgement {
    refund_to: String,
    refund: Option<Coin>,
}

fn ack_is_error(acknowledgement: &str) -> Result<bool, DecodeError> {
    if acknowledgement.is_empty() {
        return Ok(false);
    }
    let raw = STANDARD.decode(acknowledgement.trim())?;
    let ack: Value = serde_json::from_slice(&raw)?;
    Ok(ack.get("error").is_some())
}

impl MessageDecoder for Acknowledgement {
    fn handle_msg(&mut self, type_url: &str, msg: &Value, log: Option<&LogEntry>) -> Result<(), DecodeError> {
        require_log(type_url, log)?;
        let parsed: AcknowledgementBody = body(msg)?;
        if parsed.packet.data.is_empty() || !ack_is_error(&parsed.acknowledgement)? {
            return Ok(());
        }

        let data = parsed.packet.token_data()?;
        self.refund_to = data.sender;
        self.refund = Some(Coin::new(parse_amount(&data.amount)?, local_denom(&data.denom)));
        Ok(())
    }

    fn parse_relevant_data(&self) -> Vec<Movement> {
        self.refund
            .iter()
            .map(|coin| Movement::received(&self.refund_to, coin))
            .collect()
    }

    fn message_type(&self) -> &str {
        MSG_ACKNOWLEDGEMENT
    }
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.refund {
            Some(coin) => write!(f, "MsgAcknowledgement: {} refunded {}", self.refund_to, coin),
            None => f.write_str("MsgAcknowledgement: packet acknowledged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::testing::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn packet_data(denom: &str) -> String {
        STANDARD.encode(
            json!({"denom": denom, "amount": "250", "sender": "cosmos1s", "receiver": "osmo1r"}).to_string(),
        )
    }

    fn recv_msg(denom: &str) -> Value {
        json!({
            "packet": {
                "source_port": "transfer",
                "source_channel": "channel-141",
                "destination_port": "transfer",
                "destination_channel": "channel-0",
                "data": packet_data(denom)
            },
            "signer": "osmo1relayer"
        })
    }

    #[test]
    fn voucher_denom_matches_known_atom_hash() {
        assert_eq!(
            ibc_denom("transfer/channel-0/uatom"),
            "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2"
        );
    }

    #[test]
    fn local_denom_only_hashes_real_paths() {
        assert_eq!(local_denom("uosmo"), "uosmo");
        assert_eq!(local_denom("gamm/pool/1"), "gamm/pool/1");
        assert_eq!(local_denom("transfer/channel-0/uatom"), ibc_denom("transfer/channel-0/uatom"));
    }

    #[test]
    fn successful_recv_credits_voucher() {
        let mut decoder = RecvPacket::default();
        let log = log_with_action(
            "recv_packet",
            vec![event("fungible_token_packet", &[("receiver", "osmo1r"), ("success", "true")])],
        );
        decoder.handle_msg(MSG_RECV_PACKET, &recv_msg("uatom"), Some(&log)).unwrap();
        let rows = decoder.parse_relevant_data();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].receiver, "osmo1r");
        assert_eq!(rows[0].sender, "cosmos1s");
        assert_eq!(rows[0].amount_received, Some(BigDecimal::from(250)));
        assert_eq!(rows[0].denom_received.as_deref(), Some(ibc_denom("transfer/channel-0/uatom").as_str()));
        assert!(rows[0].amount_sent.is_none());
    }

    #[test]
    fn returning_token_is_unwrapped() {
        let mut decoder = RecvPacket::default();
        let log = log_with_action(
            "recv_packet",
            vec![event("fungible_token_packet", &[("success", "true")])],
        );
        decoder
            .handle_msg(MSG_RECV_PACKET, &recv_msg("transfer/channel-141/uosmo"), Some(&log))
            .unwrap();
        assert_eq!(decoder.parse_relevant_data()[0].denom_received.as_deref(), Some("uosmo"));
    }

    #[test]
    fn failed_recv_records_nothing() {
        let mut decoder = RecvPacket::default();
        let log = log_with_action(
            "recv_packet",
            vec![event("fungible_token_packet", &[("success", "false")])],
        );
        decoder.handle_msg(MSG_RECV_PACKET, &recv_msg("uatom"), Some(&log)).unwrap();
        assert!(decoder.parse_relevant_data().is_empty());
    }

    #[test]
    fn error_ack_refunds_sender() {
        let mut ok = Acknowledgement::default();
        let mut failed = Acknowledgement::default();
        let log = log_with_action("acknowledge_packet", vec![]);
        let mut msg = recv_msg("uosmo");
        msg["acknowledgement"] = json!(STANDARD.encode(r#"{"result":"AQ=="}"#));
        ok.handle_msg(MSG_ACKNOWLEDGEMENT, &msg, Some(&log)).unwrap();
        assert!(ok.parse_relevant_data().is_empty());

        msg["acknowledgement"] = json!(STANDARD.encode(r#"{"error":"insufficient funds"}"#));
        failed.handle_msg(MSG_ACKNOWLEDGEMENT, &msg, Some(&log)).unwrap();
        let rows = failed.parse_relevant_data();
        assert_eq!(rows[0].receiver, "cosmos1s");
        assert_eq!(rows[0].denom_received.as_deref(), Some("uosmo"));
    }
}
