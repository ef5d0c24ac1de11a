use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// An on-chain amount paired with its base denomination. Amounts are kept as
/// integers in a BigDecimal so 256-bit values survive unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub amount: BigDecimal,
    pub denom: String,
}

impl Coin {
    pub fn new(amount: BigDecimal, denom: impl Into<String>) -> Self {
        Coin {
            amount,
            denom: denom.into(),
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Coin as it appears in message bodies: `{"denom": "uosmo", "amount": "100"}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct JsonCoin {
    #[serde(default)]
    pub denom: String,
    #[serde(default)]
    pub amount: String,
}

impl TryFrom<&JsonCoin> for Coin {
    type Error = DecodeError;

    fn try_from(c: &JsonCoin) -> Result<Self, Self::Error> {
        Ok(Coin::new(parse_amount(&c.amount)?, c.denom.clone()))
    }
}

/// Parse an integer amount. Empty strings are zero; decimals are truncated.
pub fn parse_amount(s: &str) -> Result<BigDecimal, DecodeError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(BigDecimal::zero());
    }
    let value = BigDecimal::from_str(s).map_err(|_| DecodeError::InvalidCoin(s.to_string()))?;
    Ok(value.with_scale(0))
}

/// Parse a single `<amount><denom>` string such as `1000000uatom`.
pub fn parse_coin(s: &str) -> Result<Coin, DecodeError> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .ok_or_else(|| DecodeError::InvalidCoin(s.to_string()))?;
    let (amount, denom) = s.split_at(split);
    let denom = denom.trim();
    if amount.is_empty() || !is_valid_denom(denom) {
        return Err(DecodeError::InvalidCoin(s.to_string()));
    }
    Ok(Coin::new(parse_amount(amount)?, denom))
}

/// Parse a comma separated coin list. An empty string is an empty list.
pub fn parse_coins(s: &str) -> Result<Vec<Coin>, DecodeError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_coin)
        .collect()
}

fn is_valid_denom(denom: &str) -> bool {
    let mut chars = denom.chars();
    let first_is_letter = chars.next().map_or(false, |c| c.is_ascii_alphabetic());
    first_is_letter
        && (3..=128).contains(&denom.len())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_coin() {
        let coin = parse_coin("1000000uatom").unwrap();
        assert_eq!(coin.amount, BigDecimal::from(1_000_000));
        assert_eq!(coin.denom, "uatom");
    }

    #[test]
    fn parses_lists_and_paths() {
        let coins = parse_coins("5uatom,10uosmo, 3ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2").unwrap();
        assert_eq!(coins.len(), 3);
        assert_eq!(coins[1], Coin::new(BigDecimal::from(10), "uosmo"));
        assert!(coins[2].denom.starts_with("ibc/"));

        let shares = parse_coin("100000000000000000000gamm/pool/1").unwrap();
        assert_eq!(shares.denom, "gamm/pool/1");
    }

    #[test]
    fn empty_string_is_empty_list() {
        assert!(parse_coins("").unwrap().is_empty());
        assert_eq!(parse_amount("").unwrap(), BigDecimal::zero());
    }

    #[test]
    fn keeps_256_bit_amounts_exact() {
        let max = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let coin = parse_coin(&format!("{max}wei")).unwrap();
        assert_eq!(coin.amount.to_string(), max);
    }

    #[test]
    fn truncates_decimal_amounts() {
        let coin = parse_coin("12.75uosmo").unwrap();
        assert_eq!(coin.amount, BigDecimal::from(12));
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_coin("uatom").is_err());
        assert!(parse_coin("100").is_err());
        assert!(parse_coin("1009x").is_err());
        assert!(parse_coins("1uatom,bad").is_err());
    }
}
