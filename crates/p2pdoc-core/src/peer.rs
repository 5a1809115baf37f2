//! Peer identifiers.
//!
//! A [`PeerId`] is an opaque, stable, globally-unique byte string chosen by a
//! peer at startup (conventionally `name@ip`). It is compared bytewise and
//! used as a tiebreaker wherever CRDT positions or wave/link bookkeeping need
//! a total order over peers.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ContractError;

static PEER_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+@(?:\d{1,3}\.){3}\d{1,3}$").expect("valid regex"));

/// Opaque peer identifier, ordered and hashed bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// The reserved author tag used by sentinel positions (`"$"`).
    pub const SENTINEL: &'static str = "$";

    /// Validate and construct a peer id of the form `name@a.b.c.d`.
    pub fn parse(address: &str) -> Result<Self, ContractError> {
        if !PEER_ADDRESS_RE.is_match(address) {
            return Err(ContractError::InvalidPeerAddress {
                address: address.to_string(),
            });
        }
        Ok(Self(address.to_string()))
    }

    /// Construct a peer id without validation. Used for internal sentinels
    /// (`"$"`) and test fixtures that intentionally fall outside the
    /// `name@ip` address grammar.
    pub fn new_unchecked(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the underlying bytes for bytewise comparison.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `ip` half of a `name@ip` address, for peers carrying one. `None`
    /// for the sentinel id, which has no `@`.
    pub fn host(&self) -> Option<&str> {
        self.0.split('@').nth(1)
    }

    /// The sentinel author used by `Position::begin`/`Position::end`.
    pub fn sentinel() -> Self {
        Self(Self::SENTINEL.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_address() {
        assert!(PeerId::parse("alice@10.0.0.1").is_ok());
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(matches!(
            PeerId::parse("alice"),
            Err(ContractError::InvalidPeerAddress { .. })
        ));
        assert!(PeerId::parse("alice@10.0.0").is_err());
        assert!(PeerId::parse("@10.0.0.1").is_err());
    }

    #[test]
    fn orders_bytewise() {
        let a = PeerId::new_unchecked("a@1.1.1.1");
        let b = PeerId::new_unchecked("b@1.1.1.1");
        assert!(a < b);
    }
}
