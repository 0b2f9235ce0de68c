//! Ownership records: fungible amounts and unique tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::LinearId;
use crate::identity::{AbstractParty, Party};

/// What a token denominates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenType {
    /// A fixed definition such as a currency.
    Fixed { code: String, fraction_digits: u8 },
    /// A pointer to an evolvable [`AssetType`](super::proposal::AssetType)
    /// by its linear id. The description can change without the token
    /// changing.
    Pointer { asset_type: LinearId },
}

impl TokenType {
    pub fn fixed(code: impl Into<String>, fraction_digits: u8) -> Self {
        TokenType::Fixed {
            code: code.into(),
            fraction_digits,
        }
    }

    pub fn usd() -> Self {
        Self::fixed("USD", 2)
    }

    pub fn pointer(asset_type: LinearId) -> Self {
        TokenType::Pointer { asset_type }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Fixed { code, .. } => f.write_str(code),
            TokenType::Pointer { asset_type } => write!(f, "ptr:{}", asset_type),
        }
    }
}

/// A token type together with the party that issued it. Amounts from
/// different issuers are never interchangeable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssuedTokenType {
    pub issuer: Party,
    pub token_type: TokenType,
}

impl IssuedTokenType {
    pub fn new(issuer: Party, token_type: TokenType) -> Self {
        Self { issuer, token_type }
    }
}

impl fmt::Display for IssuedTokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issued by {}", self.token_type, self.issuer)
    }
}

/// A quantity of an issued token, used for prices.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuedAmount {
    pub quantity: u64,
    pub token: IssuedTokenType,
}

impl IssuedAmount {
    pub fn new(quantity: u64, token: IssuedTokenType) -> Self {
        Self { quantity, token }
    }
}

/// A fungible holding. Quantities are in the token's smallest unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FungibleToken {
    pub issued: IssuedTokenType,
    pub holder: AbstractParty,
    pub amount: u64,
}

impl FungibleToken {
    pub fn new(issued: IssuedTokenType, holder: AbstractParty, amount: u64) -> Self {
        Self {
            issued,
            holder,
            amount,
        }
    }

    /// Same token, new holder and amount.
    pub fn with_holder(&self, holder: AbstractParty, amount: u64) -> Self {
        Self {
            issued: self.issued.clone(),
            holder,
            amount,
        }
    }
}

/// A non-fungible holding with a stable identity across transfers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueToken {
    pub linear_id: LinearId,
    pub issued: IssuedTokenType,
    pub holder: AbstractParty,
}

impl UniqueToken {
    pub fn new(issued: IssuedTokenType, holder: AbstractParty) -> Self {
        Self {
            linear_id: LinearId::new(),
            issued,
            holder,
        }
    }

    /// The same token held by someone else. Identity is preserved.
    pub fn with_new_holder(&self, holder: AbstractParty) -> Self {
        Self {
            linear_id: self.linear_id,
            issued: self.issued.clone(),
            holder,
        }
    }
}
