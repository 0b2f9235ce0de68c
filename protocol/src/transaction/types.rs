//! Directives (commands) and validity windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::crypto::PublicKey;
use crate::ledger::{DiligenceStatus, IssuedTokenType, LinearId};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenAction {
    Issue,
    Move,
    Redeem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetTypeCommand {
    Create,
    Update,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalCommand {
    Offer,
    Accept,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiligenceCommand {
    Prepare,
    /// Asks the oracle to vouch that `token_id` currently has `status`.
    Certify {
        token_id: LinearId,
        status: DiligenceStatus,
    },
    Drop,
}

/// The typed intent of a directive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandData {
    /// Issue, move or redeem tokens of one issued type.
    Token {
        action: TokenAction,
        token: IssuedTokenType,
    },
    AssetType(AssetTypeCommand),
    Proposal(ProposalCommand),
    Diligence(DiligenceCommand),
}

impl CommandData {
    pub fn token(action: TokenAction, token: IssuedTokenType) -> Self {
        CommandData::Token { action, token }
    }

    pub fn certify(token_id: LinearId, status: DiligenceStatus) -> Self {
        CommandData::Diligence(DiligenceCommand::Certify { token_id, status })
    }

    pub fn is_certify(&self) -> bool {
        matches!(
            self,
            CommandData::Diligence(DiligenceCommand::Certify { .. })
        )
    }
}

impl fmt::Display for CommandData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandData::Token { action, token } => write!(f, "{:?} {}", action, token.token_type),
            CommandData::AssetType(c) => write!(f, "AssetType::{:?}", c),
            CommandData::Proposal(c) => write!(f, "Proposal::{:?}", c),
            CommandData::Diligence(DiligenceCommand::Certify { token_id, status }) => {
                write!(f, "Diligence::Certify({}, {})", token_id, status)
            }
            CommandData::Diligence(c) => write!(f, "Diligence::{:?}", c),
        }
    }
}

/// A directive and the keys that must sign for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub value: CommandData,
    /// Sorted and deduplicated.
    pub signers: Vec<PublicKey>,
}

impl Command {
    pub fn new(value: CommandData, signers: impl IntoIterator<Item = PublicKey>) -> Self {
        let signers: BTreeSet<PublicKey> = signers.into_iter().collect();
        Self {
            value,
            signers: signers.into_iter().collect(),
        }
    }

    pub fn requires(&self, key: &PublicKey) -> bool {
        self.signers.contains(key)
    }
}

// ---------------------------------------------------------------------------
// TimeWindow
// ---------------------------------------------------------------------------

/// Interval during which a transaction may be notarised: `from` is
/// inclusive, `until` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn until_only(until: DateTime<Utc>) -> Self {
        Self {
            from: None,
            until: Some(until),
        }
    }

    pub fn from_only(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: None,
        }
    }

    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| instant >= from)
            && self.until.map_or(true, |until| instant < until)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_bound = |b: Option<DateTime<Utc>>| b.map_or("-".to_string(), |t| t.to_rfc3339());
        write!(f, "[{}, {})", fmt_bound(self.from), fmt_bound(self.until))
    }
}
