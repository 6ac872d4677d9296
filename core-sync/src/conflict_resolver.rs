//! # Conflict Resolver
//!
//! Decides which side of a list sync is authoritative.
//!
//! ## Policies
//!
//! - **primary-to-clients**: the primary is the source for every other
//!   client and is never written to.
//! - **clients-to-primary**: every other client, in listing order, is a
//!   source and the primary is the target.
//! - **bidirectional**: every pair of clients is compared list by list; the
//!   most recently modified copy is the source.
//!
//! ## Ties
//!
//! When both copies carry the same modification time, or neither carries one,
//! the left side of the pair wins. Pairs are built with the primary first
//! (when one is configured) and otherwise in listing order, so the primary
//! or else the earlier-listed client is preferred.

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use core_library::ClientId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    PrimaryToClients,
    ClientsToPrimary,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::PrimaryToClients => "primary-to-clients",
            SyncDirection::ClientsToPrimary => "clients-to-primary",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn requires_primary(&self) -> bool {
        !matches!(self, SyncDirection::Bidirectional)
    }
}

impl FromStr for SyncDirection {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "primary-to-clients" => Ok(SyncDirection::PrimaryToClients),
            "clients-to-primary" => Ok(SyncDirection::ClientsToPrimary),
            "bidirectional" => Ok(SyncDirection::Bidirectional),
            _ => Err(SyncError::invalid_value("direction", s)),
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One step of a list sync plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairPlan {
    /// Push every list of `source` to `target`
    Directed { source: ClientId, target: ClientId },
    /// Compare the two clients list by list; ties go to `left`
    Compare { left: ClientId, right: ClientId },
}

impl PairPlan {
    pub fn involves(&self, client: ClientId) -> bool {
        match *self {
            PairPlan::Directed { source, target } => source == client || target == client,
            PairPlan::Compare { left, right } => left == client || right == client,
        }
    }

    /// Clients that may receive writes
    pub fn writable(&self) -> Vec<ClientId> {
        match *self {
            PairPlan::Directed { target, .. } => vec![target],
            PairPlan::Compare { left, right } => vec![left, right],
        }
    }
}

/// Modification state of one copy of a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListVersion {
    pub client_id: ClientId,
    pub last_modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictResolver {
    direction: SyncDirection,
    primary: Option<ClientId>,
}

impl ConflictResolver {
    pub fn new(direction: SyncDirection, primary: Option<ClientId>) -> Self {
        Self { direction, primary }
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    /// Build the ordered pair plan for `clients`, given in listing order.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the policy needs a primary and none of
    /// `clients` is it.
    pub fn plan(&self, clients: &[ClientId]) -> Result<Vec<PairPlan>> {
        match self.direction {
            SyncDirection::PrimaryToClients => {
                let primary = self.primary_in(clients)?;
                Ok(clients
                    .iter()
                    .filter(|c| **c != primary)
                    .map(|c| PairPlan::Directed {
                        source: primary,
                        target: *c,
                    })
                    .collect())
            }
            SyncDirection::ClientsToPrimary => {
                let primary = self.primary_in(clients)?;
                Ok(clients
                    .iter()
                    .filter(|c| **c != primary)
                    .map(|c| PairPlan::Directed {
                        source: *c,
                        target: primary,
                    })
                    .collect())
            }
            SyncDirection::Bidirectional => {
                let mut ordered: Vec<ClientId> = Vec::with_capacity(clients.len());
                if let Some(primary) = self.primary.filter(|p| clients.contains(p)) {
                    ordered.push(primary);
                }
                for client in clients {
                    if !ordered.contains(client) {
                        ordered.push(*client);
                    }
                }

                let mut plan = Vec::new();
                for (i, left) in ordered.iter().enumerate() {
                    for right in &ordered[i + 1..] {
                        plan.push(PairPlan::Compare {
                            left: *left,
                            right: *right,
                        });
                    }
                }
                Ok(plan)
            }
        }
    }

    /// Pick the source side for one list of a compared pair. `None` when the
    /// list exists on neither side.
    pub fn resolve(&self, left: Option<&ListVersion>, right: Option<&ListVersion>) -> Option<Side> {
        match (left, right) {
            (None, None) => None,
            (Some(_), None) => Some(Side::Left),
            (None, Some(_)) => Some(Side::Right),
            (Some(l), Some(r)) => {
                if r.last_modified_at > l.last_modified_at {
                    Some(Side::Right)
                } else {
                    Some(Side::Left)
                }
            }
        }
    }

    fn primary_in(&self, clients: &[ClientId]) -> Result<ClientId> {
        match self.primary {
            Some(primary) if clients.contains(&primary) => Ok(primary),
            Some(primary) => Err(SyncError::Configuration(format!(
                "{} sync: primary client {} is not available",
                self.direction, primary
            ))),
            None => Err(SyncError::Configuration(format!(
                "{} sync requires a primary client",
                self.direction
            ))),
        }
    }
}
