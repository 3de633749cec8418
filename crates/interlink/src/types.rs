//! Identity and addressing types
//!
//! - [`ParticipantId`]: routing key of one proxy or provider endpoint
//! - [`ProviderEntry`]: one resolved provider plus its visibility
//! - [`ResolvedTargets`]: the provider set a logical call addresses after discovery
//! - [`MessagingQos`]: per-call messaging settings

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use crate::error::{Error, Result};

/// Opaque, stable identity of one endpoint
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random participant ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Where a provider is reachable from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Registered in this process or cluster controller only
    Local,
    /// Registered in the global directory
    Global,
}

/// A provider selected by arbitration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEntry {
    pub participant_id: ParticipantId,
    pub visibility: Visibility,
}

impl ProviderEntry {
    pub fn new(participant_id: impl Into<ParticipantId>, visibility: Visibility) -> Self {
        Self {
            participant_id: participant_id.into(),
            visibility,
        }
    }

    pub fn local(participant_id: impl Into<ParticipantId>) -> Self {
        Self::new(participant_id, Visibility::Local)
    }

    pub fn global(participant_id: impl Into<ParticipantId>) -> Self {
        Self::new(participant_id, Visibility::Global)
    }

    pub fn is_local(&self) -> bool {
        self.visibility == Visibility::Local
    }
}

/// Set of providers a logical call addresses
///
/// Participant IDs are unique within the set; a later entry with the same ID
/// replaces the visibility of the earlier one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedTargets {
    entries: Vec<ProviderEntry>,
}

impl ResolvedTargets {
    pub fn new(entries: impl IntoIterator<Item = ProviderEntry>) -> Self {
        let mut targets = Self::default();
        for entry in entries {
            targets.insert(entry);
        }
        targets
    }

    /// Convenience constructor for a single provider
    pub fn single(entry: ProviderEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    pub fn insert(&mut self, entry: ProviderEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.participant_id == entry.participant_id)
        {
            Some(existing) => existing.visibility = entry.visibility,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter()
    }

    pub fn participant_ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.entries.iter().map(|e| &e.participant_id)
    }

    /// The one provider of a request/reply call
    ///
    /// Fails with [`Error::NoTarget`] for an empty set and
    /// [`Error::AmbiguousTarget`] for more than one member.
    pub fn exactly_one(&self, operation: &str) -> Result<&ProviderEntry> {
        match self.entries.as_slice() {
            [] => Err(Error::NoTarget(operation.to_string())),
            [entry] => Ok(entry),
            entries => Err(Error::AmbiguousTarget {
                operation: operation.to_string(),
                count: entries.len(),
            }),
        }
    }

    /// Require at least one provider (fan-out operations)
    pub fn require_any(&self, operation: &str) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::NoTarget(operation.to_string()));
        }
        Ok(())
    }
}

impl FromIterator<ProviderEntry> for ResolvedTargets {
    fn from_iter<I: IntoIterator<Item = ProviderEntry>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Per-call messaging settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagingQos {
    /// Round trip time-to-live; falls back to the configured default when unset
    pub ttl: Option<Duration>,
    /// Custom headers copied into every outbound message of the call
    pub custom_headers: BTreeMap<String, String>,
}

impl MessagingQos {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            custom_headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }
}
