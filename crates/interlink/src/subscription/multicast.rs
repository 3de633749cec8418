//! Multicast IDs and partition wildcards
//!
//! A multicast ID names one broadcast of one provider, optionally narrowed by
//! partitions: `provider/broadcast/partition1/partition2`. Subscribers may use
//! `+` for exactly one partition level and a trailing `*` for any number of
//! remaining levels (including none).

use crate::error::{Error, Result};
use crate::types::ParticipantId;

pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "*";

const SEPARATOR: char = '/';

/// Collaborator that wires multicast publications to subscribers
pub trait MulticastReceiverRegistrar: Send + Sync {
    fn add_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber: &ParticipantId,
        provider: &ParticipantId,
    ) -> Result<()>;

    fn remove_multicast_receiver(
        &self,
        multicast_id: &str,
        subscriber: &ParticipantId,
        provider: &ParticipantId,
    ) -> Result<()>;
}

/// Check partition names of a subscription
///
/// Partitions are alphanumeric; `+` may appear anywhere and `*` only last.
pub fn validate_partitions(partitions: &[String]) -> Result<()> {
    for (index, partition) in partitions.iter().enumerate() {
        let valid = match partition.as_str() {
            SINGLE_LEVEL_WILDCARD => true,
            MULTI_LEVEL_WILDCARD => index + 1 == partitions.len(),
            other => !other.is_empty() && other.chars().all(|c| c.is_ascii_alphanumeric()),
        };
        if !valid {
            return Err(Error::IllegalState(format!(
                "invalid multicast partition {:?} at position {}",
                partition, index
            )));
        }
    }
    Ok(())
}

/// Build the multicast ID of a provider broadcast
pub fn multicast_id(provider: &ParticipantId, broadcast_name: &str, partitions: &[String]) -> String {
    let mut id = format!("{}{}{}", provider, SEPARATOR, broadcast_name);
    for partition in partitions {
        id.push(SEPARATOR);
        id.push_str(partition);
    }
    id
}

/// Compiled multicast subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastPattern {
    id: String,
    segments: Vec<String>,
}

impl MulticastPattern {
    pub fn new(multicast_id: impl Into<String>) -> Self {
        let id = multicast_id.into();
        let segments = id.split(SEPARATOR).map(str::to_string).collect();
        Self { id, segments }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s == SINGLE_LEVEL_WILDCARD || s == MULTI_LEVEL_WILDCARD)
    }

    /// Does a published multicast ID fall under this pattern
    pub fn matches(&self, multicast_id: &str) -> bool {
        let mut published = multicast_id.split(SEPARATOR);
        for segment in &self.segments {
            match segment.as_str() {
                MULTI_LEVEL_WILDCARD => return true,
                SINGLE_LEVEL_WILDCARD => {
                    if published.next().is_none() {
                        return false;
                    }
                }
                literal => {
                    if published.next() != Some(literal) {
                        return false;
                    }
                }
            }
        }
        published.next().is_none()
    }
}
