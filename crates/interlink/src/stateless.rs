//! Deterministic IDs for stateless async calls
//!
//! ```text
//! callback id       = "{interface}:~:{use_case}"
//! method id         = hex(xxh64("{method}({type1,type2,...})"))
//! request-reply id  = "{callback id}#{method id}"
//! ```
//!
//! The IDs depend only on static names, so a restarted consumer that
//! registers the same callback under the same use case receives replies to
//! requests sent by its previous incarnation.

use std::hash::Hasher;
use twox_hash::XxHash64;
use crate::method::MethodDescriptor;
use crate::types::ParticipantId;

const USE_CASE_SEPARATOR: &str = ":~:";

/// Fixed identity and use case under which stateless calls are issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatelessBinding {
    /// Pre-registered participant ID used as sender of every stateless request
    pub participant_id: ParticipantId,
    pub interface_name: String,
    pub use_case: String,
}

impl StatelessBinding {
    pub fn new(
        participant_id: impl Into<ParticipantId>,
        interface_name: impl Into<String>,
        use_case: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            interface_name: interface_name.into(),
            use_case: use_case.into(),
        }
    }

    pub fn callback_id(&self) -> String {
        StatelessAsyncIdCalculator::callback_id(&self.interface_name, &self.use_case)
    }
}

pub struct StatelessAsyncIdCalculator;

impl StatelessAsyncIdCalculator {
    pub fn callback_id(interface_name: &str, use_case: &str) -> String {
        format!("{}{}{}", interface_name, USE_CASE_SEPARATOR, use_case)
    }

    pub fn method_id(method: &MethodDescriptor) -> String {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(method.signature().as_bytes());
        format!("{:016x}", hasher.finish())
    }

    pub fn request_reply_id(binding: &StatelessBinding, method: &MethodDescriptor) -> String {
        format!("{}#{}", binding.callback_id(), Self::method_id(method))
    }

    /// Split a stateless request-reply ID into callback ID and method ID
    pub fn split(request_reply_id: &str) -> Option<(&str, &str)> {
        let (callback_id, method_id) = request_reply_id.split_once('#')?;
        if !callback_id.contains(USE_CASE_SEPARATOR) {
            return None;
        }
        Some((callback_id, method_id))
    }
}
