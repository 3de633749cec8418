//! Method descriptors
//!
//! Generated proxies describe each method with one flat [`MethodDescriptor`];
//! the dispatcher looks at nothing else of the signature.

/// Call pattern of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Fire-and-forget, no reply
    OneWay,
    /// Caller blocks until the reply or the TTL
    Sync,
    /// Completion callback plus future
    Async,
    /// Reply routed to a statically registered callback
    StatelessAsync,
}

/// Signature metadata of one proxy method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub kind: MethodKind,
    /// Wire type names of the parameters, in declaration order
    pub param_datatypes: Vec<String>,
    /// Designated completion-callback parameter present
    pub has_callback: bool,
    /// Designated message-id-callback parameter present
    pub has_message_id_callback: bool,
    /// Interface contract declares typed application errors
    pub has_modeled_errors: bool,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            kind,
            param_datatypes: Vec::new(),
            has_callback: false,
            has_message_id_callback: false,
            has_modeled_errors: false,
        }
    }

    pub fn one_way(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::OneWay)
    }

    pub fn sync(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Sync)
    }

    /// Async method with a completion callback parameter
    pub fn async_with_callback(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::Async).with_callback()
    }

    /// Stateless async method with a message-id callback parameter
    pub fn stateless(name: impl Into<String>) -> Self {
        Self::new(name, MethodKind::StatelessAsync).with_message_id_callback()
    }

    pub fn with_params<I, S>(mut self, datatypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_datatypes = datatypes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_callback(mut self) -> Self {
        self.has_callback = true;
        self
    }

    pub fn with_message_id_callback(mut self) -> Self {
        self.has_message_id_callback = true;
        self
    }

    pub fn with_modeled_errors(mut self) -> Self {
        self.has_modeled_errors = true;
        self
    }

    /// `name(Type1,Type2)`
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.param_datatypes.join(","))
    }
}
