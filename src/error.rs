use thiserror::Error;

/// Failure taxonomy for the runtime core.
///
/// Parsing failures never surface here — malformed inbound traffic is
/// dropped at the channel with a warning. Everything else is returned to
/// the immediate caller or task; the core never retries on its own.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Lookup for a key nobody registered. Fatal to the caller unless caught.
    #[error("no {type_name} registered under key {key}")]
    NotFound {
        type_name: &'static str,
        key: String,
    },

    /// A second `init` for a key that already owns a live instance.
    #[error("{type_name} already initialized for key {key}")]
    AlreadyInitialized {
        type_name: &'static str,
        key: String,
    },

    /// Two motors on one bus resolved to the same command frame position.
    #[error("command slot conflict on {bus}: bucket {bucket:#x} slot {slot} already taken")]
    SlotConflict { bus: String, bucket: u16, slot: u8 },

    /// Outbound payload exceeds the transport frame limit. Programmer error.
    #[error("payload of {len} bytes exceeds frame limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A buffer that cannot be framed or decoded as expected.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Construction-time parameter validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// OS-level read/write failure. Terminates the owning channel's task.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}

impl CoreError {
    /// True for errors a receive loop treats as fatal to its channel.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }
}
