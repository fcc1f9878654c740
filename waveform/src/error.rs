use std::io;

/// Result type returned by every codec operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while loading, inspecting, or saving a waveform.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The stream did not conform to the wire format: a mandatory tag is missing, a
    /// length-prefixed section is malformed, or a value fails to parse.
    #[error("{0}")]
    Format(String),

    /// The requested operation is not supported for the given waveform shape, e.g. a
    /// metadata-only load on a format with no metadata, or a chunked load on a
    /// multi-segment/multi-channel waveform.
    #[error("{0}")]
    Configuration(String),

    /// A chunked load's window does not fit inside the available samples.
    #[error(
        "requested {requested} sample(s) at offset {offset}, but only {available} \
         sample(s) are available"
    )]
    Range {
        requested: usize,
        offset: usize,
        available: usize,
    },

    #[error(transparent)]
    Io(Box<io::Error>),
}

crate::from_error_boxed!(Error::Io, io::Error);

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
