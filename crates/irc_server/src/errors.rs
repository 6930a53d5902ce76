use thiserror::Error;

/// Failures that abort the process before the reactor loop ever starts.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config at {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("mio poll setup failed: {0}")]
    Poll(#[source] std::io::Error),
}

/// Reported by [`crate::message::FrameBuffer::feed`] when a line exceeds the
/// wire length ceiling. The only structured error the frame buffer raises —
/// a malformed line is just dropped with a debug log (§4.1), never reported
/// up as a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("line exceeded the maximum length")]
    LineTooLong,
}
