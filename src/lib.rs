// SliceDB - Rust Implementation
// Slice-partitioned view storage for a distributed bitmap index

#![warn(rust_2018_idioms)]

pub mod attr;
pub mod config;
pub mod ctl;
pub mod stats;
pub mod storage;

// Re-exports for convenience
pub use attr::AttrStore;
pub use config::Config;
pub use stats::{MetricsStatsClient, NopStatsClient, StatsClient};
pub use storage::{
    is_view_inverted, slice_of, FileFragment, Fragment, View, ViewInfo, SLICE_WIDTH,
    VIEW_INVERSE, VIEW_STANDARD,
};

/// SliceDB error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("open fragment: slice={slice}, err={source}")]
        OpenFragment {
            slice: u64,
            #[source]
            source: Box<Error>,
        },

        #[error("Corrupt fragment: {0}")]
        CorruptFragment(String),

        #[error("Fragment closed: slice={0}")]
        FragmentClosed(u64),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Invalid state: {0}")]
        InvalidState(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Serialization error: {0}")]
        SerializationError(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_open_fragment_error_names_slice() {
        let err = Error::OpenFragment {
            slice: 7,
            source: Box::new(Error::CorruptFragment("truncated record".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("slice=7"));
        assert!(msg.contains("truncated record"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
