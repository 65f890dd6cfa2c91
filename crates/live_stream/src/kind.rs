use std::fmt;

use serde::{Deserialize, Serialize};

use crate::StreamError;

/// Delivery protocol of a live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Periodically refreshed playlist of short segments (m3u8)
    Segmented,
    /// One long-lived byte stream (flv)
    Continuous,
}

impl StreamKind {
    /// Infer the delivery protocol from the stream URL.
    ///
    /// Matching is a case-insensitive substring test; the continuous marker
    /// wins when both appear.
    pub fn classify(stream_url: &str) -> Result<Self, StreamError> {
        let lower = stream_url.to_lowercase();
        if lower.contains(".flv") {
            Ok(Self::Continuous)
        } else if lower.contains(".m3u8") {
            Ok(Self::Segmented)
        } else {
            Err(StreamError::UnknownFormat(stream_url.to_string()))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segmented => "m3u8",
            Self::Continuous => "flv",
        }
    }

    /// Extension used for files captured from this kind of stream
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Segmented => "ts",
            Self::Continuous => "flv",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
