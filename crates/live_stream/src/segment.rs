use serde::{Deserialize, Serialize};

/// Media segment listed by a live playlist (metadata only, no data)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    /// Segment URL for downloading
    pub url: String,
    /// Media sequence number, when the playlist provides one
    pub sequence: Option<u64>,
    /// Segment duration in seconds
    pub duration: f64,
}

impl Segment {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sequence: None,
            duration: 0.0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// File name part of the URL, without query string
    pub fn file_name(&self) -> &str {
        self.url
            .rsplit('/')
            .next()
            .and_then(|name| name.split('?').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("segment")
    }
}
