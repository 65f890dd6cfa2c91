use async_trait::async_trait;

use crate::{Headers, Segment, StreamError};

/// Fetches a live playlist and lists the segments it currently advertises.
///
/// An empty list means the broadcast has ended.
#[async_trait]
pub trait PlaylistDecoder: Send + Sync {
    async fn decode(&self, url: &str, headers: &Headers) -> Result<Vec<Segment>, StreamError>;
}
