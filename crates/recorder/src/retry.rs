use std::time::Duration;

use crate::{AnchorInfo, AnchorSite, SiteError};

/// Look up anchor info, retrying failures after a fixed delay.
///
/// Makes at most `max_retries + 1` calls and returns the last error unchanged
/// once they are used up.
pub async fn try_get_anchor_info(
    site: &dyn AnchorSite,
    max_retries: u32,
    delay: Duration,
) -> Result<AnchorInfo, SiteError> {
    let mut attempt = 0u32;
    loop {
        match site.get_anchor_info().await {
            Ok(info) => return Ok(info),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                log::info!(
                    "Retrying anchor info for {} ({}/{}): {}",
                    site.anchor(),
                    attempt,
                    max_retries,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
