use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::helpers::starboard::Database;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Drops expired starboard links so the table does not grow without bound.
/// Only the mapping goes; highlight messages older than the TTL stay up.
pub async fn link_sweeper(db: Database) {
    loop {
        sleep(SWEEP_INTERVAL).await;

        match db.purge_expired_links().await {
            Ok(0) => {}
            Ok(purged) => debug!("purged {purged} expired starboard links"),
            Err(err) => warn!("failed to purge expired starboard links: {err}"),
        }
    }
}
