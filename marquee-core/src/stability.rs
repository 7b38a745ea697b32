//! Upload stability detection.
//!
//! Create events fire when a file appears, not when its writer is done with
//! it. Before anything reads an upload, the pipeline polls its size until two
//! consecutive probes agree, and treats a timeout as a hard failure so a
//! half-written archive is never opened.

use std::path::Path;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

/// Size reported for files that cannot be stat'ed. Never equal to a real
/// size, so a missing file can never look stable.
const UNREADABLE: i64 = -1;

/// Wait until `path` holds a non-empty file whose size stops changing.
///
/// Probes every `interval` and returns `true` as soon as two consecutive
/// probes report the same non-zero size, `false` once `timeout` has elapsed
/// without that happening.
pub async fn wait_until_stable(path: &Path, timeout: Duration, interval: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut last = file_size(path);

    loop {
        sleep(interval).await;
        let current = file_size(path);
        if current > 0 && current == last {
            return true;
        }
        debug!(
            path = %path.display(),
            last,
            current,
            "upload still settling"
        );
        if Instant::now() >= deadline {
            return false;
        }
        last = current;
    }
}

fn file_size(path: &Path) -> i64 {
    std::fs::metadata(path)
        .map(|meta| meta.len() as i64)
        .unwrap_or(UNREADABLE)
}
