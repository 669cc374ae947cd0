//! Outbound notifications: stage status, guide help requests and the
//! completion video trigger.
//!
//! All deliveries are best effort. The flow never fails because a sink is
//! unreachable; callers log the error and carry on.

pub mod status;
pub mod video;

pub use status::{
    BroadcastStatusSink, CompositeStatusSink, HttpStatusSink, NullStatusSink, StatusSink,
    StatusUpdate,
};
pub use video::{
    GuideNotifier, NullGuideNotifier, NullVideoTrigger, VideoRequest, VideoTrigger,
    VideoTriggerClient,
};

use std::time::Duration;

use crate::error::{Result, SphinxError};

/// Client with a per-request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SphinxError::Transport(format!("http client: {e}")))
}

/// POST `body` as JSON to `url`, mapping failures to `Transport`.
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &T,
) -> Result<()> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| SphinxError::Transport(format!("POST {url}: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(SphinxError::Transport(format!(
            "POST {url} returned {status}: {text}"
        )));
    }
    Ok(())
}

/// Join a base URL and a route without doubling slashes.
pub(crate) fn join_url(base: &str, route: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}
