//! Placeholder collaborator used when yt-dlp cannot be found

use async_trait::async_trait;

use super::traits::{
    FetchOutput, FetchRequest, Fetcher, ListRequest, Listing, MemberLister, ProgressSink,
};
use crate::error::FetchError;

/// Fails every request with a permanent error
///
/// Lets the engine start (and answer status queries, accept submissions) on a machine
/// without yt-dlp. Tasks fail terminally with a message telling the operator what is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolUnavailable;

const MESSAGE: &str = "yt-dlp is not installed or not on PATH";

#[async_trait]
impl Fetcher for ToolUnavailable {
    async fn fetch(
        &self,
        _request: FetchRequest,
        _progress: ProgressSink,
    ) -> Result<FetchOutput, FetchError> {
        Err(FetchError::Permanent(MESSAGE.to_string()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

#[async_trait]
impl MemberLister for ToolUnavailable {
    async fn list_members(&self, _request: ListRequest) -> Result<Listing, FetchError> {
        Err(FetchError::Permanent(MESSAGE.to_string()))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskId, TaskOptions};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn every_fetch_fails_permanently() {
        let request = FetchRequest {
            task_id: TaskId::new(),
            target: "https://example.com/v".into(),
            options: Arc::new(TaskOptions::default()),
            attempt: 0,
            cancel: CancellationToken::new(),
        };
        let err = ToolUnavailable
            .fetch(request, ProgressSink::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[tokio::test]
    async fn listing_fails_permanently() {
        let request = ListRequest {
            target: "https://example.com/playlist".into(),
            range: None,
            cancel: CancellationToken::new(),
        };
        assert!(ToolUnavailable.list_members(request).await.is_err());
    }
}
