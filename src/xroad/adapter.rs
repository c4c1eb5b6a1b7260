use crate::error::CollectorError;
use crate::identity::ServerIdentity;
use crate::schema::FetchBatch;

/// BatchFetcher is the seam between:
/// - The generic collection engine (queue, workers, cursors)
/// - The wire protocol used to query a security server
///
/// Each implementation must:
/// - Query one server for records in `[records_from, records_to]`
/// - Decode the response into a `FetchBatch`
/// - Report transport and decode failures as distinct errors
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One instance is shared by all workers
///
#[async_trait::async_trait]
pub trait BatchFetcher: Send + Sync {

    /// Fetches one batch of monitoring records.
    ///
    /// PARAMETERS:
    /// - `identity`: the server to query
    /// - `records_from`: cursor position, a server token or a Unix timestamp
    /// - `records_to`: window end as a Unix timestamp (seconds)
    ///
    /// MUST NOT:
    /// - Touch cursors or sinks
    /// - Retry internally (the next scheduled run retries)
    ///
    /// The caller bounds the call with the configured timeout.
    async fn fetch_batch(
        &self,
        identity: &ServerIdentity,
        records_from: &str,
        records_to: i64,
    ) -> Result<FetchBatch, CollectorError>;
}
