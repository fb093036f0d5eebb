use async_trait::async_trait;

use eventmill_events::Event;

use crate::storage::WriteBatch;

/// Read-model update committed together with the save that produced the
/// events.
///
/// Called once per appended stream, in append order, before the batch is
/// committed. Writes go into `batch`; returning an error aborts the save and
/// nothing is written.
#[async_trait]
pub trait LiveProjection: Send + Sync {
    fn name(&self) -> &str;

    async fn project(&self, stream: &str, events: &[Event], batch: &mut WriteBatch) -> anyhow::Result<()>;
}
