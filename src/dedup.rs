//! Persist-if-new gateway between the parser and the dispatcher.

use tracing::debug;

use crate::error::CheckError;
use crate::model::{CandidateVideo, Channel, Video};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Newly stored videos, in feed order. Only these may be dispatched.
    pub inserted: Vec<Video>,
    pub already_present: usize,
}

impl IngestOutcome {
    pub fn seen(&self) -> usize {
        self.inserted.len() + self.already_present
    }
}

/// Stores each candidate unless its id is already known. A storage failure
/// stops the channel; rows inserted before it stay committed.
pub async fn ingest(
    store: &Store,
    channel: &Channel,
    candidates: &[CandidateVideo],
) -> Result<IngestOutcome, CheckError> {
    let mut outcome = IngestOutcome::default();
    for candidate in candidates {
        match store
            .insert_video_if_absent(channel.id, candidate)
            .await
            .map_err(CheckError::persistence)?
        {
            Some(video) => {
                debug!(channel = %channel.channel_id, video_id = %video.video_id, "new video");
                outcome.inserted.push(video);
            }
            None => outcome.already_present += 1,
        }
    }
    Ok(outcome)
}
