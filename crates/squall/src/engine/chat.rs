//! Chat orchestrators: paced token delivery, optionally with side context.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{MessageStream, StreamEngine, StreamRequest};
use crate::error::StreamError;
use crate::protocol::ContentType;
use crate::registry::StreamType;
use crate::source::{ChatPrompt, ContextUpdate, SideContextUpdater, TokenSource};

impl StreamEngine {
    /// `Metadata → Data* → Complete`, or `Metadata → Data* → Error → Complete`
    /// when the token source fails.
    pub fn chat_stream(
        &self,
        request: &StreamRequest,
        prompt: ChatPrompt,
        source: Arc<dyn TokenSource>,
    ) -> Result<MessageStream, StreamError> {
        let pacer = self.pacer;
        self.launch(request, StreamType::Chat, move |mut emitter| async move {
            emitter.metadata(ContentType::Chat).await?;
            let report = pacer.run(source.tokens(&prompt), &mut emitter).await?;
            debug!(stream_id = emitter.stream_id(), ?report, "Chat stream paced");
            Ok(())
        })
    }

    /// Chat stream that first records side context for the client.
    ///
    /// When the prompt names a location the update is spawned detached and a
    /// `Progress(1/1)` reports it; otherwise `Progress(0/1)` reports no change.
    /// The update's outcome never reaches the stream.
    pub fn contextual_chat_stream(
        &self,
        request: &StreamRequest,
        prompt: ChatPrompt,
        source: Arc<dyn TokenSource>,
        updater: Arc<dyn SideContextUpdater>,
    ) -> Result<MessageStream, StreamError> {
        let pacer = self.pacer;
        self.launch(request, StreamType::ContextualChat, move |mut emitter| async move {
            emitter.metadata(ContentType::Chat).await?;

            match prompt.location.clone() {
                Some(location) => {
                    let update = ContextUpdate {
                        client_id: prompt.client_id.clone(),
                        location: location.clone(),
                        message: prompt.message.clone(),
                    };
                    spawn_update(emitter.stream_id().to_string(), updater, update);
                    emitter
                        .progress(1, 1, format!("Context updated for {location}"))
                        .await?;
                }
                None => emitter.progress(0, 1, "No context change").await?,
            }

            let report = pacer.run(source.tokens(&prompt), &mut emitter).await?;
            debug!(stream_id = emitter.stream_id(), ?report, "Contextual chat stream paced");
            Ok(())
        })
    }
}

/// Fire-and-forget side-context update. Failures are logged only.
fn spawn_update(stream_id: String, updater: Arc<dyn SideContextUpdater>, update: ContextUpdate) {
    tokio::spawn(async move {
        let client_id = update.client_id.clone();
        match updater.update(update).await {
            Ok(()) => debug!(%stream_id, %client_id, "Side context updated"),
            Err(e) => warn!(%stream_id, %client_id, "Side context update failed: {e}"),
        }
    });
}
