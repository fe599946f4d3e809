//! MessageRouter: bridges the real-time transport's callback surface
//! (inbound data, inbound audio, participant/turn events) to the protocol
//! handler, the generation registry, and the business dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use transport_core::traits::{AsrService, MessageDispatcher};
use transport_core::{GenerationRegistry, ProtocolHandler};
use transport_proto::{decode, Envelope, EnvelopeBody, ErrorCode, Transcription};

/// A buffered, voice-activity-aware audio pipeline. When wired, audio frames
/// go here instead of through a single-shot ASR call per frame; the pipeline
/// calls back into [`MessageRouter::on_transcription`] as it produces text.
#[async_trait]
pub trait VoicePipeline: Send + Sync {
    async fn push_audio(&self, frame: Vec<u8>);
}

pub struct MessageRouter {
    handler: Arc<ProtocolHandler>,
    registry: Arc<GenerationRegistry>,
    dispatcher: Arc<dyn MessageDispatcher>,
    asr: Option<Arc<dyn AsrService>>,
    voice_pipeline: Option<Arc<dyn VoicePipeline>>,
    sample_rate: u32,
    channels: u16,
}

impl MessageRouter {
    pub fn new(
        handler: Arc<ProtocolHandler>,
        registry: Arc<GenerationRegistry>,
        dispatcher: Arc<dyn MessageDispatcher>,
        asr: Option<Arc<dyn AsrService>>,
        voice_pipeline: Option<Arc<dyn VoicePipeline>>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            handler,
            registry,
            dispatcher,
            asr,
            voice_pipeline,
            sample_rate,
            channels,
        }
    }

    /// Inbound frame from the transport. Decodes, updates the client cursor
    /// for client-originated stanza ids, then hands the envelope to the
    /// dispatcher. A decode failure is reported back to the peer as a
    /// recoverable `MalformedData` error.
    pub async fn on_data_received(&self, bytes: &[u8]) {
        let envelope = match decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to decode inbound frame");
                if let Err(send_err) = self
                    .handler
                    .send_error(ErrorCode::MalformedData, "malformed envelope", true)
                    .await
                {
                    warn!(error = %send_err, "failed to report malformed envelope to peer");
                }
                return;
            }
        };

        if envelope.is_client_originated() {
            self.handler.update_client_stanza_id(envelope.stanza_id).await;
        }

        if let Err(e) = self.dispatcher.dispatch_message(envelope).await {
            warn!(error = %e, "business dispatch failed");
        }
    }

    /// Inbound audio frame. Prefers the buffered voice pipeline when wired;
    /// otherwise falls back to a single-shot transcription call.
    pub async fn on_audio_received(&self, frame: Vec<u8>) {
        if let Some(pipeline) = &self.voice_pipeline {
            pipeline.push_audio(frame).await;
            return;
        }

        let Some(asr) = &self.asr else {
            warn!("audio frame received with no ASR service or voice pipeline wired");
            return;
        };

        let format = format!("pcm_{}_{}", self.sample_rate, self.channels);
        match asr.transcribe(frame, format).await {
            Ok(transcript) if !transcript.text.is_empty() => {
                self.on_transcription(Transcription {
                    text: transcript.text,
                    confidence: transcript.confidence,
                    language: transcript.language,
                    is_final: true,
                })
                .await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "single-shot transcription failed"),
        }
    }

    pub fn on_participant_connected(&self, participant_id: &str) {
        info!(participant_id, "participant connected");
    }

    pub fn on_participant_disconnected(&self, participant_id: &str) {
        info!(participant_id, "participant disconnected");
    }

    /// New user turn: pre-empt any in-flight assistant response.
    pub async fn on_turn_start(&self) {
        if let Err(e) = self.registry.cancel_generation("").await {
            warn!(error = %e, "failed to pre-empt in-flight generation on turn start");
        }
    }

    pub fn on_turn_end(&self, duration_ms: u64) {
        info!(duration_ms, "turn ended");
    }

    /// Called by the voice pipeline as it produces (possibly partial)
    /// transcripts. The envelope is always sent to the peer; a final
    /// transcript is additionally dispatched as a user message.
    pub async fn on_transcription(&self, transcript: Transcription) {
        let is_final = transcript.is_final;
        let envelope = Envelope::new(
            0,
            self.handler.conversation_id(),
            EnvelopeBody::Transcription(transcript),
        );

        let sent = match self.handler.send(envelope).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "failed to send transcription envelope");
                return;
            }
        };

        if is_final {
            if let Err(e) = self.dispatcher.dispatch_message(sent).await {
                warn!(error = %e, "failed to dispatch final transcription as user turn");
            }
        }
    }
}
