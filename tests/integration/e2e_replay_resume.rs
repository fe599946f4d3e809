//! End-to-end: encode/decode through `transport-proto`, sequencing and resume
//! through `transport-core`'s `ProtocolHandler`, driven the way `services/agent`
//! wires a real sender — but with an in-memory fake standing in for the
//! network.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use transport_core::traits::{AgentSender, ConversationCursor, ConversationRepository, MessageRepository};
use transport_core::{ProtocolHandler, ProtocolHandlerDeps, RepositoryError, SendError};
use transport_proto::{decode, Envelope, EnvelopeBody, UserMessage};

struct FakeConversationRepo {
    cursor: Mutex<ConversationCursor>,
}

#[async_trait]
impl ConversationRepository for FakeConversationRepo {
    async fn get_by_id(&self, _id: &str) -> Result<Option<ConversationCursor>, RepositoryError> {
        Ok(Some(self.cursor.lock().unwrap().clone()))
    }

    async fn update_stanza_ids(&self, _id: &str, client_id: i32, server_id: i32) -> Result<(), RepositoryError> {
        let mut cursor = self.cursor.lock().unwrap();
        if client_id != 0 {
            cursor.last_client_stanza_id = client_id;
        }
        if server_id != 0 {
            cursor.last_server_stanza_id = server_id;
        }
        Ok(())
    }
}

struct EmptyMessageRepo;

#[async_trait]
impl MessageRepository for EmptyMessageRepo {
    async fn get_after_sequence(
        &self,
        _conversation_id: &str,
        _sequence_number: u32,
    ) -> Result<Vec<transport_core::traits::MessageRecord>, RepositoryError> {
        Ok(Vec::new())
    }
}

macro_rules! empty_detail_repo {
    ($name:ident, $trait_:ident, $record:ty) => {
        struct $name;
        #[async_trait]
        impl transport_core::traits::$trait_ for $name {
            async fn get_by_message(&self, _message_id: &str) -> Result<Vec<$record>, RepositoryError> {
                Ok(Vec::new())
            }
        }
    };
}

empty_detail_repo!(EmptySentenceRepo, SentenceRepository, transport_core::traits::SentenceRecord);
empty_detail_repo!(EmptyReasoningRepo, ReasoningStepRepository, transport_core::traits::ReasoningStepRecord);
empty_detail_repo!(EmptyToolUseRepo, ToolUseRepository, transport_core::traits::ToolUseRecord);
empty_detail_repo!(EmptyMemoryUsageRepo, MemoryUsageRepository, transport_core::traits::MemoryUsageRecord);
empty_detail_repo!(EmptyCommentaryRepo, CommentaryRepository, transport_core::traits::CommentaryRecord);

struct RecordingSender {
    sent: Mutex<Vec<Envelope>>,
}

#[async_trait]
impl AgentSender for RecordingSender {
    async fn send_data(&self, bytes: Vec<u8>) -> Result<(), SendError> {
        let envelope = decode(&bytes).expect("sender receives well-formed bytes");
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }

    async fn send_audio(&self, _bytes: Vec<u8>, _format: String) -> Result<(), SendError> {
        Ok(())
    }
}

async fn handler_with_sender() -> (Arc<ProtocolHandler>, Arc<RecordingSender>) {
    let handler = Arc::new(ProtocolHandler::new(
        "conv-e2e",
        ProtocolHandlerDeps {
            conversation_repo: Arc::new(FakeConversationRepo {
                cursor: Mutex::new(ConversationCursor {
                    conversation_id: "conv-e2e".into(),
                    last_client_stanza_id: 0,
                    last_server_stanza_id: -1,
                }),
            }),
            message_repo: Arc::new(EmptyMessageRepo),
            sentence_repo: Arc::new(EmptySentenceRepo),
            reasoning_repo: Arc::new(EmptyReasoningRepo),
            tool_use_repo: Arc::new(EmptyToolUseRepo),
            memory_usage_repo: Arc::new(EmptyMemoryUsageRepo),
            commentary_repo: Arc::new(EmptyCommentaryRepo),
        },
    ));
    let sender = Arc::new(RecordingSender { sent: Mutex::new(Vec::new()) });
    handler.set_sender(Some(sender.clone())).await;
    (handler, sender)
}

#[tokio::test]
async fn client_reconnect_replays_missed_server_frames_in_order() {
    let (handler, sender) = handler_with_sender().await;

    // Three user turns, each producing one server-originated reply.
    for i in 0..3 {
        handler
            .send(Envelope::new(
                0,
                "conv-e2e",
                EnvelopeBody::UserMessage(UserMessage {
                    id: format!("msg-{i}"),
                    previous_id: None,
                    conversation_id: "conv-e2e".into(),
                    content: format!("reply {i}"),
                }),
            ))
            .await
            .expect("send");
    }
    // ids assigned: -2, -3, -4
    sender.sent.lock().unwrap().clear();

    let config = transport_proto::Configuration {
        conversation_id: "conv-e2e".into(),
        last_sequence_seen: -2,
    };
    handler.handle_configuration(&config).await.expect("resume handshake");

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 3, "one ack plus two replayed frames");
    match &sent[0].body {
        EnvelopeBody::Acknowledgement(ack) => {
            assert_eq!(ack.acked_stanza_id, -2);
            assert!(ack.success);
        }
        other => panic!("expected Acknowledgement first, got {other:?}"),
    }
    assert_eq!(sent[1].stanza_id, -3);
    assert_eq!(sent[2].stanza_id, -4);
}

struct AlwaysMissingRepo;

#[async_trait]
impl ConversationRepository for AlwaysMissingRepo {
    async fn get_by_id(&self, _id: &str) -> Result<Option<ConversationCursor>, RepositoryError> {
        Ok(None)
    }
    async fn update_stanza_ids(&self, _id: &str, _client_id: i32, _server_id: i32) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[tokio::test]
async fn unknown_conversation_surfaces_as_recoverable_error() {
    let handler = Arc::new(ProtocolHandler::new(
        "conv-missing",
        ProtocolHandlerDeps {
            conversation_repo: Arc::new(AlwaysMissingRepo),
            message_repo: Arc::new(EmptyMessageRepo),
            sentence_repo: Arc::new(EmptySentenceRepo),
            reasoning_repo: Arc::new(EmptyReasoningRepo),
            tool_use_repo: Arc::new(EmptyToolUseRepo),
            memory_usage_repo: Arc::new(EmptyMemoryUsageRepo),
            commentary_repo: Arc::new(EmptyCommentaryRepo),
        },
    ));
    let sender = Arc::new(RecordingSender { sent: Mutex::new(Vec::new()) });
    handler.set_sender(Some(sender.clone())).await;

    handler
        .handle_configuration(&transport_proto::Configuration {
            conversation_id: "conv-missing".into(),
            last_sequence_seen: -5,
        })
        .await
        .expect("handled without transport error");

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    match &sent[0].body {
        EnvelopeBody::ErrorMessage(err) => {
            assert_eq!(err.code, transport_proto::ErrorCode::ConversationNotFound);
            assert!(err.recoverable);
        }
        other => panic!("expected ErrorMessage, got {other:?}"),
    }
}
