#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use parley_agent::{ChatBackend, ChatResponse};
use parley_channels::{Channel, MediaPayload, MediaSource, OutboundMessage};
use parley_core::{ContentPart, ParleyError, ParleyResult, Persona, Turn};
use parley_dispatch::{DispatcherConfig, TurnDispatcher};
use parley_session::InMemorySessionStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records everything the dispatcher does to the transport, in order.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub log: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
    pub fail_typing: AtomicBool,
    pub fail_clear_typing: AtomicBool,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn run(&self) -> ParleyResult<()> {
        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> ParleyResult<()> {
        self.log.lock().unwrap().push(format!("send:{}", message.text));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ParleyError::Channel("transport down".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn start_typing(&self, chat_id: &str) -> ParleyResult<()> {
        self.log.lock().unwrap().push(format!("typing:on:{chat_id}"));
        if self.fail_typing.load(Ordering::SeqCst) {
            return Err(ParleyError::Channel("presence unavailable".into()));
        }
        Ok(())
    }

    async fn clear_typing(&self, chat_id: &str) -> ParleyResult<()> {
        self.log.lock().unwrap().push(format!("typing:off:{chat_id}"));
        if self.fail_clear_typing.load(Ordering::SeqCst) {
            return Err(ParleyError::Channel("presence unavailable".into()));
        }
        Ok(())
    }

    async fn shutdown(&self) -> ParleyResult<()> {
        Ok(())
    }
}

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub history: Vec<Turn>,
    pub prompt: Vec<ContentPart>,
}

/// Returns queued responses in order, then "ok" forever.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<ParleyResult<ChatResponse>>>,
    pub calls: Mutex<Vec<BackendCall>>,
    pub delay: Duration,
}

impl ScriptedBackend {
    pub fn with_responses(responses: Vec<ParleyResult<ChatResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_turn(
        &self,
        history: &[Turn],
        prompt: &[ContentPart],
    ) -> ParleyResult<ChatResponse> {
        self.calls.lock().unwrap().push(BackendCall {
            history: history.to_vec(),
            prompt: prompt.to_vec(),
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ChatResponse::Text("ok".into())))
    }
}

/// A media source that always yields the same outcome.
#[derive(Debug)]
pub struct StaticMedia {
    pub payload: Option<MediaPayload>,
    pub fail: bool,
}

impl StaticMedia {
    pub fn image(mime: &str) -> Arc<Self> {
        Arc::new(Self {
            payload: Some(MediaPayload::new(vec![0xFF, 0xD8, 0xFF], mime)),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            payload: None,
            fail: true,
        })
    }
}

#[async_trait]
impl MediaSource for StaticMedia {
    async fn fetch(&self) -> ParleyResult<Option<MediaPayload>> {
        if self.fail {
            return Err(ParleyError::Media("download interrupted".into()));
        }
        Ok(self.payload.clone())
    }
}

pub struct Harness {
    pub store: Arc<InMemorySessionStore>,
    pub backend: Arc<ScriptedBackend>,
    pub channel: Arc<RecordingChannel>,
    pub dispatcher: Arc<TurnDispatcher>,
}

pub fn persona() -> Persona {
    Persona::new("Parley", "gemini-1.5-flash-latest", "Parley")
}

pub fn harness(backend: ScriptedBackend) -> Harness {
    harness_with(backend, DispatcherConfig::default())
}

pub fn harness_with(backend: ScriptedBackend, config: DispatcherConfig) -> Harness {
    let store = Arc::new(InMemorySessionStore::new(persona()));
    let backend = Arc::new(backend);
    let channel = Arc::new(RecordingChannel::default());
    let dispatcher = Arc::new(TurnDispatcher::new(
        store.clone(),
        backend.clone(),
        channel.clone(),
        config,
    ));
    Harness {
        store,
        backend,
        channel,
        dispatcher,
    }
}
