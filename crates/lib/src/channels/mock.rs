//! Scripted in-memory channel for engine and dispatcher tests.

use crate::channels::{
    Channel, ChannelError, Cursor, CursorStore, InboundMessage, PollBatch, SentMessage,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted poll result.
pub(crate) enum Step {
    Messages(Vec<InboundMessage>),
    Fail(String),
    /// Stall for this long before answering with an empty batch.
    Hang(Duration),
}

/// Replays scripted polls in order, then returns empty batches. Counts every call.
pub(crate) struct ScriptedChannel {
    id: String,
    configured: bool,
    send_failure: Option<String>,
    prepare_failure: Option<String>,
    prepare_delay: Option<Duration>,
    default_target: Option<String>,
    sent_id: Option<String>,
    script: Mutex<VecDeque<Step>>,
    cursor: CursorStore,
    sends: AtomicUsize,
    polls: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            configured: true,
            send_failure: None,
            prepare_failure: None,
            prepare_delay: None,
            default_target: None,
            sent_id: Some("100".to_string()),
            script: Mutex::new(VecDeque::new()),
            cursor: CursorStore::new(),
            sends: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn failing_send(mut self, reason: &str) -> Self {
        self.send_failure = Some(reason.to_string());
        self
    }

    pub fn failing_prepare(mut self, reason: &str) -> Self {
        self.prepare_failure = Some(reason.to_string());
        self
    }

    pub fn hanging_prepare(mut self, delay: Duration) -> Self {
        self.prepare_delay = Some(delay);
        self
    }

    pub fn with_default_target(mut self, target: &str) -> Self {
        self.default_target = Some(target.to_string());
        self
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    /// Queue a batch of `(sender, text)` messages.
    pub fn then_messages(self, msgs: &[(&str, &str)]) -> Self {
        let batch = msgs
            .iter()
            .map(|(sender, text)| InboundMessage::new(*sender, *text, Cursor::default()))
            .collect();
        self.then(Step::Messages(batch))
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn check_configured(&self) -> Result<(), ChannelError> {
        if self.configured {
            Ok(())
        } else {
            Err(ChannelError::NotConfigured(format!("{} not configured", self.id)))
        }
    }

    fn default_target(&self) -> Option<String> {
        self.default_target.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["Scripted replies".to_string()]
    }

    fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    async fn send(&self, text: &str, target: &str) -> Result<SentMessage, ChannelError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.send_failure {
            return Err(ChannelError::Transport(reason.clone()));
        }
        Ok(SentMessage {
            id: self.sent_id.clone(),
            target: target.to_string(),
            sent_at: Utc::now(),
            text: text.to_string(),
        })
    }

    async fn poll_since(&self, cursor: Cursor) -> Result<PollBatch, ChannelError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(PollBatch {
                messages: Vec::new(),
                next_cursor: cursor,
            }),
            Some(Step::Fail(reason)) => Err(ChannelError::Transport(reason)),
            Some(Step::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(PollBatch {
                    messages: Vec::new(),
                    next_cursor: cursor,
                })
            }
            Some(Step::Messages(mut messages)) => {
                for (i, msg) in messages.iter_mut().enumerate() {
                    msg.position = Cursor(cursor.value() + i as i64 + 1);
                }
                let next_cursor = Cursor(cursor.value() + messages.len() as i64);
                Ok(PollBatch {
                    messages,
                    next_cursor,
                })
            }
        }
    }

    async fn prepare_wait(&self) -> Result<(), ChannelError> {
        if let Some(delay) = self.prepare_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.prepare_failure {
            Some(reason) => Err(ChannelError::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}
