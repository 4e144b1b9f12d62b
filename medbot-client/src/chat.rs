//! Question/answer chat with an optional channel of server-pushed messages.

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{error, info, warn};

use crate::client::{ApiClient, ClientError, Result};

/// A source of pushed message strings with an explicit connection lifecycle.
#[async_trait]
pub trait PushClient: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    /// The next message already received, if any. Never blocks.
    fn try_next(&mut self) -> Option<String>;
}

/// In-process push channel backed by a tokio broadcast sender.
pub struct ChannelPushClient {
    sender: broadcast::Sender<String>,
    receiver: Option<broadcast::Receiver<String>>,
}

impl ChannelPushClient {
    pub fn new(sender: broadcast::Sender<String>) -> Self {
        Self {
            sender,
            receiver: None,
        }
    }

    /// A client together with the sender that feeds it.
    pub fn channel(capacity: usize) -> (broadcast::Sender<String>, Self) {
        let (sender, _) = broadcast::channel(capacity);
        (sender.clone(), Self::new(sender))
    }
}

#[async_trait]
impl PushClient for ChannelPushClient {
    async fn connect(&mut self) -> Result<()> {
        if self.receiver.is_none() {
            self.receiver = Some(self.sender.subscribe());
            info!("Push channel connected");
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.receiver.take().is_some() {
            info!("Push channel disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }

    fn try_next(&mut self) -> Option<String> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Push channel lagged; older messages dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEntry {
    Question(String),
    Answer(String),
    Pushed(String),
}

pub struct ChatController {
    client: ApiClient,
    push: Box<dyn PushClient>,
    transcript: Vec<ChatEntry>,
}

impl ChatController {
    pub fn new(client: ApiClient, push: Box<dyn PushClient>) -> Self {
        Self {
            client,
            push,
            transcript: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.push.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.push.disconnect().await
    }

    /// Sends the question to the AI route. The question and its answer are recorded only when
    /// an answer arrives.
    pub async fn ask(&mut self, question: &str) -> Result<String> {
        match self.client.ask_ai(question).await {
            Ok(answer) => {
                self.transcript.push(ChatEntry::Question(question.to_string()));
                self.transcript.push(ChatEntry::Answer(answer.clone()));
                Ok(answer)
            }
            Err(e) => {
                error!(error = %e, "Chat question failed");
                Err(e)
            }
        }
    }

    /// Moves every pushed message received so far into the transcript, in arrival order.
    pub fn poll_pushed(&mut self) -> Result<Vec<String>> {
        if !self.push.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let mut received = Vec::new();
        while let Some(message) = self.push.try_next() {
            self.transcript.push(ChatEntry::Pushed(message.clone()));
            received.push(message);
        }
        Ok(received)
    }
}
