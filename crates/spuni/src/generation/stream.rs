//! Streaming hand-off between the decoding loop and whoever displays the
//! tokens.

use tokio::sync::mpsc;

/// Where a streamed token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// Echo of the caller-supplied prompt, emitted before decoding starts.
    Prompt,
    /// Token appended by the decoding loop.
    Generated,
}

/// One token as it becomes available.
///
/// Tokens from different batch rows interleave in append order;
/// `sequence` demuxes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedToken {
    pub id: u32,
    /// Batch row this token belongs to.
    pub sequence: usize,
    pub token_type: TokenType,
}

impl StreamedToken {
    pub fn is_prompt(&self) -> bool {
        self.token_type == TokenType::Prompt
    }
}

/// Push-style sink fed by the decoding loop.
///
/// `put` fires once per available token, prompt echo first. `end` fires
/// exactly once after the last token of a successful run; a cancelled or
/// failed run never reaches it.
pub trait TokenStreamer: Send {
    fn put(&mut self, token: StreamedToken);
    fn end(&mut self);
}

/// Events carried by a [`ChannelStreamer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(StreamedToken),
    End,
}

/// [`TokenStreamer`] backed by an unbounded tokio channel, so the decoding
/// loop never blocks on a slow consumer.
pub struct ChannelStreamer {
    sender: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelStreamer {
    /// The receiver half goes to the consuming task.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TokenStreamer for ChannelStreamer {
    fn put(&mut self, token: StreamedToken) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(StreamEvent::Token(token));
    }

    fn end(&mut self) {
        let _ = self.sender.send(StreamEvent::End);
    }
}
