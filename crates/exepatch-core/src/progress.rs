//! Progress text channel between a running patch and its host.
//!
//! The engine writes human-readable text through a [`ProgressSink`]. A
//! [`ChannelWriter`] forwards it in chunks over a bounded channel; the host
//! polls the matching [`ProgressReceiver`] and treats a closed channel as a
//! signal, not a crash.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use crate::error::{Error, Result};

/// Largest chunk sent over the channel, in characters
pub const CHUNK_CHARS: usize = 1024;

pub trait ProgressSink {
    fn write(&mut self, text: &str) -> Result<()>;

    fn line(&mut self, text: &str) -> Result<()> {
        self.write(text)?;
        self.write("\n")
    }
}

/// Sending half of the progress channel
#[derive(Debug, Clone)]
pub struct ChannelWriter {
    sender: SyncSender<String>,
}

/// Receiving half of the progress channel
#[derive(Debug)]
pub struct ProgressReceiver {
    receiver: Receiver<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPoll {
    Message(String),
    Empty,
    Closed,
}

pub fn progress_channel(capacity: usize) -> (ChannelWriter, ProgressReceiver) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (ChannelWriter { sender }, ProgressReceiver { receiver })
}

impl ProgressSink for ChannelWriter {
    fn write(&mut self, text: &str) -> Result<()> {
        for chunk in split_chunks(text, CHUNK_CHARS) {
            self.sender
                .send(chunk.to_string())
                .map_err(|_| Error::ChannelClosed)?;
        }
        Ok(())
    }
}

impl ProgressReceiver {
    /// Non-blocking poll for the next chunk
    pub fn poll(&self) -> ChannelPoll {
        match self.receiver.try_recv() {
            Ok(text) => ChannelPoll::Message(text),
            Err(TryRecvError::Empty) => ChannelPoll::Empty,
            Err(TryRecvError::Disconnected) => ChannelPoll::Closed,
        }
    }

    /// Like [`poll`](Self::poll), but waits up to `timeout` for a chunk
    pub fn poll_timeout(&self, timeout: Duration) -> ChannelPoll {
        match self.receiver.recv_timeout(timeout) {
            Ok(text) => ChannelPoll::Message(text),
            Err(RecvTimeoutError::Timeout) => ChannelPoll::Empty,
            Err(RecvTimeoutError::Disconnected) => ChannelPoll::Closed,
        }
    }

    /// Block until the next chunk arrives; `None` once the writer is gone
    pub fn recv(&self) -> Option<String> {
        self.receiver.recv().ok()
    }

    /// Everything currently buffered, concatenated
    pub fn drain(&self) -> String {
        let mut out = String::new();
        while let ChannelPoll::Message(text) = self.poll() {
            out.push_str(&text);
        }
        out
    }
}

/// Collects progress text in memory
#[derive(Debug, Clone, Default)]
pub struct StringSink {
    buffer: String,
}

impl StringSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl ProgressSink for StringSink {
    fn write(&mut self, text: &str) -> Result<()> {
        self.buffer.push_str(text);
        Ok(())
    }
}

/// Split on character boundaries into pieces of at most `max_chars` chars
fn split_chunks(text: &str, max_chars: usize) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}
