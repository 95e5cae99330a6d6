//! Categorized progress messages reported by the fetch and batch cores.
//!
//! The core never prints or logs directly; it hands every message to a
//! [`ProgressSink`] supplied by the caller. The CLI uses [`LogSink`],
//! tests use [`MemorySink`].

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
        }
    }
}

pub trait ProgressSink {
    fn report(&mut self, message: Message);
}

impl<F: FnMut(Message)> ProgressSink for F {
    fn report(&mut self, message: Message) {
        self(message)
    }
}

/// Collects messages in memory so the caller can inspect them after a run.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub messages: Vec<Message>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.messages.iter().filter(|m| m.kind == kind).count()
    }
}

impl ProgressSink for MemorySink {
    fn report(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Forwards messages to the tracing subscriber.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&mut self, message: Message) {
        match message.kind {
            MessageKind::Info | MessageKind::Success => info!("{}", message.text),
            MessageKind::Error => warn!("{}", message.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_counts_by_kind() {
        let mut sink = MemorySink::new();
        sink.report(Message::info("a"));
        sink.report(Message::success("b"));
        sink.report(Message::error("c"));
        sink.report(Message::error("d"));
        assert_eq!(sink.count(MessageKind::Info), 1);
        assert_eq!(sink.count(MessageKind::Success), 1);
        assert_eq!(sink.count(MessageKind::Error), 2);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |m: Message| seen.push(m.text);
            sink.report(Message::info("hello"));
        }
        assert_eq!(seen, vec!["hello".to_string()]);
    }
}
