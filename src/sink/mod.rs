//! Reaction sinks: where decisions leave the process.

mod audio;
mod logging;
mod stream;

use anyhow::Result;

use crate::decide::Reaction;

pub use self::audio::{AudioSink, AudioWorker, CommandPlayer, SoundPlayer};
pub use self::logging::LogSink;
pub use self::stream::{MessageTransport, StreamSink, WsTransport};

/// Outcome of handing one reaction to a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The sink has no interest in this reaction, or dropped it.
    Skipped,
    /// The peer went away; the session should end.
    Disconnected,
}

pub trait ReactionSink: Send {
    fn name(&self) -> &'static str;

    fn deliver(&mut self, reaction: &Reaction) -> Result<Delivery>;

    /// Release the underlying transport or worker. Called once per session.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
