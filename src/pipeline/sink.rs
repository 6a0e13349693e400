use flume::{Receiver, Sender, TrySendError};

use crate::error::SinkError;
use crate::FrameBuffer;

/// Downstream consumer of composed frames.
///
/// `deliver` runs on the primary stream's thread and must return promptly;
/// a slow sink stalls the primary path.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, frame: FrameBuffer) -> Result<(), SinkError>;
}

impl<F> FrameSink for F
where
    F: Fn(FrameBuffer) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(&self, frame: FrameBuffer) -> Result<(), SinkError> {
        self(frame)
    }
}

/// Bounded channel sink. Refuses frames when the channel is full instead of
/// waiting for the consumer.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<FrameBuffer>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<FrameBuffer>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&self, frame: FrameBuffer) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Backpressure,
            TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}
