//! Frame transforms between a consumer and a broadcaster
//!
//! A [`TransformChain`] reads frames from one [`StreamConsumer`] and runs
//! each through its transforms in registration order. It also builds the
//! placeholder shown while the feed is down, by running the last live input
//! frame through every transform's `placeholder` hook. Until the first live
//! frame arrives, the image given to [`TransformChain::new`] stands in.

use std::future::Future;

use crate::error::TransformError;
use crate::media::Frame;
use crate::source::StreamConsumer;

/// A per-frame image operation
///
/// Implementations take `&self`: a transform holds no per-frame state that
/// another chain could observe.
pub trait FrameTransform: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Adapt the placeholder frame; passes it through unchanged by default
    fn placeholder(&self, frame: Frame) -> Result<Frame, TransformError> {
        Ok(frame)
    }

    /// Transform a live frame
    fn apply(&self, frame: Frame) -> Result<Frame, TransformError>;
}

/// Where a broadcaster gets its frames from
pub trait FrameFeed: Send + 'static {
    /// Frame to show while no live frame is available
    fn placeholder(&mut self) -> Frame;

    /// Next live frame
    ///
    /// `Ok(None)` means the feed hit a gap or stalled; the caller should
    /// fall back to the placeholder and ask again later.
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Frame>, TransformError>> + Send;
}

/// Ordered transforms applied to one consumer's frames
pub struct TransformChain {
    consumer: StreamConsumer,
    transforms: Vec<Box<dyn FrameTransform>>,
    last_frame: Frame,
}

impl TransformChain {
    /// A chain with no transforms, relaying frames unchanged
    ///
    /// `placeholder` is the base image until the first live frame arrives.
    pub fn new(consumer: StreamConsumer, placeholder: Frame) -> Self {
        Self {
            consumer,
            transforms: Vec::new(),
            last_frame: placeholder,
        }
    }

    /// Append a transform
    pub fn with_transform(mut self, transform: impl FrameTransform + 'static) -> Self {
        self.push(Box::new(transform));
        self
    }

    /// Append a boxed transform
    pub fn push(&mut self, transform: Box<dyn FrameTransform>) {
        tracing::debug!(transform = transform.name(), "Transform added");
        self.transforms.push(transform);
    }

    /// Names of the transforms, in order
    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Number of transforms
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Check if the chain relays frames unchanged
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Run `frame` through every transform
    pub fn apply(&self, frame: Frame) -> Result<Frame, TransformError> {
        self.transforms
            .iter()
            .try_fold(frame, |frame, transform| transform.apply(frame))
    }

    /// Last live input frame, before any transform ran
    pub fn last_frame(&self) -> &Frame {
        &self.last_frame
    }

    /// Build the current placeholder from the last live input frame
    ///
    /// A failing placeholder hook is skipped, so this always yields a frame.
    pub fn placeholder_frame(&self) -> Frame {
        let mut frame = self.last_frame.restamped();

        for transform in &self.transforms {
            match transform.placeholder(frame.clone()) {
                Ok(next) => frame = next,
                Err(e) => {
                    tracing::warn!(error = %e, "Placeholder transform failed, skipping");
                }
            }
        }

        frame
    }
}

impl FrameFeed for TransformChain {
    fn placeholder(&mut self) -> Frame {
        self.placeholder_frame()
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, TransformError> {
        match self.consumer.next_frame().await {
            Some(frame) => {
                self.last_frame = frame.clone();
                self.apply(frame).map(Some)
            }
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("transforms", &self.names())
            .field("consumer", &self.consumer)
            .finish()
    }
}
