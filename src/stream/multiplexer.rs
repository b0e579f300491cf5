use bytes::Bytes;
use futures::{ Stream, StreamExt };
use log::{ debug, error, warn };
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use super::decoder::LineDecoder;
use super::frame::{ self, StreamFrame };
use crate::models::wire::WireFrame;

pub type FrameStream = Pin<Box<dyn Stream<Item = WireFrame> + Send>>;

/// Turns upstream SSE chunks into wire frames for a single response.
#[derive(Debug)]
pub struct Multiplexer {
    model: String,
    decoder: LineDecoder,
    model_sent: bool,
    done: bool,
}

impl Multiplexer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            decoder: LineDecoder::new(),
            model_sent: false,
            done: false,
        }
    }

    /// True once `[DONE]` was seen; later chunks are ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        for line in self.decoder.push(chunk) {
            match frame::parse_line(&line) {
                None => {}
                Some(StreamFrame::Done) => {
                    self.done = true;
                    break;
                }
                Some(StreamFrame::Data(content)) => {
                    if content.is_empty() {
                        continue;
                    }
                    self.push_model_marker(&mut frames);
                    frames.push(WireFrame::Content(content));
                }
                Some(StreamFrame::Malformed { payload, error }) => {
                    warn!("Skipping malformed upstream frame ({}): {}", error, payload);
                }
            }
        }
        frames
    }

    /// Closes the response. A reply that produced no content still carries
    /// its model marker.
    pub fn finish(&mut self) -> Vec<WireFrame> {
        if let Some(tail) = self.decoder.finish() {
            debug!("Discarding unterminated upstream line: {}", tail);
        }
        let mut frames = Vec::new();
        self.push_model_marker(&mut frames);
        frames
    }

    fn push_model_marker(&mut self, frames: &mut Vec<WireFrame>) {
        if !self.model_sent {
            self.model_sent = true;
            frames.push(WireFrame::Model(self.model.clone()));
        }
    }
}

/// Relays an upstream completion body as wire frames.
///
/// The returned stream is lazy: it reads from `upstream` only when polled.
/// With `idle_timeout` set, a gap between chunks longer than the limit ends
/// the response with an error frame.
pub fn multiplex<S, E>(
    upstream: S,
    model: String,
    idle_timeout: Option<Duration>
) -> impl Stream<Item = WireFrame> + Send + 'static
    where S: Stream<Item = Result<Bytes, E>> + Send + 'static, E: Display + Send + 'static
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut mux = Multiplexer::new(model);
        let mut failure: Option<String> = None;

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, upstream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("Upstream stream idle for more than {:?}, closing relay", limit);
                        failure = Some(format!("Upstream stalled for more than {}s", limit.as_secs()));
                        break;
                    }
                },
                None => upstream.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    for frame in mux.push_chunk(&chunk) {
                        yield frame;
                    }
                    if mux.is_done() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Upstream stream read failed: {}", e);
                    failure = Some(format!("Upstream stream failed: {}", e));
                    break;
                }
                None => break,
            }
        }

        for frame in mux.finish() {
            yield frame;
        }
        if let Some(message) = failure {
            yield WireFrame::Error(message);
        }
    }
}
