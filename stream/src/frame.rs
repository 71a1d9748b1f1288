//! Length-delimited envelope frames.
//!
//! Every streaming hop (agent -> aggregator, aggregator -> router) carries
//! marshaled envelopes as length-prefixed frames; the envelope encoding
//! itself is the wire codec's business.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Frames above this size indicate a corrupt peer and abort the stream.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type FramedStream = Framed<Box<dyn Io>, LengthDelimitedCodec>;

pub fn framed<T: Io + 'static>(io: T) -> FramedStream {
    Framed::new(Box::new(io) as Box<dyn Io>, codec())
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};

    #[tokio::test]
    async fn frames_survive_the_pipe() {
        let (a, b) = tokio::io::duplex(4096);
        let mut sender = framed(a);
        let mut receiver = framed(b);

        sender.send(Bytes::from_static(b"first")).await.unwrap();
        sender.send(Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(receiver.next().await.unwrap().unwrap().as_ref(), b"first");
        assert_eq!(receiver.next().await.unwrap().unwrap().as_ref(), b"second");
    }
}
