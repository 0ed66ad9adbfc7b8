//! Stream convergence-layer framing.
//!
//! Every unit on an stcp connection is a 4-byte network-order length
//! followed by that many bytes of serialized bundle. A length of zero with
//! no payload is a keepalive; receivers discard it silently.
//!
//! The header is #[repr(C)] with zerocopy derives so it is written and read
//! without any manual byte shuffling.

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt};
use zerocopy::byteorder::{NetworkEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size of the length prefix on the wire.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest frame a receiver will accept before treating the stream as
/// corrupt. Bundles are bounded by the u32 length field anyway; this keeps a
/// hostile peer from making us allocate 4 GiB.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// Payload length in bytes, network byte order. Zero = keepalive.
    pub length: U32<NetworkEndian>,
}

assert_eq_size!(FrameHeader, [u8; FRAME_HEADER_LEN]);

impl FrameHeader {
    pub fn new(length: u32) -> Self {
        Self {
            length: U32::new(length),
        }
    }

    pub fn keepalive() -> Self {
        Self::new(0)
    }

    pub fn len(&self) -> u32 {
        self.length.get()
    }

    pub fn is_keepalive(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame length {0} exceeds limit {MAX_FRAME_LEN}")]
    FrameTooLarge(u32),
    #[error("stream closed after {got} of {expected} payload bytes")]
    Truncated { expected: u32, got: usize },
    #[error("stream i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded unit from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Keepalive,
    Bundle(Bytes),
}

/// Read one frame. `Ok(None)` is a clean end of stream on a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = FrameHeader::new_zeroed();
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header.as_bytes_mut()[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(WireError::Truncated {
                expected: FRAME_HEADER_LEN as u32,
                got: filled,
            });
        }
        filled += n;
    }

    let length = header.len();
    if length == 0 {
        return Ok(Some(Frame::Keepalive));
    }
    if length > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(length));
    }

    let mut payload = BytesMut::zeroed(length as usize);
    let mut got = 0;
    while got < payload.len() {
        let n = reader.read(&mut payload[got..]).await?;
        if n == 0 {
            return Err(WireError::Truncated {
                expected: length,
                got,
            });
        }
        got += n;
    }
    Ok(Some(Frame::Bundle(payload.freeze())))
}

/// Receiver-side decoder that swallows keepalives and hands back bundles.
pub struct FrameReader<R> {
    inner: R,
    keepalives: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            keepalives: 0,
        }
    }

    /// Next bundle payload, skipping any keepalives in between.
    pub async fn next_bundle(&mut self) -> Result<Option<Bytes>, WireError> {
        loop {
            match read_frame(&mut self.inner).await? {
                None => return Ok(None),
                Some(Frame::Keepalive) => self.keepalives += 1,
                Some(Frame::Bundle(payload)) => return Ok(Some(payload)),
            }
        }
    }

    /// Keepalives discarded so far.
    pub fn keepalives(&self) -> u64 {
        self.keepalives
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
