use std::fmt::{self, Display};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::protocol::AMS_HEADER_LEN;
use crate::{ErrorKind, Result};

pub const AMS_TCP_HEADER_LEN: usize = 6;

/// Upper bound on a single AMS packet. Anything larger is treated as a corrupt length field.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameError {
    ReservedNotZero(u16),
    Oversized(u32),
    Undersized(u32),
}

impl Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::ReservedNotZero(reserved) => {
                write!(f, "reserved field is {:#06x}, expected zero", reserved)
            }
            FrameError::Oversized(len) => write!(f, "frame length {} exceeds limit", len),
            FrameError::Undersized(len) => {
                write!(f, "frame length {} is shorter than an AMS header", len)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Reads AMS packets off a stream, stripping the 6-byte AMS/TCP preamble.
pub struct Reader<R>
where
    R: AsyncRead + Unpin,
{
    inner: BufReader<R>,
}

impl<R> Reader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(read: R) -> Self {
        Self {
            inner: BufReader::new(read),
        }
    }

    /// Returns the next complete AMS packet (AMS header plus ADS data). Short reads are
    /// accumulated until the length announced by the preamble has arrived.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut preamble = [0; AMS_TCP_HEADER_LEN];
        self.read_exact(&mut preamble).await?;

        let reserved = u16::from_le_bytes([preamble[0], preamble[1]]);
        if reserved != 0 {
            return Err(FrameError::ReservedNotZero(reserved).into());
        }

        let len = u32::from_le_bytes([preamble[2], preamble[3], preamble[4], preamble[5]]);
        if len > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(len).into());
        }
        if (len as usize) < AMS_HEADER_LEN {
            return Err(FrameError::Undersized(len).into());
        }

        let mut frame = vec![0; len as usize];
        self.read_exact(&mut frame).await?;
        Ok(frame)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ErrorKind::TransportClosed.into())
            }
            Err(error) => Err(error.into()),
        }
    }
}

pub struct Writer<W>
where
    W: AsyncWrite + Unpin,
{
    inner: BufWriter<W>,
}

impl<W> Writer<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(write: W) -> Self {
        Self {
            inner: BufWriter::new(write),
        }
    }

    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_u16_le(0).await?;
        self.inner.write_u32_le(data.len() as u32).await?;
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[tokio::test]
    async fn round_trips_frames() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = Writer::new(client);
        let mut reader = Reader::new(server);

        writer.write_frame(&packet(40)).await.unwrap();
        writer.write_frame(&packet(32)).await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), packet(40));
        assert_eq!(reader.read_frame().await.unwrap(), packet(32));
    }

    #[tokio::test]
    async fn accumulates_partial_reads() {
        let mut bytes = vec![0, 0];
        bytes.extend_from_slice(&34u32.to_le_bytes());
        bytes.extend(packet(34));

        let (mut client, server) = tokio::io::duplex(8);
        let mut reader = Reader::new(server);
        let write = tokio::spawn(async move {
            for chunk in bytes.chunks(5) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        assert_eq!(reader.read_frame().await.unwrap(), packet(34));
        write.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_zero_reserved_field() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[1, 0, 32, 0, 0, 0]).await.unwrap();

        let error = Reader::new(server).read_frame().await.unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::Frame(FrameError::ReservedNotZero(1))
        ));
    }

    #[tokio::test]
    async fn rejects_undersized_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 4, 0, 0, 0]).await.unwrap();

        let error = Reader::new(server).read_frame().await.unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::Frame(FrameError::Undersized(4))
        ));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_transport_closed() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 40, 0, 0, 0, 1, 2]).await.unwrap();
        drop(client);

        let error = Reader::new(server).read_frame().await.unwrap_err();
        assert!(matches!(error.kind, ErrorKind::TransportClosed));
    }
}
