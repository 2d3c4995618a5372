//! Length-prefixed framing
//!
//! ```text
//! [4 bytes: body length (u32 BE)][body]
//! ```

use std::io;

use futures_lite::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest accepted frame body (16 MiB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one frame
///
/// Returns `Ok(None)` if the peer closed the stream between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::InvalidFrame("truncated length prefix".into()));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!("invalid frame length {len}")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::InvalidFrame("truncated frame body".into())
        } else {
            Error::Io(e)
        }
    })?;
    Ok(Some(body))
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.is_empty() || body.len() > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "invalid frame length {}",
            body.len()
        )));
    }
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(body);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures_lite::io::Cursor;

    use super::*;

    #[test]
    fn test_reads_back_written_frames() {
        smol::block_on(async {
            let mut wire = Cursor::new(Vec::new());
            write_frame(&mut wire, b"first").await.unwrap();
            write_frame(&mut wire, b"second").await.unwrap();

            let bytes = wire.into_inner();
            assert_eq!(&bytes[..4], &5u32.to_be_bytes());

            let mut reader = Cursor::new(bytes);
            assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"first");
            assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), b"second");
            assert!(read_frame(&mut reader).await.unwrap().is_none());
        });
    }

    #[test]
    fn test_rejects_oversized_length() {
        smol::block_on(async {
            let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
            let mut reader = Cursor::new(len.to_vec());
            assert!(matches!(
                read_frame(&mut reader).await,
                Err(Error::InvalidFrame(_))
            ));
        });
    }

    #[test]
    fn test_truncated_body_is_invalid() {
        smol::block_on(async {
            let mut bytes = 10u32.to_be_bytes().to_vec();
            bytes.extend_from_slice(b"abc");
            let mut reader = Cursor::new(bytes);
            assert!(matches!(
                read_frame(&mut reader).await,
                Err(Error::InvalidFrame(_))
            ));
        });
    }

    #[test]
    fn test_empty_body_is_rejected() {
        smol::block_on(async {
            let mut wire = Cursor::new(Vec::new());
            assert!(write_frame(&mut wire, b"").await.is_err());
        });
    }
}
