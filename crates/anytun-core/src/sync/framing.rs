// SPDX-License-Identifier: MIT

//! Length-prefixed framing for the sync protocol: an ASCII 5-digit
//! zero-padded length, a single space, then that many payload bytes.
//! The length excludes the 6-byte prefix itself.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

const PREFIX_LEN: usize = 6;
const MAX_PAYLOAD_LEN: usize = 99_999;

pub async fn write_frame<W: AsyncWriteExt + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::SyncProtocol(format!(
            "payload of {} bytes exceeds 5-digit length field",
            payload.len()
        )));
    }
    let header = format!("{:05} ", payload.len());
    w.write_all(header.as_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF before any
/// bytes of a new frame arrive.
pub async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; PREFIX_LEN];
    match r.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if header[5] != b' ' {
        return Err(Error::SyncProtocol("malformed frame header".into()));
    }
    let len_str = std::str::from_utf8(&header[0..5])
        .map_err(|_| Error::SyncProtocol("non-ASCII length field".into()))?;
    let len: usize = len_str
        .parse()
        .map_err(|_| Error::SyncProtocol("non-numeric length field".into()))?;

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .map_err(|_| Error::SyncProtocol("truncated frame body".into()))?;
    Ok(Some(payload))
}
