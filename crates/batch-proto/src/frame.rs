use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::opcode::Opcode;

/// Header preceding every frame's bincode-encoded payload. On a reply
/// frame the opcode field is reinterpreted as a status code.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub opcode: u32,
    pub length: u32,
}

pub const HEADER_LEN: usize = 8;

/// Guards against a peer sending a bogus huge length and exhausting memory.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode/decode error: {0}")]
    Codec(#[from] Box<bincode::ErrorKind>),
    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    TooLarge(u32),
}

pub async fn write_frame<W, T>(writer: &mut W, opcode: impl Into<Opcode>, payload: &T) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(payload)?;
    let opcode: Opcode = opcode.into();
    if body.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(ProtoError::TooLarge(body.len() as u32));
    }
    writer.write_all(&opcode.0.to_be_bytes()).await?;
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<(Opcode, T), ProtoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut hdr = [0u8; HEADER_LEN];
    reader.read_exact(&mut hdr).await?;
    let opcode = u32::from_be_bytes(hdr[0..4].try_into().unwrap());
    let length = u32::from_be_bytes(hdr[4..8].try_into().unwrap());
    if length > MAX_FRAME_LEN {
        return Err(ProtoError::TooLarge(length));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body).await?;
    let payload = bincode::deserialize(&body)?;
    Ok((Opcode(opcode), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlaunchRusageMsg;
    use batch_core::JRusage;

    #[tokio::test]
    async fn frame_round_trips_through_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let msg = BlaunchRusageMsg { job_id: 42, usage: JRusage::new() };

        write_frame(&mut client, Opcode::BLAUNCH_RUSAGE, &msg).await.unwrap();
        let (opcode, decoded): (Opcode, BlaunchRusageMsg) = read_frame(&mut server).await.unwrap();

        assert_eq!(opcode, Opcode::BLAUNCH_RUSAGE);
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn oversized_length_is_rejected_without_reading_body() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&1u32.to_be_bytes()).await.unwrap();
        client.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();

        let res: Result<(Opcode, ()), _> = read_frame(&mut server).await;
        assert!(matches!(res, Err(ProtoError::TooLarge(_))));
    }
}
