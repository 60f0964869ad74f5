// src/core/warden/client.rs

//! A minimal asynchronous client used by the monitor to speak RESP2 to monitored instances:
//! PING, INFO, SUBSCRIBE/PUBLISH, AUTH, SLAVEOF, CONFIG REWRITE.

use crate::core::WardenError;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use super::address::Address;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// An internal client connection to a monitored instance.
#[derive(Debug)]
pub struct WardenClient {
    stream: TcpStream,
    codec: RespFrameCodec,
}

fn bulk(s: impl Into<Vec<u8>>) -> RespFrame {
    RespFrame::BulkString(s.into().into())
}

impl WardenClient {
    pub async fn connect(addr: &Address) -> Result<Self, WardenError> {
        let target = format!("{}:{}", addr.ip, addr.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&target))
            .await
            .map_err(|_| WardenError::ReadTimeout)??;
        Ok(Self {
            stream,
            codec: RespFrameCodec,
        })
    }

    pub async fn send_and_receive(&mut self, frame: RespFrame) -> Result<RespFrame, WardenError> {
        let mut write_buf = BytesMut::new();
        self.codec.encode(frame, &mut write_buf)?;
        self.stream.write_all(&write_buf).await?;

        let mut read_buf = BytesMut::with_capacity(4096);
        loop {
            let read_fut = self.stream.read_buf(&mut read_buf);
            match tokio::time::timeout(READ_TIMEOUT, read_fut).await {
                Ok(Ok(0)) => return Err(WardenError::ConnectionClosed),
                Ok(Ok(_)) => {
                    if let Some(reply) = self.codec.decode(&mut read_buf)? {
                        return Ok(reply);
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(WardenError::ReadTimeout),
            }
        }
    }

    pub async fn auth(&mut self, password: &str) -> Result<(), WardenError> {
        let frame = RespFrame::Array(vec![bulk("AUTH"), bulk(password.as_bytes().to_vec())]);
        self.send_and_receive(frame).await.map(|_| ())
    }

    /// Sends `PING` and returns the raw reply string for the scheduler to classify
    /// (`PONG`/`LOADING`/`MASTERDOWN`/`BUSY`/other).
    pub async fn ping(&mut self) -> Result<String, WardenError> {
        let frame = RespFrame::Array(vec![bulk("PING")]);
        match self.send_and_receive(frame).await? {
            RespFrame::SimpleString(s) => Ok(s),
            RespFrame::Error(s) => Ok(s),
            other => Err(WardenError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn info_replication(&mut self) -> Result<String, WardenError> {
        let frame = RespFrame::Array(vec![bulk("INFO"), bulk("replication")]);
        match self.send_and_receive(frame).await? {
            RespFrame::BulkString(bs) => Ok(String::from_utf8_lossy(&bs).to_string()),
            other => Err(WardenError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub async fn subscribe(&mut self, channel: &str) -> Result<(), WardenError> {
        let frame = RespFrame::Array(vec![bulk("SUBSCRIBE"), bulk(channel.as_bytes().to_vec())]);
        self.send_and_receive(frame).await.map(|_| ())
    }

    pub async fn publish(&mut self, channel: &str, message: &str) -> Result<(), WardenError> {
        let frame = RespFrame::Array(vec![
            bulk("PUBLISH"),
            bulk(channel.as_bytes().to_vec()),
            bulk(message.as_bytes().to_vec()),
        ]);
        self.send_and_receive(frame).await.map(|_| ())
    }

    /// Reads the next pub/sub push frame off an already-subscribed connection.
    pub async fn next_message(&mut self) -> Result<Option<(String, String)>, WardenError> {
        let frame = RespFrame::Array(vec![]);
        let reply = self.send_and_receive(frame).await?;
        if let RespFrame::Array(parts) = reply
            && parts.len() == 3
            && let (RespFrame::BulkString(channel), RespFrame::BulkString(payload)) =
                (&parts[1], &parts[2])
        {
            return Ok(Some((
                String::from_utf8_lossy(channel).to_string(),
                String::from_utf8_lossy(payload).to_string(),
            )));
        }
        Ok(None)
    }

    /// `SLAVEOF <ip> <port>`, or `SLAVEOF NO ONE` when `target` is `None`.
    pub async fn slaveof(&mut self, target: Option<&Address>) -> Result<(), WardenError> {
        let frame = match target {
            Some(addr) => RespFrame::Array(vec![
                bulk("SLAVEOF"),
                bulk(addr.ip.as_bytes().to_vec()),
                bulk(addr.port.to_string().into_bytes()),
            ]),
            None => RespFrame::Array(vec![bulk("SLAVEOF"), bulk("NO"), bulk("ONE")]),
        };
        self.send_and_receive(frame).await?;
        // SLAVEOF is always followed by a best-effort CONFIG REWRITE.
        let rewrite = RespFrame::Array(vec![bulk("CONFIG"), bulk("REWRITE")]);
        let _ = self.send_and_receive(rewrite).await;
        Ok(())
    }
}
