// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control protocol over the daemon socket
//!
//! Each message is a 4-byte big-endian length followed by that many bytes
//! of JSON. A connection carries one request and one response.

use depot_core::{OwnerKey, Schedule, ScheduleId, ScheduleUpdate, TaskId, TaskResult};
use depot_engine::{CancelOutcome, RepoCommand, ScheduleRequest};
use depot_storage::TaskFilter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PROTOCOL_VERSION: &str = "1";

/// Read/write timeout when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on a single message body
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    Hello {
        version: String,
    },
    Status,
    Shutdown,
    /// A repository operation
    Repo {
        command: RepoCommand,
    },
    Task {
        id: TaskId,
    },
    Tasks {
        #[serde(default)]
        filter: TaskFilter,
    },
    CancelTask {
        id: TaskId,
    },
    CreateSchedule {
        owner: OwnerKey,
        #[serde(default)]
        request: ScheduleRequest,
    },
    ListSchedules {
        owner: OwnerKey,
    },
    GetSchedule {
        owner: OwnerKey,
        id: ScheduleId,
    },
    UpdateSchedule {
        owner: OwnerKey,
        id: ScheduleId,
        update: ScheduleUpdate,
    },
    DeleteSchedule {
        owner: OwnerKey,
        id: ScheduleId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong,
    Hello {
        version: String,
    },
    Status {
        uptime_secs: u64,
        tasks_in_flight: usize,
    },
    ShuttingDown,
    Ok,
    /// The operation was dispatched; poll the task
    Accepted {
        task: TaskResult,
    },
    /// The operation completed synchronously
    Value {
        value: Value,
    },
    Task {
        task: TaskResult,
    },
    Tasks {
        tasks: Vec<TaskResult>,
    },
    Schedule {
        schedule: Box<Schedule>,
    },
    Schedules {
        schedules: Vec<Schedule>,
    },
    Canceled {
        outcome: CancelOutcome,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl Response {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,
}

/// Serialize to JSON, without the length prefix
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one length-prefixed message body
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one message body with its length prefix
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), ProtocolError> {
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_with_timeout<R, T>(reader: &mut R, timeout: Duration) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let body = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&body)
}

async fn write_with_timeout<W, T>(
    writer: &mut W,
    message: &T,
    timeout: Duration,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(message)?;
    tokio::time::timeout(timeout, write_message(writer, &body))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    read_with_timeout(reader, timeout).await
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_with_timeout(writer, request, timeout).await
}

pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    read_with_timeout(reader, timeout).await
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_with_timeout(writer, response, timeout).await
}

/// Send one request over the socket at `path` and wait for the response
pub async fn call(
    path: &std::path::Path,
    request: &Request,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (mut reader, mut writer) = stream.into_split();
    write_request(&mut writer, request, timeout).await?;
    read_response(&mut reader, timeout).await
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
