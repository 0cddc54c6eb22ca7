// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use depot_core::{CancelToken, Clock, IdGen};
use depot_engine::{CallOutcome, RepositoryService, ServiceError};
use tokio::net::UnixStream;
use tracing::{debug, error};

use crate::protocol::{self, Request, Response, PROTOCOL_VERSION};

/// Everything a connection handler needs, shared across connections
pub struct ServerContext<C: Clock, I: IdGen> {
    pub service: Arc<RepositoryService<C, I>>,
    pub start_time: Instant,
    /// Canceled when a client asks the daemon to stop
    pub shutdown: CancelToken,
    pub request_timeout: Duration,
}

/// Serve one connection: read a request, answer it, close
pub async fn handle_connection<C: Clock, I: IdGen>(
    ctx: Arc<ServerContext<C, I>>,
    stream: UnixStream,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();

    let request = match protocol::read_request(&mut reader, ctx.request_timeout).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::Timeout) => {
            error!("request read timeout");
            return Err(ServerError::Timeout);
        }
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("client disconnected before sending request");
            return Ok(());
        }
        Err(protocol::ProtocolError::Json(e)) => {
            // Malformed requests still get an answer
            let response = Response::error("validation", format!("malformed request: {e}"));
            protocol::write_response(&mut writer, &response, ctx.request_timeout).await?;
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "failed to read request");
            return Err(ServerError::Protocol(e));
        }
    };

    debug!(?request, "received request");
    let response = handle_request(&ctx, request);
    debug!(?response, "sending response");

    protocol::write_response(&mut writer, &response, ctx.request_timeout).await?;
    Ok(())
}

/// Answer a single request
///
/// Must be called from within a tokio runtime; dispatched operations
/// spawn their tasks before this returns.
pub fn handle_request<C: Clock, I: IdGen>(ctx: &ServerContext<C, I>, request: Request) -> Response {
    let service = &ctx.service;
    let result = match request {
        Request::Ping => Ok(Response::Pong),

        Request::Hello { version: _ } => Ok(Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        }),

        Request::Status => Ok(Response::Status {
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            tasks_in_flight: service.dispatcher().in_flight(),
        }),

        Request::Shutdown => {
            ctx.shutdown.cancel();
            Ok(Response::ShuttingDown)
        }

        Request::Repo { command } => service.execute(command).map(|outcome| match outcome {
            CallOutcome::Completed(value) => Response::Value { value },
            CallOutcome::Accepted(task) => Response::Accepted { task },
        }),

        Request::Task { id } => service.task(&id).map(|task| Response::Task { task }),

        Request::Tasks { filter } => Ok(Response::Tasks {
            tasks: service.tasks(&filter),
        }),

        Request::CancelTask { id } => service
            .cancel_task(&id)
            .map(|outcome| Response::Canceled { outcome }),

        Request::CreateSchedule { owner, request } => service
            .create_schedule(owner, request)
            .map(|schedule| Response::Schedule {
                schedule: Box::new(schedule),
            }),

        Request::ListSchedules { owner } => service
            .list_schedules(&owner)
            .map(|schedules| Response::Schedules { schedules }),

        Request::GetSchedule { owner, id } => {
            service
                .get_schedule(&owner, &id)
                .map(|schedule| Response::Schedule {
                    schedule: Box::new(schedule),
                })
        }

        Request::UpdateSchedule { owner, id, update } => service
            .update_schedule(&owner, &id, update)
            .map(|schedule| Response::Schedule {
                schedule: Box::new(schedule),
            }),

        Request::DeleteSchedule { owner, id } => {
            service.delete_schedule(&owner, &id).map(|()| Response::Ok)
        }
    };

    result.unwrap_or_else(|e| error_response(&e))
}

fn error_response(err: &ServiceError) -> Response {
    Response::error(err.kind(), err.to_string())
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Request timeout")]
    Timeout,
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
