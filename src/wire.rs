use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;

/// The wire protocol: one JSON request per line, one JSON reply per line.
/// A connection that issued `watch` additionally receives event lines for
/// the watched date, interleaved with replies.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateBooking {
        booking: BookingDraft,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    SetStatus {
        id: Ulid,
        status: String,
    },
    DeleteBooking {
        id: Ulid,
    },
    GetBooking {
        id: Ulid,
    },
    ListBookings {
        #[serde(default)]
        filter: BookingFilter,
    },
    Occupancy {
        date: NaiveDate,
    },
    MonthlyReport {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    RevenueByDay {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    Watch {
        date: NaiveDate,
    },
    Unwatch,
}

#[derive(Debug, Serialize)]
pub struct WireError {
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Reply {
    fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn ok_empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    fn err(kind: &'static str, message: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(WireError { kind, message }),
        }
    }
}

/// Pushed to a watching connection for every mutation on its date.
#[derive(Debug, Serialize)]
struct Notification {
    event: Event,
}

pub fn error_kind(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "NOT_FOUND",
        EngineError::Validation { .. } => "VALIDATION_ERROR",
        EngineError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
        EngineError::InvalidStatus(_) => "INVALID_STATUS",
        EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
        EngineError::Wal(_) => "WAL_ERROR",
    }
}

fn reply_from<T: Serialize>(result: Result<T, EngineError>) -> Reply {
    match result {
        Ok(v) => Reply::ok(serde_json::to_value(v).unwrap_or(serde_json::Value::Null)),
        Err(e) => {
            if matches!(e, EngineError::CapacityExceeded(_)) {
                metrics::counter!(observability::CAPACITY_REJECTIONS_TOTAL).increment(1);
            }
            Reply::err(error_kind(&e), e.to_string())
        }
    }
}

/// Execute one request. `watch` is this connection's event subscription,
/// replaced by `watch`/`unwatch` ops.
pub async fn dispatch(
    engine: &Engine,
    req: Request,
    watch: &mut Option<broadcast::Receiver<Event>>,
) -> Reply {
    let op = observability::op_label(&req);
    let start = Instant::now();

    let reply = match req {
        Request::CreateBooking { booking } => reply_from(engine.create_booking(booking).await),
        Request::UpdateBooking { id, patch } => reply_from(engine.update_booking(id, patch).await),
        Request::SetStatus { id, status } => match BookingStatus::from_label(&status) {
            Some(parsed) => reply_from(engine.set_status(id, parsed).await),
            None => {
                let e = EngineError::InvalidStatus(status);
                Reply::err(error_kind(&e), e.to_string())
            }
        },
        Request::DeleteBooking { id } => match engine.delete_booking(id).await {
            Ok(()) => Reply::ok_empty(),
            Err(e) => Reply::err(error_kind(&e), e.to_string()),
        },
        Request::GetBooking { id } => reply_from(engine.get_booking(id).await),
        Request::ListBookings { filter } => reply_from(engine.list_bookings(&filter).await),
        Request::Occupancy { date } => {
            let report = engine.occupancy_for_date(date).await;
            Reply::ok(serde_json::to_value(report).unwrap_or(serde_json::Value::Null))
        }
        Request::MonthlyReport {
            start_date,
            end_date,
        } => reply_from(engine.monthly_report(start_date, end_date).await),
        Request::RevenueByDay {
            start_date,
            end_date,
        } => reply_from(engine.revenue_by_day(start_date, end_date).await),
        Request::Watch { date } => {
            *watch = Some(engine.notify.subscribe(date));
            Reply::ok(serde_json::json!({ "watching": date }))
        }
        Request::Unwatch => {
            *watch = None;
            Reply::ok_empty()
        }
    };

    let status = if reply.ok { "ok" } else { "error" };
    metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    reply
}

async fn recv_watch(
    watch: &mut Option<broadcast::Receiver<Event>>,
) -> Result<Event, broadcast::error::RecvError> {
    match watch.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Serve one connection until the peer hangs up.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut watch: Option<broadcast::Receiver<Event>> = None;

    loop {
        tokio::select! {
            line = framed.next() => {
                let Some(line) = line else { break };
                let line = line?;
                let reply = match serde_json::from_str::<Request>(&line) {
                    Ok(req) => dispatch(&engine, req, &mut watch).await,
                    Err(e) => Reply::err("BAD_REQUEST", e.to_string()),
                };
                framed.send(serde_json::to_string(&reply)?).await?;
            }
            pushed = recv_watch(&mut watch) => {
                match pushed {
                    Ok(event) => {
                        let line = serde_json::to_string(&Notification { event })?;
                        framed.send(line).await?;
                    }
                    // Slow consumer dropped some events; the stream resumes.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => watch = None,
                }
            }
        }
    }

    Ok(())
}
