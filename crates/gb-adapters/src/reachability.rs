use gb_core::{GameKind, TestReachabilityOutput};
use http::StatusCode;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// Why a reachability probe failed, mapped to a fixed operator-facing reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unreachable {
    Unauthorized,
    NoResponse,
    TimedOut,
    Unexpected,
}

impl Unreachable {
    pub fn classify(err: &AdapterError) -> Self {
        match err {
            AdapterError::Http { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN =>
            {
                Unreachable::Unauthorized
            }
            AdapterError::Http { .. }
            | AdapterError::Transport { .. }
            | AdapterError::NotConnected { .. } => Unreachable::NoResponse,
            AdapterError::Timeout { .. } => Unreachable::TimedOut,
            _ => Unreachable::Unexpected,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Unreachable::Unauthorized => {
                "Unauthorized, please check that the admin user and token are correct"
            }
            Unreachable::NoResponse => {
                "Did not receive a response, please check that the server is running, the IP/port is correct and that it is not firewalled"
            }
            Unreachable::TimedOut => {
                "Request timed out, the server did not respond in the allocated time"
            }
            Unreachable::Unexpected => "Unexpected error, this might be a bug",
        }
    }
}

/// Runs a status query and a trivial command concurrently under one deadline.
///
/// Never fails: every problem is folded into a non-connectable output.
pub async fn probe<S, C, A, B>(
    game: GameKind,
    timeout: Duration,
    status: S,
    command: C,
) -> TestReachabilityOutput
where
    S: Future<Output = Result<A>>,
    C: Future<Output = Result<B>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, async { tokio::try_join!(status, command) }).await;

    let failure = match outcome {
        Ok(Ok(_)) => {
            let latency = started.elapsed().as_millis() as u64;
            debug!(game = %game, latency_ms = latency, "reachability probe succeeded");
            return TestReachabilityOutput::reachable(latency);
        }
        Ok(Err(err)) => {
            warn!(game = %game, error = %err, "reachability probe failed");
            Unreachable::classify(&err)
        }
        Err(_) => {
            warn!(game = %game, timeout_ms = timeout.as_millis() as u64, "reachability probe timed out");
            Unreachable::TimedOut
        }
    };
    TestReachabilityOutput::unreachable(failure.reason())
}
