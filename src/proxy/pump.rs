/* STATIC Proxy (AGPL-3.0)

Copyright (C) 2025 - 404 Contributors

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

*/

use std::{io, pin::Pin};

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use tokio::{sync::mpsc, task::JoinHandle};

/// Upstream bytes as they arrive. Errors surface mid-stream after headers were sent.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Body type every downstream response uses.
pub type RelayBody = UnsyncBoxBody<Bytes, io::Error>;

type FrameSender = mpsc::Sender<Result<Frame<Bytes>, io::Error>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpOutcome {
    Completed,
    /// Client went away; the upstream read was abandoned.
    DownstreamClosed,
    /// Upstream failed after headers were sent; the client connection is aborted.
    UpstreamFailed(String),
}

#[derive(Debug, Clone)]
pub struct PumpReport {
    pub bytes: u64,
    pub chunks: u64,
    pub outcome: PumpOutcome,
}

pub fn full_body(bytes: impl Into<Bytes>) -> RelayBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty_body() -> RelayBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Spawns the Stream Pump: upstream chunks flow through a bounded channel of `depth`
/// chunks into the returned body.
///
/// **Backpressure:**
/// A slow client fills the channel and suspends the upstream read, so at most `depth`
/// chunks are buffered per response.
///
/// **Cancellation:**
/// Dropping the body closes the channel. The task notices through `tx.closed()`, stops
/// reading and drops the upstream response, which releases the upstream connection.
///
/// **Upstream Failure:**
/// Headers are already on the wire, so the error is sent as an `Err` frame and hyper
/// aborts the client connection instead of ending the body cleanly.
pub fn spawn_pump(source: ByteStream, depth: usize) -> (RelayBody, JoinHandle<PumpReport>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let handle = tokio::spawn(pump(source, tx));

    let frames = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    (StreamBody::new(frames).boxed_unsync(), handle)
}

async fn pump(mut source: ByteStream, tx: FrameSender) -> PumpReport {
    let mut report = PumpReport {
        bytes: 0,
        chunks: 0,
        outcome: PumpOutcome::Completed,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                report.outcome = PumpOutcome::DownstreamClosed;
                return report;
            }
            item = source.next() => item,
        };

        match next {
            None => return report,
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                let len = chunk.len() as u64;
                if tx.send(Ok(Frame::data(chunk))).await.is_err() {
                    report.outcome = PumpOutcome::DownstreamClosed;
                    return report;
                }
                report.bytes += len;
                report.chunks += 1;
            }
            Some(Err(err)) => {
                report.outcome = PumpOutcome::UpstreamFailed(err.to_string());
                let _ = tx.send(Err(err)).await;
                return report;
            }
        }
    }
}
