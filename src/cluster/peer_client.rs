use crate::error::{ServerError, ServerResult};
use crate::resp::{CmdLine, Reply, RespParser};
use crate::wait::Wait;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_RETRIES: usize = 3;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

struct Request {
    cmd_line: CmdLine,
    /// `None` for fire-and-forget heartbeats whose reply is discarded.
    reply_tx: Option<oneshot::Sender<Reply>>,
}

/// Client for one peer connection: requests go through a send queue to the
/// I/O task, which matches replies to requesters in FIFO order and pings the
/// peer when the link is idle.
pub struct PeerClient {
    addr: String,
    req_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    /// Write fence: close waits for in-flight requests to drain.
    in_flight: Arc<Wait>,
}

impl PeerClient {
    pub async fn connect(addr: &str) -> ServerResult<PeerClient> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| ServerError::PeerUnreachable(addr.to_string(), err.to_string()))?;

        let (req_tx, req_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(io_loop(
            stream,
            req_rx,
            cancel.clone(),
            addr.to_string(),
        ));

        Ok(PeerClient {
            addr: addr.to_string(),
            req_tx,
            cancel,
            in_flight: Arc::new(Wait::new()),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a command and wait for its reply, retrying on timeout.
    pub async fn send(&self, cmd_line: &CmdLine) -> ServerResult<Reply> {
        for _ in 0..MAX_RETRIES {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.in_flight.add(1);
            let queued = self
                .req_tx
                .send(Request {
                    cmd_line: cmd_line.clone(),
                    reply_tx: Some(reply_tx),
                })
                .await;
            if queued.is_err() {
                self.in_flight.done();
                return Err(ServerError::ConnectionLost);
            }

            match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
                Ok(Ok(reply)) => {
                    self.in_flight.done();
                    return Ok(reply);
                }
                Ok(Err(_)) => {
                    self.in_flight.done();
                    return Err(ServerError::ConnectionLost);
                }
                Err(_) => {
                    self.in_flight.done();
                    // timed out, rewrite the request
                }
            }
        }
        Err(ServerError::PeerTimeout(self.addr.clone()))
    }

    /// Wait (bounded) for outstanding requests, then stop the I/O task.
    pub async fn close(&self) {
        if self.in_flight.wait_with_timeout(CLOSE_TIMEOUT).await {
            warn!("closing {} with requests still in flight", self.addr);
        }
        self.cancel.cancel();
    }
}

async fn io_loop(
    stream: TcpStream,
    mut req_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
    addr: String,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    // Reply slots in request order; a slot's sender is gone for heartbeats
    // and abandoned (timed-out) requests.
    let mut pending: VecDeque<Option<oneshot::Sender<Reply>>> = VecDeque::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        // Match any fully buffered replies before waiting again.
        loop {
            match RespParser::parse(&mut buf) {
                Ok(Some(reply)) => match pending.pop_front() {
                    Some(Some(reply_tx)) => {
                        let _ = reply_tx.send(reply);
                    }
                    Some(None) => {}
                    None => debug!("unmatched reply from {addr}"),
                },
                Ok(None) => break,
                Err(err) => {
                    warn!("protocol error from peer {addr}: {err}");
                    return;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            request = req_rx.recv() => {
                let request = match request {
                    Some(request) => request,
                    None => return,
                };
                let bytes = Reply::multi_bulk(&request.cmd_line).serialize();
                pending.push_back(request.reply_tx);
                if let Err(err) = write_half.write_all(&bytes).await {
                    warn!("write to peer {addr} failed: {err}");
                    return;
                }
            }
            read = read_half.read_buf(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!("peer {addr} closed the connection");
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("read from peer {addr} failed: {err}");
                        return;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if pending.is_empty() {
                    let ping = Reply::multi_bulk(&[b"PING".to_vec()]).serialize();
                    pending.push_back(None);
                    if let Err(err) = write_half.write_all(&ping).await {
                        warn!("heartbeat to peer {addr} failed: {err}");
                        return;
                    }
                }
            }
        }
    }
}
