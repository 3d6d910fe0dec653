use crate::config::Config;
use crate::connection::ClientState;
use crate::resp::{Reply, RespParser};
use crate::store::DbEngine;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Accept loop: one handler task per connection, graceful shutdown on
/// termination signals (close the listener, drain the handlers, then close
/// the engine).
pub async fn serve(config: Arc<Config>, engine: Arc<dyn DbEngine>) -> io::Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    let tracker = TaskTracker::new();
    let permits = (config.maxclients > 0).then(|| Arc::new(Semaphore::new(config.maxclients)));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("accept failed: {err}");
                        continue;
                    }
                };
                let permit = match &permits {
                    Some(semaphore) => match semaphore.clone().try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            debug!("maxclients reached, refusing {peer_addr}");
                            continue;
                        }
                    },
                    None => None,
                };

                debug!("connection from {peer_addr}");
                let engine = engine.clone();
                let cancel = cancel.child_token();
                tracker.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = handle_connection(stream, engine, cancel).await {
                        debug!("connection {peer_addr} ended with error: {err}");
                    }
                    debug!("connection closed: {peer_addr}");
                });
            }
            _ = cancel.cancelled() => break,
        }
    }

    drop(listener);
    info!("shutting down, draining client handlers");
    tracker.close();
    tracker.wait().await;
    engine.close().await;
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    engine: Arc<dyn DbEngine>,
    cancel: CancellationToken,
) -> io::Result<()> {
    let mut client = ClientState::new();
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        // Dispatch every complete command already buffered.
        loop {
            match RespParser::parse(&mut buf) {
                Ok(Some(value)) => {
                    let line = match value.into_cmd_line() {
                        Some(line) => line,
                        None => {
                            let err = Reply::error("ERR Protocol error: expected multibulk command");
                            stream.write_all(&err.serialize()).await?;
                            continue;
                        }
                    };
                    if line.is_empty() {
                        continue;
                    }
                    let reply = engine.exec(&mut client, &line).await;
                    stream.write_all(&reply.serialize()).await?;
                    if client.should_close {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // Framing is unrecoverable; report and drop the client.
                    let reply = Reply::error(format!("ERR {err}"));
                    let _ = stream.write_all(&reply.serialize()).await;
                    return Ok(());
                }
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buf) => {
                match read {
                    Ok(0) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(err),
                }
            }
            _ = cancel.cancelled() => return Ok(()),
        }
    }
}

#[cfg(unix)]
fn spawn_signal_watcher(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv_or_pending(sig: &mut Option<Signal>) {
        match sig {
            Some(sig) => {
                sig.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    tokio::spawn(async move {
        let mut hangup = signal(SignalKind::hangup()).ok();
        let mut interrupt = signal(SignalKind::interrupt()).ok();
        let mut terminate = signal(SignalKind::terminate()).ok();
        let mut quit = signal(SignalKind::quit()).ok();

        tokio::select! {
            _ = recv_or_pending(&mut hangup) => {}
            _ = recv_or_pending(&mut interrupt) => {}
            _ = recv_or_pending(&mut terminate) => {}
            _ = recv_or_pending(&mut quit) => {}
        }
        info!("termination signal received");
        cancel.cancel();
    });
}

#[cfg(not(unix))]
fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received");
        cancel.cancel();
    });
}
