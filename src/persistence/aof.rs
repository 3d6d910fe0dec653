use crate::connection::ClientState;
use crate::persistence::marshal::{entity_to_cmd, make_expire_cmd};
use crate::resp::{CmdLine, Reply, RespParser};
use crate::store::{DataStore, DbEngine};
use bytes::BytesMut;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const AOF_QUEUE_SIZE: usize = 1 << 16;

/// One queued log entry: the command line plus the database it ran against,
/// so the writer can interleave SELECT records.
pub struct AofPayload {
    pub db_index: usize,
    pub cmd_line: CmdLine,
}

/// The live log file plus the database the writer last selected into it.
/// Guarded by the pausing lock: the writer appends under the shared side,
/// rewrite swaps the file under the exclusive side.
struct AofInner {
    file: File,
    current_db: AtomicUsize,
}

struct RewriteCtx {
    tmp_path: String,
    tmp_file: File,
    /// Log length at the start of rewrite; bytes past it are the
    /// concurrently-written tail to splice in afterwards.
    file_size: u64,
    /// The writer's selected database at that moment, so the spliced tail
    /// keeps its SELECT context.
    db_index: usize,
}

/// Append-only-file handler: replays the existing log on startup, then owns
/// a single writer thread fed by a bounded queue, and drives the live
/// rewrite protocol.
pub struct AofHandler {
    db: Arc<DataStore>,
    tmp_db_maker: Box<dyn Fn() -> Arc<DataStore> + Send + Sync>,
    file_name: String,
    tx: Sender<AofPayload>,
    shutdown_tx: Sender<()>,
    finished_rx: Receiver<()>,
    pausing: RwLock<AofInner>,
}

impl AofHandler {
    pub async fn new(
        db: Arc<DataStore>,
        tmp_db_maker: Box<dyn Fn() -> Arc<DataStore> + Send + Sync>,
    ) -> io::Result<Arc<AofHandler>> {
        let file_name = db.config().appendfilename.clone();

        let replayed = replay_file(&file_name, &db, None).await?;
        if replayed > 0 {
            info!("replayed {replayed} commands from {file_name}");
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_name)?;

        let (tx, rx) = bounded(AOF_QUEUE_SIZE);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let (finished_tx, finished_rx) = bounded(1);

        let handler = Arc::new(AofHandler {
            db,
            tmp_db_maker,
            file_name,
            tx,
            shutdown_tx,
            finished_rx,
            pausing: RwLock::new(AofInner {
                file,
                current_db: AtomicUsize::new(0),
            }),
        });

        let writer = handler.clone();
        std::thread::Builder::new()
            .name("aof-writer".to_string())
            .spawn(move || writer.write_loop(rx, shutdown_rx, finished_tx))?;

        Ok(handler)
    }

    /// Queue handle given to each database's mutation path.
    pub fn sender(&self) -> Sender<AofPayload> {
        self.tx.clone()
    }

    fn write_loop(&self, rx: Receiver<AofPayload>, shutdown_rx: Receiver<()>, finished_tx: Sender<()>) {
        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(payload) => self.write_payload(payload),
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _ => {
                    // End of stream: drain whatever is already queued.
                    for payload in rx.try_iter() {
                        self.write_payload(payload);
                    }
                    break;
                }
            }
        }
        let inner = self.pausing.read();
        if let Err(err) = inner.file.sync_all() {
            warn!("aof final fsync failed: {err}");
        }
        let _ = finished_tx.send(());
    }

    fn write_payload(&self, payload: AofPayload) {
        let inner = self.pausing.read();
        if payload.db_index != inner.current_db.load(Ordering::Relaxed) {
            let select = select_cmd(payload.db_index);
            if let Err(err) = (&inner.file).write_all(&Reply::multi_bulk(&select).serialize()) {
                warn!("aof select write failed: {err}");
                return;
            }
            inner.current_db.store(payload.db_index, Ordering::Relaxed);
        }
        if let Err(err) = (&inner.file).write_all(&Reply::multi_bulk(&payload.cmd_line).serialize())
        {
            warn!("aof write failed: {err}");
        }
    }

    /// Signal end-of-stream and wait for the writer to drain and fsync.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
        if self
            .finished_rx
            .recv_timeout(Duration::from_secs(10))
            .is_err()
        {
            warn!("timed out waiting for aof writer to finish");
        }
    }

    /// Live rewrite: compact the log to the minimal recreation commands for
    /// the state it encodes, while normal writes continue. The pausing lock
    /// is held only to snapshot the prefix length and to splice the tail.
    pub async fn rewrite(&self) -> io::Result<()> {
        let ctx = self.start_rewrite()?;
        let result = self.do_rewrite(&ctx).await;
        if let Err(err) = result {
            let _ = std::fs::remove_file(&ctx.tmp_path);
            return Err(err);
        }
        self.finish_rewrite(ctx);
        Ok(())
    }

    fn start_rewrite(&self) -> io::Result<RewriteCtx> {
        let inner = self.pausing.write();
        inner.file.sync_all()?;
        let file_size = std::fs::metadata(&self.file_name)?.len();
        let tmp_path = format!("{}.rewrite", self.file_name);
        let tmp_file = File::create(&tmp_path)?;
        Ok(RewriteCtx {
            tmp_path,
            tmp_file,
            file_size,
            db_index: inner.current_db.load(Ordering::Relaxed),
        })
    }

    /// Runs without the pausing lock: rebuild the prefix state in a shadow
    /// store and dump it as minimal commands.
    async fn do_rewrite(&self, ctx: &RewriteCtx) -> io::Result<()> {
        let shadow = (self.tmp_db_maker)();
        replay_file(&self.file_name, &shadow, Some(ctx.file_size)).await?;

        let mut out = &ctx.tmp_file;
        for index in 0..self.db.database_count() {
            out.write_all(&Reply::multi_bulk(&select_cmd(index)).serialize())?;
            let db = match shadow.db_at(index) {
                Some(db) => db,
                None => continue,
            };
            let mut write_err = None;
            db.for_each(|key, entity, expire_at| {
                let cmd = Reply::multi_bulk(&entity_to_cmd(key, entity)).serialize();
                if let Err(err) = out.write_all(&cmd) {
                    write_err = Some(err);
                    return false;
                }
                if let Some(at) = expire_at {
                    let expire = Reply::multi_bulk(&make_expire_cmd(key, at)).serialize();
                    if let Err(err) = out.write_all(&expire) {
                        write_err = Some(err);
                        return false;
                    }
                }
                true
            });
            if let Some(err) = write_err {
                return Err(err);
            }
        }
        out.flush()?;
        Ok(())
    }

    fn finish_rewrite(&self, ctx: RewriteCtx) {
        let mut inner = self.pausing.write();

        let mut old = match File::open(&self.file_name) {
            Ok(file) => file,
            Err(err) => {
                error!("open live aof for splice failed: {err}");
                return;
            }
        };
        if let Err(err) = old.seek(SeekFrom::Start(ctx.file_size)) {
            error!("seek past rewrite prefix failed: {err}");
            return;
        }

        // Align the temp file's trailing database with the tail's context,
        // then splice in everything written during the dump.
        let mut tmp = ctx.tmp_file;
        if let Err(err) = tmp.write_all(&Reply::multi_bulk(&select_cmd(ctx.db_index)).serialize()) {
            error!("append select to rewritten aof failed: {err}");
            return;
        }
        if let Err(err) = io::copy(&mut old, &mut tmp) {
            error!("splice aof tail failed: {err}");
            return;
        }
        drop(tmp);
        drop(old);

        if let Err(err) = std::fs::rename(&ctx.tmp_path, &self.file_name) {
            error!("replace aof with rewritten file failed: {err}");
            return;
        }

        // The data on disk is already the new log; running without a handle
        // to it is unrecoverable.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_name)
            .unwrap_or_else(|err| panic!("reopen aof after rewrite failed: {err}"));
        inner.file = file;

        let current = inner.current_db.load(Ordering::Relaxed);
        if let Err(err) = (&inner.file).write_all(&Reply::multi_bulk(&select_cmd(current)).serialize())
        {
            warn!("append select to reopened aof failed: {err}");
        }
    }
}

fn select_cmd(db_index: usize) -> CmdLine {
    vec![b"SELECT".to_vec(), db_index.to_string().into_bytes()]
}

/// Replay a log (or its first `max_bytes`) into a store, command by command,
/// through a replay connection so SELECT switches context. Parse errors stop
/// the replay at the last complete entry.
pub async fn replay_file(
    path: &str,
    store: &Arc<DataStore>,
    max_bytes: Option<u64>,
) -> io::Result<usize> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    let mut raw = Vec::new();
    match max_bytes {
        Some(limit) => {
            file.take(limit).read_to_end(&mut raw)?;
        }
        None => {
            let mut file = file;
            file.read_to_end(&mut raw)?;
        }
    }

    let mut buf = BytesMut::from(&raw[..]);
    let mut client = ClientState::replay(0);
    let mut count = 0usize;
    loop {
        match RespParser::parse(&mut buf) {
            Ok(Some(value)) => {
                let line = match value.into_cmd_line() {
                    Some(line) if !line.is_empty() => line,
                    _ => continue,
                };
                let reply = store.exec(&mut client, &line).await;
                if reply.is_error() {
                    error!("aof replay command failed: {reply:?}");
                }
                count += 1;
            }
            Ok(None) => break,
            Err(err) => {
                error!("aof parse error, stopping replay: {err}");
                break;
            }
        }
    }
    Ok(count)
}
