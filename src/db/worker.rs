//! Connection workers.
//!
//! Native cursors borrow the connection they were opened on, so each live
//! connection is owned by a dedicated thread. The adapter side talks to it over
//! a request channel, and result handles pull rows from the open cursor a
//! block at a time. A cursor stays open until its rows run out, its handle is
//! freed, or the next statement on the same connection abandons it.

use crate::db::driver::{DriverKind, Execution, ForwardRows, NativeConnection, ScrollRows};
use crate::db::error::NativeError;
use crate::db::value::Value;
use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

/// Rows a result handle pulls per round trip to the worker.
pub const FETCH_BLOCK: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, NativeError>>;

/// Native side of a connection, driven by its worker thread.
pub trait Session: Sized {
    /// Open cursor over the first result set of a statement.
    type Cursor<'a>
    where
        Self: 'a;

    /// Run one statement. Returns its column names and an open cursor when it
    /// produced a result set.
    fn execute(&mut self, sql: &str) -> Result<Option<(Vec<String>, Self::Cursor<'_>)>, NativeError>;

    /// Up to `max` further rows. Fewer than `max` means the result set ended.
    fn fetch(cursor: &mut Self::Cursor<'_>, max: usize) -> Result<Vec<Vec<Value>>, NativeError>;

    fn close(self) -> Result<(), NativeError>;
}

enum Request {
    Execute { sql: String, resp: Reply<Head> },
    Fetch { result: u64, resp: Reply<Vec<Vec<Value>>> },
    Free { result: u64 },
    Close { resp: Reply<()> },
}

enum Head {
    Done,
    Rows { result: u64, columns: Vec<String> },
}

/// Send a request and wait for the worker's answer.
fn call<T>(
    requests: &mpsc::UnboundedSender<Request>,
    request: impl FnOnce(Reply<T>) -> Request,
) -> Result<T, NativeError> {
    let (resp, answer) = oneshot::channel();
    requests
        .send(request(resp))
        .map_err(|_| NativeError::generic("connection is closed"))?;
    answer
        .blocking_recv()
        .map_err(|_| NativeError::generic("connection worker dropped the request"))?
}

/// Open a session on a new worker thread. `open` runs on that thread, so the
/// session itself never crosses threads.
pub fn spawn<S, F>(kind: DriverKind, open: F) -> Result<Box<dyn NativeConnection>, NativeError>
where
    S: Session,
    F: FnOnce() -> Result<S, NativeError> + Send + 'static,
{
    let (requests, receiver) = mpsc::unbounded_channel();
    let (init_tx, init_rx) = oneshot::channel();

    let thread = thread::Builder::new()
        .name(format!("{}-connection", kind))
        .spawn(move || match open() {
            Ok(session) => {
                let _ = init_tx.send(Ok(()));
                serve(session, receiver);
            }
            Err(err) => {
                let _ = init_tx.send(Err(err));
            }
        })
        .map_err(|e| NativeError::generic(e.to_string()))?;

    match init_rx.blocking_recv() {
        Ok(Ok(())) => Ok(Box::new(WorkerConnection {
            kind,
            requests,
            thread: Some(thread),
            last_error: None,
        })),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => Err(NativeError::generic(format!(
            "{} connection worker failed to start",
            kind
        ))),
    }
}

fn serve<S: Session>(mut session: S, mut requests: mpsc::UnboundedReceiver<Request>) {
    let mut results = 0u64;
    let mut next = requests.blocking_recv();

    while let Some(request) = next.take() {
        next = match request {
            Request::Execute { sql, resp } => {
                results += 1;
                match session.execute(&sql) {
                    Ok(Some((columns, cursor))) => {
                        let _ = resp.send(Ok(Head::Rows {
                            result: results,
                            columns,
                        }));
                        stream::<S>(cursor, results, &mut requests)
                    }
                    Ok(None) => {
                        let _ = resp.send(Ok(Head::Done));
                        requests.blocking_recv()
                    }
                    Err(err) => {
                        let _ = resp.send(Err(err));
                        requests.blocking_recv()
                    }
                }
            }
            // Handles of finished or abandoned results.
            Request::Fetch { resp, .. } => {
                let _ = resp.send(Ok(Vec::new()));
                requests.blocking_recv()
            }
            Request::Free { .. } => requests.blocking_recv(),
            Request::Close { resp } => {
                let _ = resp.send(session.close());
                return;
            }
        };
    }
    tracing::trace!("connection worker exiting");
}

/// Serve fetches for one open cursor. Returns the next request that does not
/// belong to it; the cursor is dropped on return.
fn stream<S: Session>(
    mut cursor: S::Cursor<'_>,
    result: u64,
    requests: &mut mpsc::UnboundedReceiver<Request>,
) -> Option<Request> {
    loop {
        match requests.blocking_recv()? {
            Request::Fetch { result: id, resp } if id == result => {
                let block = S::fetch(&mut cursor, FETCH_BLOCK);
                let ended = !matches!(&block, Ok(rows) if rows.len() == FETCH_BLOCK);
                let _ = resp.send(block);
                if ended {
                    return requests.blocking_recv();
                }
            }
            Request::Fetch { resp, .. } => {
                let _ = resp.send(Ok(Vec::new()));
            }
            Request::Free { result: id } if id == result => return requests.blocking_recv(),
            Request::Free { .. } => {}
            other => return Some(other),
        }
    }
}

/// Adapter-side handle of a worker-owned connection.
pub struct WorkerConnection {
    kind: DriverKind,
    requests: mpsc::UnboundedSender<Request>,
    thread: Option<JoinHandle<()>>,
    last_error: Option<NativeError>,
}

impl NativeConnection for WorkerConnection {
    fn execute(&mut self, sql: &str) -> Result<Execution, NativeError> {
        let head = call(&self.requests, |resp| Request::Execute {
            sql: sql.to_string(),
            resp,
        });
        let result = head.map(|head| match head {
            Head::Done => Execution::Done,
            Head::Rows { result, columns } => {
                let rows = RemoteRows::new(result, self.requests.clone());
                if self.kind.supports_seek() {
                    Execution::Rows(Box::new(ScrollRows::new(columns, rows)))
                } else {
                    Execution::Rows(Box::new(ForwardRows::new(columns, rows)))
                }
            }
        });
        self.last_error = result.as_ref().err().cloned();
        result
    }

    fn last_error(&self) -> Option<NativeError> {
        self.last_error.clone()
    }

    fn close(&mut self) -> Result<(), NativeError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let result = call(&self.requests, |resp| Request::Close { resp });
        if thread.join().is_err() {
            tracing::warn!(driver = %self.kind, "connection worker panicked");
        }
        result
    }
}

impl Drop for WorkerConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(driver = %self.kind, error = %err, "close on drop failed");
        }
    }
}

/// Rows of one cursor on a worker, requested a block at a time.
struct RemoteRows {
    result: u64,
    requests: mpsc::UnboundedSender<Request>,
    block: VecDeque<Vec<Value>>,
    ended: bool,
}

impl RemoteRows {
    fn new(result: u64, requests: mpsc::UnboundedSender<Request>) -> Self {
        Self {
            result,
            requests,
            block: VecDeque::new(),
            ended: false,
        }
    }
}

impl Iterator for RemoteRows {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Vec<Value>> {
        if self.block.is_empty() && !self.ended {
            let result = self.result;
            match call(&self.requests, |resp| Request::Fetch { result, resp }) {
                Ok(rows) => {
                    self.ended = rows.len() < FETCH_BLOCK;
                    self.block = rows.into();
                }
                Err(err) => {
                    tracing::warn!(code = err.code, error = %err.message, "fetch failed");
                    self.ended = true;
                }
            }
        }
        self.block.pop_front()
    }
}

impl Drop for RemoteRows {
    fn drop(&mut self) {
        if !self.ended {
            let _ = self.requests.send(Request::Free {
                result: self.result,
            });
        }
    }
}
