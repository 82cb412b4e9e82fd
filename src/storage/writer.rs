//! Single writer task
//!
//! Every store mutation made during a crawl travels over one channel to a
//! dedicated blocking thread that owns the SQLite connection. Queued commands
//! are applied in one transaction (group commit), each inside its own
//! savepoint, and callers only hear back once that transaction is durable.

use crate::content::Record;
use crate::state::CheckpointStatus;
use crate::storage::traits::{ContentStore, StorageError, StorageResult};
use crate::storage::{SaveOutcome, SqliteContentStore};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Reply<T> = oneshot::Sender<StorageResult<T>>;

/// Commands accepted by the writer thread
enum WriteCommand {
    Accept {
        record: Box<Record>,
        item_url: String,
        identifier: Option<u64>,
        reply: Reply<SaveOutcome>,
    },
    MarkVisited {
        url: String,
        source: String,
        reply: Reply<()>,
    },
    UpdateCheckpoint {
        source: String,
        last_identifier: Option<u64>,
        last_url: Option<String>,
        status: CheckpointStatus,
        reply: Reply<()>,
    },
    Flush {
        reply: Reply<()>,
    },
}

/// A command that ran inside the current batch and awaits the commit
enum Pending {
    Save(Reply<SaveOutcome>, StorageResult<SaveOutcome>),
    Unit(Reply<()>, StorageResult<()>),
}

impl Pending {
    fn resolve(self, commit: &Result<(), String>) {
        // A dropped receiver only means the caller stopped waiting.
        match (self, commit) {
            (Pending::Save(reply, result), Ok(())) => {
                let _ = reply.send(result);
            }
            (Pending::Unit(reply, result), Ok(())) => {
                let _ = reply.send(result);
            }
            (Pending::Save(reply, _), Err(message)) => {
                let _ = reply.send(Err(StorageError::Database(message.clone())));
            }
            (Pending::Unit(reply, _), Err(message)) => {
                let _ = reply.send(Err(StorageError::Database(message.clone())));
            }
        }
    }
}

/// Cloneable handle used by workers and the scheduler to reach the writer
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::Sender<WriteCommand>,
}

/// Join handle of the writer thread; yields the store back on shutdown
pub struct WriterTask {
    handle: JoinHandle<SqliteContentStore>,
}

impl WriterTask {
    /// Waits for the writer to drain and returns the store
    ///
    /// Every [`StoreWriter`] clone must have been dropped first, otherwise
    /// this waits forever.
    pub async fn join(self) -> Result<SqliteContentStore, tokio::task::JoinError> {
        self.handle.await
    }
}

impl StoreWriter {
    /// Moves the store onto a blocking thread and returns a handle to it
    ///
    /// # Arguments
    ///
    /// * `store` - The content store; owned by the writer until `join`
    /// * `batch_size` - Maximum number of commands grouped into one commit
    pub fn spawn(store: SqliteContentStore, batch_size: usize) -> (StoreWriter, WriterTask) {
        let batch_size = batch_size.max(1);
        let (tx, rx) = mpsc::channel(batch_size * 4);
        let handle = tokio::task::spawn_blocking(move || run_writer(store, rx, batch_size));
        (StoreWriter { tx }, WriterTask { handle })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> WriteCommand,
    ) -> StorageResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| StorageError::WriterClosed)?;
        response.await.map_err(|_| StorageError::WriterClosed)?
    }

    /// Saves a record, marks it visited and advances the checkpoint atomically
    pub async fn accept(
        &self,
        record: Record,
        item_url: &str,
        identifier: Option<u64>,
    ) -> StorageResult<SaveOutcome> {
        let item_url = item_url.to_string();
        self.request(|reply| WriteCommand::Accept {
            record: Box::new(record),
            item_url,
            identifier,
            reply,
        })
        .await
    }

    /// Marks a URL as processed
    pub async fn mark_visited(&self, url: &str, source: &str) -> StorageResult<()> {
        let (url, source) = (url.to_string(), source.to_string());
        self.request(|reply| WriteCommand::MarkVisited { url, source, reply })
            .await
    }

    /// Upserts a checkpoint through the writer
    pub async fn update_checkpoint(
        &self,
        source: &str,
        last_identifier: Option<u64>,
        last_url: Option<&str>,
        status: CheckpointStatus,
    ) -> StorageResult<()> {
        let source = source.to_string();
        let last_url = last_url.map(str::to_string);
        self.request(|reply| WriteCommand::UpdateCheckpoint {
            source,
            last_identifier,
            last_url,
            status,
            reply,
        })
        .await
    }

    /// Commits everything queued before this call
    pub async fn flush(&self) -> StorageResult<()> {
        self.request(|reply| WriteCommand::Flush { reply }).await
    }
}

fn run_writer(
    mut store: SqliteContentStore,
    mut rx: mpsc::Receiver<WriteCommand>,
    batch_size: usize,
) -> SqliteContentStore {
    while let Some(first) = rx.blocking_recv() {
        let mut pending = Vec::with_capacity(batch_size);

        if let Err(e) = store.begin_batch() {
            tracing::error!("Failed to open write transaction: {}", e);
        }

        let mut next = Some(first);
        while let Some(command) = next.take() {
            let is_flush = matches!(command, WriteCommand::Flush { .. });
            pending.push(apply(&mut store, command));

            if is_flush || pending.len() >= batch_size {
                break;
            }
            next = rx.try_recv().ok();
        }

        let commit = store.commit_batch().map_err(|e| {
            tracing::error!("Write batch of {} commands failed to commit: {}", pending.len(), e);
            if let Err(rollback) = store.rollback_batch() {
                tracing::error!("Rollback after failed commit also failed: {}", rollback);
            }
            e.to_string()
        });

        tracing::trace!("Committed write batch of {} commands", pending.len());
        for item in pending {
            item.resolve(&commit);
        }
    }

    if let Err(e) = store.commit_batch() {
        tracing::error!("Final commit failed: {}", e);
    }
    store
}

fn apply(store: &mut SqliteContentStore, command: WriteCommand) -> Pending {
    match command {
        WriteCommand::Accept {
            record,
            item_url,
            identifier,
            reply,
        } => Pending::Save(reply, store.accept(&record, &item_url, identifier)),
        WriteCommand::MarkVisited { url, source, reply } => {
            Pending::Unit(reply, store.mark_visited(&url, &source))
        }
        WriteCommand::UpdateCheckpoint {
            source,
            last_identifier,
            last_url,
            status,
            reply,
        } => Pending::Unit(
            reply,
            store.update_checkpoint(&source, last_identifier, last_url.as_deref(), status),
        ),
        WriteCommand::Flush { reply } => Pending::Unit(reply, Ok(())),
    }
}
