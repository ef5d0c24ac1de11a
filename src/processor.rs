use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use diesel::Connection;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::address::fee_payer;
use crate::block_events::{persist_block_events, BlockEventRecord, ChainEventHandlers};
use crate::coin::Coin;
use crate::context::CoreContext;
use crate::db::{self, BlockRecord, FeeRecord, MessageRecord, StoreOutcome, TxRecord};
use crate::decoders::MessageRegistry;
use crate::error::{failure_category, ConfigError, DecodeError, RpcError};
use crate::events::log_for_message;
use crate::retry::Backoff;
use crate::rpc_client::is_not_found;
use crate::rpc_client::types::{BlockHeader, BlockResults, MergedTx};

/// Heights still to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeightSource {
    /// Explicit heights from `base.block-input-file`.
    List(Vec<i64>),
    /// From `start` up to `end`; a negative end follows the chain.
    Range { start: i64, end: i64 },
}

/// Committed-height counter behind `base.block-timer`.
#[derive(Debug)]
struct BlockTimer {
    every: u64,
    committed: AtomicU64,
    started: Instant,
}

impl BlockTimer {
    fn new(every: u64) -> Self {
        BlockTimer {
            every,
            committed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn record(&self) {
        let committed = self.committed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every > 0 && committed % self.every == 0 {
            info!(
                "Indexed {} blocks in {:.1}s",
                committed,
                self.started.elapsed().as_secs_f64()
            );
        }
    }
}

/// Drives indexing: dispatches heights into a bounded queue drained by a pool
/// of workers, each of which owns a height from fetch to commit.
#[derive(Clone)]
pub struct BlockProcessor {
    ctx: Arc<CoreContext>,
    timer: Arc<BlockTimer>,
    /// Set once the shutdown grace period runs out; store work still in
    /// flight rolls back instead of committing.
    abandoned: Arc<AtomicBool>,
}

impl BlockProcessor {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        let timer = Arc::new(BlockTimer::new(ctx.config.base.block_timer));
        Self {
            ctx,
            timer,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until the configured work is done or `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.ctx.config.base.wait_for_chain {
            self.wait_for_chain(&shutdown).await?;
        }

        if self.ctx.config.base.index_epoch_events {
            return self.run_epochs(shutdown).await;
        }

        let source = self.height_source().await?;
        self.run_heights(source, shutdown).await
    }

    /// Gets the latest height from the node, retrying per the backoff budget
    pub async fn get_current_blockchain_tip(&self) -> Result<i64> {
        let status = self
            .ctx
            .backoff
            .run("Node status", || self.ctx.client.status())
            .await
            .context("Failed to get node status")?;
        Ok(status.latest_height)
    }

    async fn wait_for_chain(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let delay = Duration::from_secs(self.ctx.config.base.wait_for_chain_delay);
        loop {
            let status = self
                .ctx
                .backoff
                .run("Node status", || self.ctx.client.status())
                .await
                .context("Failed to get node status")?;
            if !status.catching_up {
                info!("Node is synced at height {}", status.latest_height);
                return Ok(());
            }
            info!(
                "Node is catching up at height {}. Waiting {}s...",
                status.latest_height,
                delay.as_secs()
            );
            if sleep_or_shutdown(delay, shutdown).await {
                return Ok(());
            }
        }
    }

    async fn height_source(&self) -> Result<HeightSource> {
        let base = &self.ctx.config.base;
        if let Some(path) = &base.block_input_file {
            let heights = read_block_input_file(path)?;
            info!("Indexing {} heights from {}", heights.len(), path.display());
            return Ok(HeightSource::List(heights));
        }

        let start = if base.start_block >= 0 {
            base.start_block
        } else {
            let ctx = self.ctx.clone();
            let highest = run_db(&self.ctx, move |conn| {
                let chain_pk = db::get_or_create_chain(conn, &ctx.chain.chain_id, &ctx.chain.name)?;
                db::highest_indexed_height(conn, chain_pk)
            })
            .await?;
            match highest {
                Some(height) => {
                    info!("Resuming after highest indexed height {}", height);
                    height + 1
                }
                None => 1,
            }
        };
        Ok(HeightSource::Range {
            start,
            end: base.end_block,
        })
    }

    async fn run_heights(&self, source: HeightSource, shutdown: watch::Receiver<bool>) -> Result<()> {
        let base = &self.ctx.config.base;
        let (sender, receiver) = mpsc::channel::<i64>(base.queue_size);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = JoinSet::new();
        for worker_id in 0..base.rpc_workers {
            let processor = self.clone();
            let receiver = receiver.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                take_heights(&receiver, &shutdown, |height| processor.index_height_with_retry(height)).await;
                debug!("Worker {} finished", worker_id);
            });
        }

        let dispatched = self.dispatch(source, &sender, &shutdown).await;
        drop(sender);

        if *shutdown.borrow() {
            let grace = self.ctx.config.shutdown_grace();
            info!("Shutting down, waiting up to {}s for workers", grace.as_secs());
            let drained = tokio::time::timeout(grace, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Workers did not finish within the grace period; aborting in-flight heights");
                self.abandoned.store(true, Ordering::SeqCst);
                workers.abort_all();
                while workers.join_next().await.is_some() {}
            }
        } else {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Worker task failed: {}", e);
                }
            }
        }

        dispatched?;
        info!("Indexing finished");
        Ok(())
    }

    /// Feed heights into the queue. Blocks while the queue is full.
    async fn dispatch(
        &self,
        source: HeightSource,
        sender: &mpsc::Sender<i64>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        match source {
            HeightSource::List(heights) => {
                for height in heights {
                    if !self.enqueue(height, sender, shutdown).await? {
                        break;
                    }
                }
                Ok(())
            }
            HeightSource::Range { start, end } => self.follow_chain(start, end, sender, shutdown).await,
        }
    }

    /// polling-latest: enqueue everything up to the node's latest height, then
    /// stop or wait for more.
    async fn follow_chain(
        &self,
        start: i64,
        end: i64,
        sender: &mpsc::Sender<i64>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let base = &self.ctx.config.base;
        let poll_delay = Duration::from_secs(base.wait_for_chain_delay);
        let mut next = start;

        loop {
            let latest = self.get_current_blockchain_tip().await?;
            let target = if end < 0 { latest } else { latest.min(end) };
            if next <= target {
                info!("Indexing heights {} to {}", next, target);
            }
            while next <= target {
                if !self.enqueue(next, sender, shutdown).await? {
                    return Ok(());
                }
                next += 1;
            }

            if end >= 0 && next > end {
                info!("Reached end block {}", end);
                return Ok(());
            }
            if base.exit_when_caught_up {
                info!("Caught up with the node at height {}", latest);
                return Ok(());
            }
            debug!("No new blocks to process. Waiting...");
            if sleep_or_shutdown(poll_delay, shutdown).await {
                return Ok(());
            }
        }
    }

    /// Queue one height. Returns false once shutdown has been requested.
    async fn enqueue(
        &self,
        height: i64,
        sender: &mpsc::Sender<i64>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<bool> {
        let prevent_reattempts = self.ctx.config.base.prevent_reattempts;
        queue_height(height, sender, shutdown, self.ctx.config.throttle(), |height| async move {
            if !prevent_reattempts {
                return Ok(false);
            }
            let ctx = self.ctx.clone();
            run_db(&self.ctx, move |conn| {
                let chain_pk = db::get_or_create_chain(conn, &ctx.chain.chain_id, &ctx.chain.name)?;
                db::is_failed_block(conn, chain_pk, height)
            })
            .await
        })
        .await
    }

    /// Index one height, retrying per the backoff budget; record a failed block once the budget is spent.
    async fn index_height_with_retry(&self, height: i64) {
        let label = format!("Block {}", height);
        let indexed = retry_or_record(
            &self.ctx.backoff,
            &label,
            || self.index_height(height),
            |e| self.record_failed_block(height, e),
        )
        .await;
        if indexed {
            self.timer.record();
        }
    }

    async fn record_failed_block(&self, height: i64, e: anyhow::Error) {
        let category = failure_category(&e);
        error!(
            "Failed to index block {} [{}]: {:#}",
            height, category, e
        );
        if e.chain()
            .filter_map(|cause| cause.downcast_ref::<RpcError>())
            .any(is_not_found)
        {
            warn!("Block {} is not available on the node; it may have been pruned", height);
        }

        if self.ctx.config.base.dry {
            return;
        }
        let ctx = self.ctx.clone();
        let recorded = run_db(&self.ctx, move |conn| {
            let chain_pk = db::get_or_create_chain(conn, &ctx.chain.chain_id, &ctx.chain.name)?;
            db::upsert_failed_block(conn, chain_pk, height)
        })
        .await;
        if let Err(e) = recorded {
            error!("Failed to record failed block {}: {:#}", height, e);
        }
    }

    /// indexing-height: fetch header, transactions and block results together,
    /// decode, then commit.
    async fn index_height(&self, height: i64) -> Result<()> {
        let started = Instant::now();
        let base = &self.ctx.config.base;
        let client = &self.ctx.client;
        let index_txs = base.index_chain;
        let index_events = base.index_block_events
            && !self.ctx.block_handlers.is_empty()
            && in_window(height, base.block_events_start_block, base.block_events_end_block);

        let (header, txs, results) = tokio::try_join!(
            client.block_header(height),
            async {
                if index_txs {
                    client.txs_at_height(height).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if index_events {
                    client.block_results(height).await.map(Some)
                } else {
                    Ok(None)
                }
            },
        )
        .with_context(|| format!("Failed to fetch block {}", height))?;

        let record = match &txs {
            Some(txs) => Some(decode_block(&self.ctx.messages, self.ctx.account_prefix(), &header, txs)?),
            None => None,
        };
        let events = match &results {
            Some(results) => Some(
                self.ctx
                    .block_handlers
                    .process(results)
                    .with_context(|| format!("Failed to process block events for {}", height))?,
            ),
            None => None,
        };

        if base.dry {
            info!(
                "Dry run: decoded block {} ({} txs, {} block events) in {:.2?}",
                height,
                txs.as_ref().map_or(0, Vec::len),
                events.as_ref().map_or(0, Vec::len),
                started.elapsed()
            );
            return Ok(());
        }

        let time = header.time.naive_utc();
        let ctx = self.ctx.clone();
        let abandoned = self.abandoned.clone();
        let outcome = run_db(&self.ctx, move |conn| {
            conn.transaction(|tx_conn| {
                let stored = match &record {
                    Some(record) => Some(db::store_block(
                        tx_conn,
                        &ctx.denoms,
                        &ctx.chain,
                        record,
                        ctx.config.base.reindex,
                    )?),
                    None => None,
                };
                let event_rows = match &events {
                    Some(events) => store_block_events(tx_conn, &ctx, height, time, events)?,
                    None => 0,
                };
                ensure_not_abandoned(&abandoned, height)?;
                Ok::<_, anyhow::Error>((stored, event_rows))
            })
        })
        .await
        .with_context(|| format!("Failed to store block {}", height))?;

        match outcome {
            (Some(StoreOutcome::AlreadyIndexed), _) => {
                info!("Block {} already indexed, skipped in {:.2?}", height, started.elapsed())
            }
            (Some(StoreOutcome::Stored { txs, movements }), event_rows) => info!(
                "Indexed block {}: {} txs, {} taxable movements, {} block events in {:.2?}",
                height,
                txs,
                movements,
                event_rows,
                started.elapsed()
            ),
            (None, event_rows) => info!(
                "Indexed block events for {}: {} rows in {:.2?}",
                height,
                event_rows,
                started.elapsed()
            ),
        }
        Ok(())
    }

    /// Epoch mode: record the node's current epoch, index pending epochs at
    /// their start heights, then wait for the next epoch.
    async fn run_epochs(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let base = &self.ctx.config.base;
        let identifier = base.epoch_indexing_identifier.clone();
        let handlers = ChainEventHandlers::for_epoch(&self.ctx.chain.chain_id, &identifier).ok_or_else(|| {
            ConfigError(format!(
                "no epoch handlers for {} epochs on {}",
                identifier, self.ctx.chain.chain_id
            ))
        })?;
        let poll_delay = Duration::from_secs(base.wait_for_chain_delay);
        let (first, last) = (base.epoch_events_start_epoch, base.epoch_events_end_epoch);

        let ctx = self.ctx.clone();
        let epoch_id = identifier.clone();
        let recorded = run_db(&self.ctx, move |conn| {
            let chain_pk = db::get_or_create_chain(conn, &ctx.chain.chain_id, &ctx.chain.name)?;
            db::latest_epoch(conn, chain_pk, &epoch_id)
        })
        .await?;
        match recorded {
            Some(epoch) => info!(
                "Latest recorded {} epoch is {} at height {}",
                identifier, epoch.epoch_number, epoch.start_height
            ),
            None => info!("No {} epochs recorded yet", identifier),
        }

        loop {
            let epochs = self
                .ctx
                .backoff
                .run("Epochs", || self.ctx.client.epochs())
                .await
                .context("Failed to query epochs")?;
            let current = epochs
                .into_iter()
                .find(|e| e.identifier == identifier)
                .with_context(|| format!("Node reports no {} epoch", identifier))?;

            let (current_epoch, start_height) = (current.current_epoch, current.current_epoch_start_height);
            let pending = if base.dry {
                // nothing is recorded, so only the node's current epoch is visible
                let in_range = current_epoch >= first && (last < 0 || current_epoch <= last);
                in_range
                    .then(|| db::models::Epoch {
                        id: 0,
                        blockchain_id: 0,
                        identifier: identifier.clone(),
                        epoch_number: current_epoch,
                        start_height,
                        block_events_indexed: false,
                    })
                    .into_iter()
                    .collect()
            } else {
                let ctx = self.ctx.clone();
                let epoch_id = identifier.clone();
                run_db(&self.ctx, move |conn| {
                    let chain_pk = db::get_or_create_chain(conn, &ctx.chain.chain_id, &ctx.chain.name)?;
                    db::upsert_epoch(conn, chain_pk, &epoch_id, current_epoch, start_height)?;
                    db::unindexed_epochs(conn, chain_pk, &epoch_id, first, last)
                })
                .await?
            };

            for epoch in pending {
                if *shutdown.borrow() {
                    return Ok(());
                }
                let label = format!("{} epoch {}", identifier, epoch.epoch_number);
                let indexed = self
                    .ctx
                    .backoff
                    .run(&label, || self.index_epoch(&handlers, &epoch))
                    .await;
                if let Err(e) = indexed {
                    error!(
                        "Failed to index {} [{}]: {:#}",
                        label,
                        failure_category(&e),
                        e
                    );
                }
            }

            if last >= 0 && current_epoch >= last {
                info!("Reached end epoch {}", last);
                return Ok(());
            }
            if base.exit_when_caught_up {
                info!("Caught up with {} epoch {}", identifier, current_epoch);
                return Ok(());
            }
            debug!("Awaiting {} epoch after {}", identifier, current_epoch);
            if sleep_or_shutdown(poll_delay, &shutdown).await {
                return Ok(());
            }
        }
    }

    async fn index_epoch(&self, handlers: &ChainEventHandlers, epoch: &db::models::Epoch) -> Result<()> {
        let started = Instant::now();
        let height = epoch.start_height;
        let (header, results) = tokio::try_join!(
            self.ctx.client.block_header(height),
            self.ctx.client.block_results(height),
        )
        .with_context(|| format!("Failed to fetch epoch block {}", height))?;
        let records = events_for_epoch(handlers, &results)?;

        if self.ctx.config.base.dry {
            info!(
                "Dry run: epoch {} at {} has {} reward records",
                epoch.epoch_number,
                height,
                records.len()
            );
            return Ok(());
        }

        let ctx = self.ctx.clone();
        let epoch_pk = epoch.id;
        let time = header.time.naive_utc();
        let abandoned = self.abandoned.clone();
        let rows = run_db(&self.ctx, move |conn| {
            conn.transaction(|tx_conn| {
                let rows = store_block_events(tx_conn, &ctx, height, time, &records)?;
                db::mark_epoch_indexed(tx_conn, epoch_pk)?;
                ensure_not_abandoned(&abandoned, height)?;
                Ok::<usize, anyhow::Error>(rows)
            })
        })
        .await?;
        info!(
            "Indexed epoch {} at height {}: {} rows in {:.2?}",
            epoch.epoch_number,
            height,
            rows,
            started.elapsed()
        );
        Ok(())
    }
}

fn events_for_epoch(handlers: &ChainEventHandlers, results: &BlockResults) -> Result<Vec<BlockEventRecord>> {
    handlers
        .process(results)
        .with_context(|| format!("Failed to process epoch events at {}", results.height))
}

/// Persist block-event records for `height` and flag the block. Skips blocks
/// whose events were already committed unless reindexing.
fn store_block_events(
    conn: &mut diesel::PgConnection,
    ctx: &CoreContext,
    height: i64,
    time: chrono::NaiveDateTime,
    records: &[BlockEventRecord],
) -> Result<usize> {
    conn.transaction(|tx_conn| {
        let chain_pk = db::get_or_create_chain(tx_conn, &ctx.chain.chain_id, &ctx.chain.name)?;
        let block = db::get_or_create_block(tx_conn, chain_pk, height, time)?;
        if block.block_events_indexed && !ctx.config.base.reindex {
            return Ok(0);
        }
        let rows = persist_block_events(tx_conn, &ctx.denoms, block.id, height, records)?;
        db::mark_block_events_indexed(tx_conn, block.id)?;
        Ok::<usize, anyhow::Error>(rows)
    })
}

/// Turn a height's transactions into rows. Message decode failures stay local:
/// the message is recorded with no movements.
pub fn decode_block(
    messages: &MessageRegistry,
    account_prefix: &str,
    header: &BlockHeader,
    txs: &[MergedTx],
) -> Result<BlockRecord> {
    let mut records = Vec::with_capacity(txs.len());
    for tx in txs {
        let hash = tx.response.txhash.clone();
        let payer = fee_payer(account_prefix, tx);

        let mut fees = Vec::new();
        for json_coin in &tx.tx.auth_info.fee.amount {
            let coin = match Coin::try_from(json_coin) {
                Ok(coin) => coin,
                Err(e) => {
                    warn!("[Block: {}] [Tx: {}] Skipping fee: {}", header.height, hash, e);
                    continue;
                }
            };
            match &payer {
                Some(payer) => fees.push(FeeRecord {
                    payer: payer.clone(),
                    coin,
                }),
                None => warn!("[Block: {}] [Tx: {}] Fee {} has no payer, skipping", header.height, hash, coin),
            }
        }

        let mut message_records = Vec::new();
        if tx.response.code == 0 {
            let logs = tx.message_logs();
            for (index, msg) in tx.tx.body.messages.iter().enumerate() {
                let type_url = msg.get("@type").and_then(|t| t.as_str()).unwrap_or_default();
                let log = log_for_message(&logs, index as i64);
                let movements = match messages.decode(type_url, msg, log) {
                    Ok(decoded) => {
                        if !decoded.description.is_empty() {
                            debug!("[Block: {}] [Tx: {}] {}", header.height, hash, decoded.description);
                        }
                        decoded.movements
                    }
                    Err(DecodeError::UnknownMessageType(type_url)) => {
                        debug!("[Block: {}] [Tx: {}] No decoder for {}", header.height, hash, type_url);
                        Vec::new()
                    }
                    Err(e @ DecodeError::ContractPayloadEmpty { .. }) => {
                        warn!("[Block: {}] [Tx: {}] {}", header.height, hash, e);
                        Vec::new()
                    }
                    Err(e) => {
                        warn!(
                            "[Block: {}] [Tx: {}] Could not decode message {} ({}): {}",
                            header.height, hash, index, type_url, e
                        );
                        Vec::new()
                    }
                };
                message_records.push(MessageRecord {
                    index: i32::try_from(index).context("Message index out of range")?,
                    type_url: type_url.to_string(),
                    movements,
                });
            }
        }

        records.push(TxRecord {
            hash,
            code: tx.response.code,
            signer: payer,
            fees,
            messages: message_records,
        });
    }

    Ok(BlockRecord {
        height: header.height,
        time: header.time.naive_utc(),
        txs: records,
    })
}

/// Heights from a JSON array file.
pub fn read_block_input_file(path: &Path) -> Result<Vec<i64>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read block input file {}", path.display()))?;
    let heights: Vec<i64> = serde_json::from_str(&contents)
        .with_context(|| format!("Block input file {} is not a JSON array of heights", path.display()))?;
    if let Some(bad) = heights.iter().find(|h| **h < 1) {
        return Err(ConfigError(format!("invalid height {} in {}", bad, path.display())).into());
    }
    Ok(heights)
}

/// Inclusive window; a negative end is unbounded.
fn in_window(height: i64, start: i64, end: i64) -> bool {
    height >= start && (end < 0 || height <= end)
}

/// Pull heights off the shared queue until it closes. Shutdown is checked
/// before every receive, so heights still queued are left behind.
async fn take_heights<F, Fut>(receiver: &Mutex<mpsc::Receiver<i64>>, shutdown: &watch::Receiver<bool>, mut index: F)
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown.clone()) => None,
                next = receiver.recv() => next,
            }
        };
        let Some(height) = next else { break };
        index(height).await;
    }
}

/// Offer one height to the bounded queue, waiting while it is full.
/// `previously_failed` decides whether the height is skipped.
/// Returns false once shutdown has been requested or the workers are gone.
async fn queue_height<S, Fut>(
    height: i64,
    sender: &mpsc::Sender<i64>,
    shutdown: &watch::Receiver<bool>,
    throttle: Duration,
    previously_failed: S,
) -> Result<bool>
where
    S: FnOnce(i64) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    if *shutdown.borrow() {
        return Ok(false);
    }
    if previously_failed(height).await? {
        debug!("Skipping previously failed block {}", height);
        return Ok(true);
    }

    let sent = tokio::select! {
        sent = sender.send(height) => sent.is_ok(),
        _ = shutdown_requested(shutdown.clone()) => false,
    };
    if !sent {
        return Ok(false);
    }
    if !throttle.is_zero() && sleep_or_shutdown(throttle, shutdown).await {
        return Ok(false);
    }
    Ok(true)
}

/// Run `attempt` within the backoff budget. Once the budget is spent the last
/// error goes to `record_failure`. Returns true on success.
async fn retry_or_record<A, AFut, R, RFut>(backoff: &Backoff, label: &str, attempt: A, record_failure: R) -> bool
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<()>>,
    R: FnOnce(anyhow::Error) -> RFut,
    RFut: Future<Output = ()>,
{
    match backoff.run(label, attempt).await {
        Ok(()) => true,
        Err(e) => {
            record_failure(e).await;
            false
        }
    }
}

/// Fails the surrounding transaction once the processor gave up on in-flight work.
fn ensure_not_abandoned(abandoned: &AtomicBool, height: i64) -> Result<()> {
    if abandoned.load(Ordering::SeqCst) {
        return Err(anyhow!("Shutdown grace period exceeded, rolling back height {}", height));
    }
    Ok(())
}

/// Resolves once shutdown is requested. Never resolves if the signal is dropped.
pub async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep unless shutdown is requested first. Returns true on shutdown.
async fn sleep_or_shutdown(delay: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let mut shutdown = shutdown.clone();
    tokio::select! {
        _ = sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Run store work on the blocking pool with a pooled connection.
async fn run_db<T, F>(ctx: &Arc<CoreContext>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut diesel::PgConnection) -> Result<T> + Send + 'static,
{
    let pool = ctx.db_pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get database connection")?;
        work(&mut *conn)
    })
    .await
    .context("Database task panicked")?
}
