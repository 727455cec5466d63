//! Batch ingestion
//!
//! A [`BatchIngestWorker`] reads one gzip compressed batch line by line on a
//! blocking thread. Each parsed record is routed to its sink and the worker
//! waits for that record's acknowledgement before reading the next line, so
//! line order within a batch is preserved end to end.
//!
//! Batch counters live in a [`BatchContext`] owned by the worker alone; sinks
//! only ever talk back through the batch's acknowledgement channel.

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::completion::{mark_done, MarkOutcome};
use crate::payload;
use crate::record;
use crate::routing::{ack_channel, AckReceiver, AckSender, AckToken, RouteTable, RoutedWrite};

/// Default error rate below which a batch is accepted
pub const DEFAULT_NORMAL_ERROR_RATE: f64 = 0.01;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to open batch {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch {path} is not valid gzip: {source}")]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-batch outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Records acknowledged as written
    pub processed: u64,
    /// Lines that failed to parse, encode, route or write
    pub errors: u64,
}

impl BatchStats {
    pub fn lines(&self) -> u64 {
        self.processed + self.errors
    }

    /// `errors / processed`, undefined when nothing was processed
    pub fn error_rate(&self) -> Option<f64> {
        (self.processed > 0).then(|| self.errors as f64 / self.processed as f64)
    }

    /// Judge the batch against the acceptable error rate
    pub fn verdict(&self, normal_error_rate: f64) -> Verdict {
        match self.error_rate() {
            Some(rate) if rate < normal_error_rate => Verdict::Accepted { rate },
            Some(rate) => Verdict::Failed { rate: Some(rate) },
            None if self.errors > 0 => Verdict::Failed { rate: None },
            None => Verdict::Empty,
        }
    }
}

/// Informational judgement of a finished batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { rate: f64 },
    /// `rate` is `None` when every line failed
    Failed { rate: Option<f64> },
    /// No lines at all, or the batch could not be opened
    Empty,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    /// Log line for this verdict against the threshold it was judged by
    pub fn describe(&self, normal_error_rate: f64) -> String {
        match self {
            Verdict::Accepted { rate } => format!("Acceptable error rate ({rate:.5}). Successful load"),
            Verdict::Failed { rate: Some(rate) } => {
                format!("High error rate ({rate:.5} >= {normal_error_rate:.5}). Failed load")
            },
            Verdict::Failed { rate: None } => "No records processed. Failed load".to_string(),
            Verdict::Empty => "Batch contained no records".to_string(),
        }
    }
}

/// State of one batch while it is being ingested
#[derive(Debug)]
pub struct BatchContext {
    id: Arc<str>,
    stats: BatchStats,
    ack_tx: AckSender,
    ack_rx: AckReceiver,
}

impl BatchContext {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        let (ack_tx, ack_rx) = ack_channel();
        Self {
            id: id.into(),
            stats: BatchStats::default(),
            ack_tx,
            ack_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    fn record_error(&mut self) {
        self.stats.errors += 1;
    }

    fn record_ack(&mut self, ok: bool) {
        if ok {
            self.stats.processed += 1;
        } else {
            self.stats.errors += 1;
        }
    }
}

/// Summary of one finished batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub path: PathBuf,
    pub stats: BatchStats,
    pub verdict: Verdict,
    /// Set when the batch could not be opened
    pub open_error: Option<String>,
    /// Set when reading stopped early on an I/O error
    pub read_error: Option<String>,
    pub marked_done: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(elapsed.as_millis())
}

/// Open a gzip batch for line reading.
///
/// The gzip header is checked up front so a corrupt file fails here rather
/// than on the first line.
pub fn open_batch(path: &Path) -> Result<Box<dyn BufRead + Send>, BatchError> {
    let file = File::open(path).map_err(|source| BatchError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(MultiGzDecoder::new(BufReader::new(file)));
    reader.fill_buf().map_err(|source| BatchError::Decompress {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Box::new(reader))
}

/// Ingests batches into the route table. Runs on blocking threads.
#[derive(Debug, Clone)]
pub struct BatchIngestWorker {
    routes: Arc<RouteTable>,
    normal_error_rate: f64,
}

impl BatchIngestWorker {
    pub fn new(routes: Arc<RouteTable>, normal_error_rate: f64) -> Self {
        Self {
            routes,
            normal_error_rate,
        }
    }

    /// Ingest one batch file, log the verdict and mark the file done.
    ///
    /// Completion marking happens whatever the verdict, including when the
    /// batch could not be opened.
    pub fn process(&self, path: &Path) -> BatchReport {
        let started = Instant::now();
        let id: Arc<str> = Arc::from(path.display().to_string());
        let span = info_span!("batch", batch = %id);
        let _entered = span.enter();

        info!("Starting batch");
        let mut ctx = BatchContext::new(id);
        let mut open_error = None;
        let mut read_error = None;

        match open_batch(path) {
            Ok(reader) => read_error = self.ingest(&mut ctx, reader),
            Err(e) => {
                error!(error = %e, "Cannot open batch, skipping");
                open_error = Some(e.to_string());
            },
        }

        let stats = ctx.stats();
        let verdict = self.log_verdict(&stats, started.elapsed());

        let marked_done = match mark_done(path) {
            Ok(MarkOutcome::Renamed(done)) => {
                debug!(done = %done.display(), "Batch marked done");
                true
            },
            Ok(MarkOutcome::AlreadyMarked) => true,
            Err(e) => {
                error!(error = %e, "Failed to mark batch done");
                false
            },
        };

        BatchReport {
            path: path.to_path_buf(),
            stats,
            verdict,
            open_error,
            read_error,
            marked_done,
            elapsed: started.elapsed(),
        }
    }

    /// Feed every line of `reader` through parse, route and ack.
    ///
    /// Returns the I/O error that stopped reading early, if any.
    pub fn ingest<R: BufRead>(&self, ctx: &mut BatchContext, mut reader: R) -> Option<String> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    self.ingest_line(ctx, &line);
                },
                Err(e) => {
                    error!(error = %e, lines = ctx.stats().lines(), "Read failed, stopping batch early");
                    return Some(e.to_string());
                },
            }
        }
    }

    fn ingest_line(&self, ctx: &mut BatchContext, line: &str) {
        let record = match record::parse(line) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, line = %line.trim_end(), "Rejected line");
                ctx.record_error();
                return;
            },
        };

        let payload = match payload::encode(&record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode record");
                ctx.record_error();
                return;
            },
        };

        let write = RoutedWrite {
            record,
            payload,
            batch: ctx.id.clone(),
            ack: AckToken::new(ctx.ack_tx.clone()),
        };

        if let Err(e) = self.routes.submit_blocking(write) {
            // The rejected write dropped its token, which queued a failure ack.
            error!(error = %e, "Cannot route record");
        }

        match ctx.ack_rx.blocking_recv() {
            Some(ok) => ctx.record_ack(ok),
            None => {
                // Unreachable while ctx holds its own sender; count it rather than hang.
                ctx.record_error();
            },
        }
    }

    fn log_verdict(&self, stats: &BatchStats, elapsed: Duration) -> Verdict {
        info!(
            processed = stats.processed,
            errors = stats.errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "Batch finished"
        );

        let verdict = stats.verdict(self.normal_error_rate);
        let message = verdict.describe(self.normal_error_rate);
        match verdict {
            Verdict::Accepted { .. } => info!("{message}"),
            Verdict::Failed { .. } => error!(errors = stats.errors, "{message}"),
            Verdict::Empty => warn!("{message}"),
        }
        verdict
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_error_rate() {
        let stats = BatchStats { processed: 98, errors: 2 };
        let rate = stats.error_rate().unwrap();
        assert!((rate - 2.0 / 98.0).abs() < 1e-12);
        assert_eq!(stats.lines(), 100);
        assert_eq!(BatchStats::default().error_rate(), None);
    }

    #[test]
    fn test_verdicts() {
        let failed = BatchStats { processed: 98, errors: 2 }.verdict(0.01);
        assert!(matches!(failed, Verdict::Failed { rate: Some(r) } if r > 0.01));

        let accepted = BatchStats { processed: 1000, errors: 9 }.verdict(0.01);
        assert!(accepted.is_accepted());

        // The threshold itself is not acceptable.
        let edge = BatchStats { processed: 100, errors: 1 }.verdict(0.01);
        assert!(!edge.is_accepted());

        assert_eq!(BatchStats { processed: 0, errors: 5 }.verdict(0.01), Verdict::Failed { rate: None });
        assert_eq!(BatchStats::default().verdict(0.01), Verdict::Empty);
    }

    #[test]
    fn test_verdict_messages() {
        let edge = BatchStats { processed: 100, errors: 1 }.verdict(0.01);
        assert_eq!(
            edge.describe(0.01),
            "High error rate (0.01000 >= 0.01000). Failed load"
        );

        let accepted = BatchStats { processed: 1000, errors: 9 }.verdict(0.01);
        assert_eq!(accepted.describe(0.01), "Acceptable error rate (0.00900). Successful load");
        assert_eq!(Verdict::Failed { rate: None }.describe(0.01), "No records processed. Failed load");
    }

    #[test]
    fn test_unparseable_lines_never_reach_routes() {
        // Nothing consumes the queues, so a routed record would block here.
        let (table, _receivers) = RouteTable::build(1);
        let worker = BatchIngestWorker::new(Arc::new(table), DEFAULT_NORMAL_ERROR_RATE);
        let mut ctx = BatchContext::new("inline");

        let input = "too\tshort\n\n\tno-type\t1\t2\t3\nimei\tx\t1\t2\t3\n";
        assert_eq!(worker.ingest(&mut ctx, Cursor::new(input)), None);
        assert_eq!(ctx.stats(), BatchStats { processed: 0, errors: 4 });
    }

    #[test]
    fn test_open_missing_batch() {
        let err = open_batch(Path::new("/nonexistent/batch.tsv.gz")).err().unwrap();
        assert!(matches!(err, BatchError::Open { .. }));
    }

    #[test]
    fn test_open_non_gzip_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tsv.gz");
        std::fs::write(&path, "idfa\tabc\t1\t2\t3\n").unwrap();
        let err = open_batch(&path).err().unwrap();
        assert!(matches!(err, BatchError::Decompress { .. }));
    }
}
