//! The periodic check loop shared by every resource kind.
//!
//! A [`PeriodicChecker`] owns one [`CertificateSource`] and its gauge
//! triplet. Each tick resets the gauges, discovers candidates, and turns
//! every payload of every candidate into samples. A failure anywhere is
//! counted, logged and confined to the payload or candidate it hit.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::certs;
use crate::error::ExportError;
use crate::filter::MetricFilter;
use crate::metrics::{ExporterMetrics, KindGauges, ResourceKind};

/// Bytes to decode, labelled for export.
#[derive(Clone)]
pub struct Payload {
    /// Label values in [`ResourceKind::identity_labels`] order
    pub identity: Vec<String>,
    pub bytes: Vec<u8>,
    pub passphrase: String,
}

impl Payload {
    pub fn new(identity: Vec<String>, bytes: Vec<u8>) -> Self {
        Payload {
            identity,
            bytes,
            passphrase: String::new(),
        }
    }

    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = passphrase.to_string();
        self
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("identity", &self.identity)
            .field("bytes", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Discovery and byte-fetch strategy for one resource kind.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    type Candidate: fmt::Debug + Send + Sync;

    fn kind(&self) -> ResourceKind;

    /// Candidates for this tick. Failures along the way are counted on
    /// `metrics` and leave out what they affected.
    async fn discover(&self, metrics: &ExporterMetrics) -> Vec<Self::Candidate>;

    /// Payloads of one candidate; one failed payload does not affect the
    /// others.
    async fn fetch(&self, candidate: &Self::Candidate) -> Vec<Result<Payload, ExportError>>;
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub candidates: usize,
    pub samples: usize,
    pub errors: usize,
}

pub struct PeriodicChecker<S> {
    source: S,
    gauges: KindGauges,
    filter: MetricFilter,
    metrics: ExporterMetrics,
}

impl<S: CertificateSource> PeriodicChecker<S> {
    /// Registers the gauges of `source`'s kind on the registry behind
    /// `metrics`.
    pub fn new(source: S, filter: MetricFilter, metrics: ExporterMetrics) -> Result<Self, ExportError> {
        let gauges = metrics.register_gauges(source.kind())?;
        Ok(PeriodicChecker {
            source,
            gauges,
            filter,
            metrics,
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.source.kind()
    }

    /// One full reset, discover, decode, filter, export cycle.
    pub async fn tick(&self) -> TickReport {
        let kind = self.kind();
        info!(source = %kind, "Begin periodic check");

        self.gauges.reset();
        let candidates = self.source.discover(&self.metrics).await;
        self.metrics.set_discovered(kind, candidates.len());

        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };
        for candidate in &candidates {
            debug!(source = %kind, ?candidate, "Checking candidate");
            for payload in self.source.fetch(candidate).await {
                let outcome = payload.and_then(|payload| self.export(&payload, &mut report));
                if let Err(e) = outcome {
                    self.fail(&mut report);
                    error!(source = %kind, ?candidate, error = %e, "Error exporting metrics");
                }
            }
        }

        info!(
            source = %kind,
            candidates = report.candidates,
            samples = report.samples,
            errors = report.errors,
            "Periodic check finished"
        );
        report
    }

    /// Decodes and records one payload. Partial results are recorded before
    /// their entry error is returned.
    fn export(&self, payload: &Payload, report: &mut TickReport) -> Result<(), ExportError> {
        let decoded = certs::decode(&payload.bytes, &payload.passphrase)?;
        debug!(
            identity = ?payload.identity,
            format = %decoded.format,
            certificates = decoded.metrics.len(),
            "Decoded payload"
        );

        for metric in self.filter.apply(decoded.metrics) {
            match self.gauges.record(&payload.identity, &metric) {
                Ok(()) => report.samples += 1,
                Err(e) => {
                    self.fail(report);
                    error!(identity = ?payload.identity, error = %e, "Error recording metric");
                }
            }
        }

        match decoded.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&self, report: &mut TickReport) {
        self.metrics.record_error();
        report.errors += 1;
    }

    /// Ticks every `period` for the life of the process. The first tick
    /// runs immediately; a tick that overruns its period delays the next
    /// one instead of overlapping it.
    pub async fn run(self, period: Duration, tick_timeout: Option<Duration>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match tick_timeout {
                Some(limit) => {
                    if tokio::time::timeout(limit, self.tick()).await.is_err() {
                        self.metrics.record_error();
                        warn!(source = %self.kind(), timeout = ?limit, "Periodic check timed out");
                    }
                }
                None => {
                    self.tick().await;
                }
            }
        }
    }
}
