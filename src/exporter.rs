//! The generic exporter engine and source collector contract
//!
//! One `Exporter` owns one schedule loop on its own background thread:
//! wait for the wall-aligned boundary, collect every sub-source, merge,
//! build the envelope, deliver, repeat. Errors are caught per collector
//! call and per delivery call; nothing escapes to stop the loop.

use crate::deliver::DeliveryClient;
use crate::envelope::{self, Identity};
use crate::error::CollectorError;
use crate::records::{CycleOutput, Payload};
use crate::schedule;
use chrono::Utc;
use log::{error, info};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// Contract every backend source implements
///
/// `collect` returns the cycle's contribution: an aggregate metrics map,
/// a keyed record batch, or a log batch, bounded by the source's own
/// cursor and cap. A failing collector contributes nothing that cycle;
/// connection-oriented collectors return a zeroed placeholder map instead
/// of an error so dashboards see a gap-free series.
#[cfg_attr(test, automock)]
pub trait SourceCollector: Send {
    /// Source tag for diagnostics
    fn source(&self) -> String;

    /// One-time availability check at exporter start
    ///
    /// Failing here prevents the exporter from starting; other exporters
    /// are unaffected.
    fn preflight(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Produce this cycle's contribution
    fn collect(&mut self) -> Result<Payload, CollectorError>;
}

/// Everything the schedule loop owns once started
struct Inner {
    identity: Identity,
    source: String,
    receiver_url: String,
    collectors: Vec<Box<dyn SourceCollector>>,
    delivery: DeliveryClient,
}

/// One independently scheduled collect-and-deliver loop
pub struct Exporter {
    name: String,
    interval: Duration,
    running: Arc<Mutex<bool>>,
    thread_handle: Option<JoinHandle<()>>,
    inner: Option<Inner>,
}

impl Exporter {
    /// Assemble an exporter; nothing runs until `start`
    ///
    /// # Arguments
    ///
    /// * `name` - Loop name for diagnostics (e.g. "redis_logs")
    /// * `source` - Source tag stamped on every envelope
    /// * `interval` - Wall-aligned cycle interval
    /// * `identity` - Process-wide identity for envelopes
    /// * `receiver_url` - Collector endpoint for this exporter
    /// * `collectors` - Sub-sources merged into one delivery per cycle
    /// * `delivery` - Owned HTTP client
    pub fn new(
        name: &str,
        source: &str,
        interval: Duration,
        identity: Identity,
        receiver_url: String,
        collectors: Vec<Box<dyn SourceCollector>>,
        delivery: DeliveryClient,
    ) -> Self {
        Self {
            name: name.to_string(),
            interval,
            running: Arc::new(Mutex::new(false)),
            thread_handle: None,
            inner: Some(Inner {
                identity,
                source: source.to_string(),
                receiver_url,
                collectors,
                delivery,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run collector preflights and spawn the schedule loop
    ///
    /// # Errors
    ///
    /// Returns the first failing preflight; the exporter is left stopped
    /// and other exporters are unaffected.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                info!("{} exporter already running, skipping start", self.name);
                return Ok(());
            }
            *running = true;
        }

        let mut inner = match self.inner.take() {
            Some(inner) => inner,
            None => {
                *self.running.lock().unwrap() = false;
                return Err(CollectorError::Unavailable(format!(
                    "{} exporter was already stopped and cannot restart",
                    self.name
                )));
            }
        };

        for collector in &mut inner.collectors {
            if let Err(e) = collector.preflight() {
                error!(
                    "{}: preflight for source {} failed: {}",
                    self.name,
                    collector.source(),
                    e
                );
                *self.running.lock().unwrap() = false;
                self.inner = Some(inner);
                return Err(e);
            }
        }

        let name = self.name.clone();
        let interval = self.interval;
        let running = Arc::clone(&self.running);

        let handle = thread::spawn(move || {
            Self::schedule_loop(name, interval, inner, running);
        });

        self.thread_handle = Some(handle);
        info!(
            "{} exporter started (interval {:?}, wall-aligned)",
            self.name, self.interval
        );
        Ok(())
    }

    /// Signal the loop to stop and wait for the thread to finish
    pub fn stop(&mut self) -> Result<(), CollectorError> {
        {
            let mut running = self.running.lock().unwrap();
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| {
                CollectorError::Unavailable(format!(
                    "failed to join {} exporter thread",
                    self.name
                ))
            })?;
        }

        info!("{} exporter stopped", self.name);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }

    fn schedule_loop(name: String, interval: Duration, mut inner: Inner, running: Arc<Mutex<bool>>) {
        info!("{} exporter loop started", name);

        // Each boundary is recomputed only after the previous cycle fully
        // completes: a slow backend delays but never parallelizes cycles.
        while schedule::wait_for_boundary(&running, interval) {
            Self::run_cycle(&name, &mut inner);
        }

        {
            let mut flag = running.lock().unwrap();
            *flag = false;
        }
        info!("{} exporter loop finished", name);
    }

    fn run_cycle(name: &str, inner: &mut Inner) {
        let output = collect_all(name, &mut inner.collectors);

        match envelope::build(&inner.identity, &inner.source, output, Utc::now()) {
            Some(envelope) => {
                inner
                    .delivery
                    .deliver(name, &inner.receiver_url, &envelope);
            }
            None => info!("{}: no new records this cycle", name),
        }
    }
}

/// Collect every sub-source into one merged output
///
/// A failing collector is logged and contributes nothing; the remaining
/// sub-sources still collect, and the single delivery happens afterwards.
fn collect_all(name: &str, collectors: &mut [Box<dyn SourceCollector>]) -> CycleOutput {
    let mut output = CycleOutput::default();
    for collector in collectors.iter_mut() {
        match collector.collect() {
            Ok(payload) => output.absorb(payload),
            Err(e) => error!(
                "{}: source {} failed, contributing nothing this cycle: {}",
                name,
                collector.source(),
                e
            ),
        }
    }
    output
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}
