//! Portal reader task and its lifecycle handle
//!
//! One task per connection runs framer → decoder → publisher and owns the
//! occupancy state. `PortalDriver` spawns it and signals stop through a
//! `watch` channel; the task checks the flag between lines and while waiting
//! for the next one, never mid-parse. Exiting drops the stream, which closes
//! the connection.

use crate::domain::error::DecodeError;
use crate::domain::events::{epoch_ms, PortalEvent};
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::Publisher;
use crate::io::framer::LineFramer;
use crate::services::decoder::{Disposition, LineOutcome, MessageDecoder};
use crate::services::occupancy::Transition;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

/// How a reader task ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Stop was requested
    Stopped,
    /// The portal closed the stream
    StreamClosed,
}

/// Reads lines from one portal connection until stop or end of stream
pub struct MessageReader<R, P> {
    framer: LineFramer<R>,
    decoder: MessageDecoder,
    publisher: P,
    metrics: Arc<Metrics>,
}

impl<R, P> MessageReader<R, P>
where
    R: AsyncRead + Unpin,
    P: Publisher,
{
    pub fn new(source: R, publisher: P, metrics: Arc<Metrics>, max_line_len: usize) -> Self {
        Self {
            framer: LineFramer::with_max_line_len(source, max_line_len),
            decoder: MessageDecoder::new(),
            publisher,
            metrics,
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped), the stream
    /// ends, or the stream fails
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<WorkerExit, DecodeError> {
        info!("portal_reader_started");

        loop {
            if *shutdown.borrow_and_update() {
                info!("portal_reader_stopped");
                return Ok(WorkerExit::Stopped);
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("portal_reader_stopped");
                        return Ok(WorkerExit::Stopped);
                    }
                    continue;
                }
                next = self.framer.next_line() => next,
            };

            match next {
                Ok(Some(line)) => self.process_line(&line),
                Ok(None) => {
                    info!("portal_stream_closed");
                    return Ok(WorkerExit::StreamClosed);
                }
                Err(e) => {
                    error!(error = %e, "portal_stream_failed");
                    self.metrics.record_stream_failure();
                    return Err(e);
                }
            }
        }
    }

    fn process_line(&mut self, line: &str) {
        let started = Instant::now();
        trace!(line = %line, "portal_line");

        let outcome = self.decoder.decode_line(line, epoch_ms());
        self.dispatch(outcome);

        self.metrics.record_line_processed(started.elapsed().as_micros() as u64);
    }

    fn dispatch(&self, outcome: LineOutcome) {
        match &outcome.disposition {
            Disposition::Unknown(_) => self.metrics.record_unknown_code(),
            Disposition::Setup(_) => self.metrics.record_setup_code(),
            Disposition::Blank | Disposition::Decoded(_) => {}
        }
        if outcome.transition == Transition::IgnoredClose {
            self.metrics.record_idle_close();
        }

        if let Some(err) = &outcome.error {
            warn!(code = %err.code().unwrap_or("?"), error = %err, "portal_line_malformed");
            self.metrics.record_malformed();
            self.publisher.report_error(err);
        }

        for event in outcome.events {
            self.metrics.record_event(event.kind());
            if let PortalEvent::Occupancy(occupancy) = &event {
                self.metrics.record_occupancy(occupancy.gamma_alarm, occupancy.neutron_alarm);
            }
            self.publisher.publish(event);
        }
    }
}

/// Cloneable stop signal for a running driver
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    /// Request stop. Idempotent, and safe after the worker has exited.
    pub fn stop(&self) {
        self.0.send_replace(true);
    }
}

/// Owns one reader task
pub struct PortalDriver {
    stop: StopHandle,
    handle: Option<JoinHandle<Result<WorkerExit, DecodeError>>>,
}

impl PortalDriver {
    /// Spawn a reader task over `source`
    pub fn start<R, P>(source: R, publisher: P, metrics: Arc<Metrics>, max_line_len: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        P: Publisher,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = MessageReader::new(source, publisher, metrics, max_line_len);
        let handle = tokio::spawn(reader.run(stop_rx));
        Self { stop: StopHandle(Arc::new(stop_tx)), handle: Some(handle) }
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the reader task and report how it ended
    pub async fn join(&mut self) -> Result<WorkerExit, DecodeError> {
        let Some(handle) = self.handle.take() else {
            return Err(DecodeError::Worker("reader task already joined".to_string()));
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(DecodeError::Worker(e.to_string())),
        }
    }
}

impl Drop for PortalDriver {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventKind;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        events: Arc<Mutex<Vec<PortalEvent>>>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, event: PortalEvent) {
            self.events.lock().push(event);
        }

        fn report_error(&self, error: &DecodeError) {
            self.errors.lock().push(error.to_string());
        }
    }

    async fn wait_for_events(publisher: &RecordingPublisher, n: usize) {
        for _ in 0..200 {
            if publisher.events.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {n} events");
    }

    #[tokio::test]
    async fn test_stop_before_any_line() {
        let (_client, server) = tokio::io::duplex(64);
        let publisher = RecordingPublisher::default();
        let mut driver =
            PortalDriver::start(server, publisher.clone(), Arc::new(Metrics::new()), 1024);

        driver.stop();
        assert_eq!(driver.join().await.unwrap(), WorkerExit::Stopped);
        assert!(publisher.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_twice_and_after_exit() {
        let (_client, server) = tokio::io::duplex(64);
        let mut driver =
            PortalDriver::start(server, RecordingPublisher::default(), Arc::new(Metrics::new()), 1024);

        driver.stop();
        driver.stop();
        assert_eq!(driver.join().await.unwrap(), WorkerExit::Stopped);
        driver.stop();
        assert!(driver.is_finished());
        assert!(matches!(driver.join().await, Err(DecodeError::Worker(_))));
    }

    #[tokio::test]
    async fn test_stop_while_waiting_for_line() {
        let (mut client, server) = tokio::io::duplex(64);
        let publisher = RecordingPublisher::default();
        let mut driver =
            PortalDriver::start(server, publisher.clone(), Arc::new(Metrics::new()), 1024);

        client.write_all(b"TT\n").await.unwrap();
        wait_for_events(&publisher, 1).await;

        driver.stop_handle().stop();
        assert_eq!(driver.join().await.unwrap(), WorkerExit::Stopped);
        assert_eq!(publisher.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_reader() {
        let (mut client, server) = tokio::io::duplex(256);
        let publisher = RecordingPublisher::default();
        let metrics = Arc::new(Metrics::new());
        let mut driver = PortalDriver::start(server, publisher.clone(), metrics.clone(), 1024);

        client.write_all(b"GA,abc,20,30,40\r\nXY,1,2\nGB,1,2,3,4\nGX,5,1200\n").await.unwrap();
        drop(client);

        assert_eq!(driver.join().await.unwrap(), WorkerExit::StreamClosed);

        let events = publisher.events.lock();
        let kinds: Vec<EventKind> = events.iter().map(PortalEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::Gamma, EventKind::Occupancy]);
        let PortalEvent::Occupancy(occupancy) = &events[1] else {
            panic!("expected occupancy event");
        };
        assert!(occupancy.gamma_alarm);
        assert_eq!(publisher.errors.lock().len(), 1);

        assert_eq!(metrics.lines_total(), 4);
        assert_eq!(metrics.malformed_total(), 1);
        assert_eq!(metrics.unknown_total(), 1);
        assert_eq!(metrics.events_of(EventKind::Occupancy), 1);
    }

    #[tokio::test]
    async fn test_line_too_long_is_fatal() {
        let (mut client, server) = tokio::io::duplex(256);
        let metrics = Arc::new(Metrics::new());
        let mut driver =
            PortalDriver::start(server, RecordingPublisher::default(), metrics.clone(), 8);

        client.write_all(b"GB,1234567890,1,1,1\n").await.unwrap();

        let err = driver.join().await.unwrap_err();
        assert!(matches!(err, DecodeError::LineTooLong { limit: 8 }));
        assert_eq!(metrics.report().stream_failures_total, 1);
    }

    #[tokio::test]
    async fn test_dropping_driver_stops_reader() {
        let (_client, server) = tokio::io::duplex(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader =
            MessageReader::new(server, RecordingPublisher::default(), Arc::new(Metrics::new()), 1024);
        let handle = tokio::spawn(reader.run(stop_rx));

        drop(stop_tx);
        assert_eq!(handle.await.unwrap().unwrap(), WorkerExit::Stopped);
    }
}
