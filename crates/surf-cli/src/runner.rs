//! Drives a detector through time and journals everything it emits.
//!
//! Shared by `replay`, `simulate` (virtual clock, [`Runner::advance_to`]) and
//! `serve` (wall clock, the actor calls [`Runner::tick`] and
//! [`Runner::frame`] from its intervals).

use anyhow::{Context, Result};
use serde::Serialize;
use surf_core::{
    DetectorConfig, DetectorEvent, RegistrySnapshot, SensorEvent, SurfaceDetector, Timestamp,
};
use surf_store::{Journal, SessionId};

/// One outbound JSON line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outbound {
    pub at: Timestamp,
    pub event: DetectorEvent,
}

/// Journals a run as one session. The session starts with the first
/// activity, so its start time is on the same clock as its events.
pub struct Recorder {
    journal: Journal,
    config: DetectorConfig,
    session: Option<SessionId>,
}

impl Recorder {
    pub fn new(journal: Journal, config: DetectorConfig) -> Self {
        Self {
            journal,
            config,
            session: None,
        }
    }

    fn session(&mut self, at: Timestamp) -> Result<SessionId> {
        if let Some(id) = self.session {
            return Ok(id);
        }
        let id = self
            .journal
            .begin_session(&self.config, at)
            .context("failed to start journal session")?;
        self.session = Some(id);
        Ok(id)
    }

    fn record(&mut self, at: Timestamp, events: &[DetectorEvent]) -> Result<()> {
        let id = self.session(at)?;
        self.journal
            .record_events(id, at, events)
            .context("failed to journal events")?;
        Ok(())
    }

    fn close(mut self, snapshot: &RegistrySnapshot) -> Result<SessionId> {
        let id = self.session(snapshot.taken_at)?;
        self.journal
            .end_session(id, snapshot)
            .context("failed to close journal session")?;
        Ok(id)
    }
}

pub struct Runner {
    detector: SurfaceDetector,
    recorder: Option<Recorder>,
    next_tick: Option<Timestamp>,
    /// Latest time anything ran at.
    clock: Timestamp,
}

impl Runner {
    pub fn new(detector: SurfaceDetector) -> Self {
        Self {
            detector,
            recorder: None,
            next_tick: None,
            clock: 0,
        }
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn detector(&self) -> &SurfaceDetector {
        &self.detector
    }

    pub fn tick_interval(&self) -> u64 {
        self.detector.config().detection.detection_interval_ms.max(1)
    }

    pub fn handle(&mut self, at: Timestamp, event: SensorEvent) -> Result<Vec<Outbound>> {
        let events = self.detector.handle(event, at);
        self.emit(at, events)
    }

    /// One detection tick against the last observer pose, then a mesh
    /// request if one is due.
    pub fn tick(&mut self, now: Timestamp) -> Result<Vec<Outbound>> {
        let observer = self.detector.observer();
        let mut events = self.detector.tick(now, &observer);
        if let Some(request) = self.detector.poll_mesh_request(now) {
            events.push(DetectorEvent::MeshRequested(request));
        }
        self.emit(now, events)
    }

    pub fn frame(&mut self, now: Timestamp) -> Result<Vec<Outbound>> {
        let observer = self.detector.observer();
        let events = self.detector.frame(&observer);
        self.emit(now, events)
    }

    /// Run every detection tick due at or before `until`, each followed by
    /// a frame. The first call schedules the first tick at `until`.
    pub fn advance_to(&mut self, until: Timestamp) -> Result<Vec<Outbound>> {
        let interval = self.tick_interval();
        let mut next = *self.next_tick.get_or_insert(until);
        let mut out = Vec::new();
        while next <= until {
            out.extend(self.tick(next)?);
            out.extend(self.frame(next)?);
            next += interval;
        }
        self.next_tick = Some(next);
        Ok(out)
    }

    /// Snapshot the registry and close the journal session with it. The
    /// snapshot is never older than the last emitted step.
    pub fn finish(self, now: Timestamp) -> Result<(RegistrySnapshot, Option<SessionId>)> {
        let snapshot = self.detector.snapshot(now.max(self.clock));
        let session = match self.recorder {
            Some(recorder) => Some(recorder.close(&snapshot)?),
            None => None,
        };
        Ok((snapshot, session))
    }

    fn emit(&mut self, at: Timestamp, events: Vec<DetectorEvent>) -> Result<Vec<Outbound>> {
        self.clock = self.clock.max(at);
        if let Some(recorder) = &mut self.recorder {
            recorder.record(at, &events)?;
        }
        Ok(events
            .into_iter()
            .map(|event| Outbound { at, event })
            .collect())
    }
}
