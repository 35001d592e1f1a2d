//! `surf serve`: the detector as a single-owner actor over JSON lines.
//!
//! A reader task parses `SensorEvent` lines and forwards them over an mpsc
//! channel. The actor owns the [`Runner`] and interleaves those events with
//! detection ticks and render frames from two intervals. After each step it
//! publishes the registry through a watch channel, so readers only ever see
//! whole steps.

use std::time::Duration;

use anyhow::{Context, Result};
use surf_core::{RegistrySnapshot, SensorEvent, now_unix_millis};
use surf_store::SessionId;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::runner::{Outbound, Runner};

const INBOUND_CAPACITY: usize = 256;

pub struct Server {
    runner: Runner,
    snapshots: watch::Sender<RegistrySnapshot>,
}

impl Server {
    pub fn new(runner: Runner) -> (Self, watch::Receiver<RegistrySnapshot>) {
        let (snapshots, receiver) = watch::channel(runner.detector().snapshot(now_unix_millis()));
        (Self { runner, snapshots }, receiver)
    }

    /// Serve until `input` closes or `shutdown` fires. Returns the final
    /// registry and the journal session, if recording.
    pub async fn run<R, W>(
        self,
        input: R,
        mut output: W,
        shutdown: CancellationToken,
    ) -> Result<(RegistrySnapshot, Option<SessionId>)>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let Server {
            mut runner,
            snapshots,
        } = self;

        let (tx, mut rx) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(read_events(input, tx, shutdown.clone()));

        let detection = &runner.detector().config().detection;
        let mut ticks = interval(Duration::from_millis(detection.detection_interval_ms));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames = interval(Duration::from_millis(detection.frame_interval_ms));
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("serving on stdin/stdout");
        loop {
            let (out, changed) = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => (runner.handle(now_unix_millis(), event)?, true),
                    None => break,
                },
                _ = ticks.tick() => (runner.tick(now_unix_millis())?, true),
                _ = frames.tick() => {
                    let out = runner.frame(now_unix_millis())?;
                    let changed = !out.is_empty();
                    (out, changed)
                }
            };
            write_lines(&mut output, &out).await?;
            if changed {
                snapshots.send_replace(runner.detector().snapshot(now_unix_millis()));
            }
        }

        shutdown.cancel();
        // The reader may be parked on a blocking stdin read; don't wait on it.
        reader.abort();

        let (snapshot, session) = runner.finish(now_unix_millis())?;
        snapshots.send_replace(snapshot.clone());
        output.flush().await.context("failed to flush output")?;
        tracing::info!(
            surfaces = snapshot.surfaces.len(),
            placements = snapshot.placements.len(),
            "server stopped"
        );
        Ok((snapshot, session))
    }
}

async fn read_events<R>(input: R, tx: mpsc::Sender<SensorEvent>, shutdown: CancellationToken)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut number = 0usize;
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        number += 1;
        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<SensorEvent>(line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("input line {number} skipped: {e}"),
                }
            }
            Ok(None) => {
                tracing::info!("input closed");
                break;
            }
            Err(e) => {
                tracing::warn!("input read failed: {e}");
                break;
            }
        }
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(output: &mut W, lines: &[Outbound]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut buf = Vec::new();
    for line in lines {
        serde_json::to_writer(&mut buf, line).context("failed to encode event")?;
        buf.push(b'\n');
    }
    output
        .write_all(&buf)
        .await
        .context("failed to write events")?;
    output.flush().await.context("failed to flush output")?;
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C, or SIGTERM on unix.
pub async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
