//! Scripted sessions over the synthetic office scene.
//!
//! A hit-test session is a fixed script. A mesh session reacts to the
//! detector: every `meshRequested` is answered with a ticketed table mesh
//! [`MESH_LATENCY_MS`] later. Either way every line fed to the detector is
//! kept, so the returned script replays to the same output.

use std::collections::VecDeque;
use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use surf_core::{DetectorEvent, SensorEvent, SyntheticScene, Timestamp, Vec3};

use crate::replay::{Replay, ReplayLine, ReplaySummary};
use crate::runner::Runner;

/// Delay between a mesh request and the platform's answer (ms).
pub const MESH_LATENCY_MS: u64 = 200;

/// Which sensor the scripted platform offers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SimSource {
    /// A hit-test cursor sweeping each table.
    HitTest,
    /// Scene-mesh snapshots of every table.
    Mesh,
}

#[derive(Clone, Debug)]
pub struct SimOptions {
    pub seed: u64,
    pub source: SimSource,
    /// The script runs at least this long (ms).
    pub duration_ms: u64,
    /// Cursor spacing for hit-test sweeps (m).
    pub step: f32,
    /// Time between consecutive sweep rows (ms).
    pub row_interval_ms: u64,
    /// Time between observer heartbeats in mesh sessions (ms).
    pub heartbeat_ms: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            source: SimSource::HitTest,
            duration_ms: 5_000,
            step: 0.04,
            row_interval_ms: 100,
            heartbeat_ms: 300,
        }
    }
}

const EYE: Vec3 = Vec3::new(0.0, 1.6, 0.0);

/// Build the scripted part of one session: platform capabilities, an
/// observer looking at the desk, detection on, then sensor data until
/// `duration_ms`. Mesh sessions get observer heartbeats here; their meshes
/// arrive in [`run`].
pub fn script(options: &SimOptions) -> Vec<ReplayLine> {
    let mut scene = SyntheticScene::office(options.seed);
    let desk = scene.tables.first().map_or(Vec3::new(0.0, 0.75, -1.0), |t| t.center);
    let line = |at, event| ReplayLine { at, event };

    let mut lines = vec![
        line(
            0,
            SensorEvent::Capabilities {
                hit_test: options.source == SimSource::HitTest,
                mesh: options.source == SimSource::Mesh,
            },
        ),
        line(
            0,
            SensorEvent::Observer {
                position: EYE,
                forward: desk - EYE,
            },
        ),
        line(0, SensorEvent::ToggleDetection { enabled: true }),
    ];

    let mut at: Timestamp = 0;
    match options.source {
        SimSource::HitTest => {
            for table in 0..scene.tables.len() {
                for hits in scene.sweep(table, options.step) {
                    at += options.row_interval_ms;
                    lines.push(line(at, SensorEvent::HitTest { hits }));
                }
            }
        }
        SimSource::Mesh => {
            let look = SensorEvent::Observer {
                position: EYE,
                forward: desk - EYE,
            };
            let heartbeat = options.heartbeat_ms.max(1);
            at = heartbeat;
            while at < options.duration_ms {
                lines.push(line(at, look.clone()));
                at += heartbeat;
            }
            at -= heartbeat;
        }
    }

    // Hold the pose until the end so the last ticks run.
    let end = options.duration_ms.max(at);
    lines.push(line(
        end,
        SensorEvent::Observer {
            position: EYE,
            forward: desk - EYE,
        },
    ));
    lines
}

/// Feed one simulated session to `runner`, writing its emissions to
/// `output`. Returns every line fed, answers included.
pub fn run<W: Write>(
    runner: &mut Runner,
    options: &SimOptions,
    output: &mut W,
) -> Result<(Vec<ReplayLine>, ReplaySummary)> {
    let scene = SyntheticScene::office(options.seed);
    let mesh = scene.mesh(6);
    let mut pending: VecDeque<ReplayLine> = script(options).into();
    let mut fed = Vec::with_capacity(pending.len());
    let mut replay = Replay::default();

    while let Some(line) = pending.pop_front() {
        fed.push(line.clone());
        let out = replay.step(runner, line, output)?;
        for emitted in out {
            let DetectorEvent::MeshRequested(request) = emitted.event else {
                continue;
            };
            let mut payload = mesh.clone();
            payload.ticket = Some(request.ticket);
            let answer = ReplayLine {
                at: request.requested_at + MESH_LATENCY_MS,
                event: SensorEvent::MeshUpdate(payload),
            };
            let slot = pending.partition_point(|l| l.at <= answer.at);
            pending.insert(slot, answer);
        }
    }

    let summary = replay.finish(runner, output)?;
    Ok((fed, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{replay, write_script};
    use surf_core::{DetectorConfig, MeshTicket, SurfaceDetector};

    #[test]
    fn test_script_starts_with_setup() {
        let lines = script(&SimOptions::default());
        assert!(matches!(
            lines[0].event,
            SensorEvent::Capabilities {
                hit_test: true,
                mesh: false
            }
        ));
        assert!(matches!(lines[2].event, SensorEvent::ToggleDetection { enabled: true }));
        assert!(lines.windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[test]
    fn test_hit_test_script_sweeps_both_tables() {
        let lines = script(&SimOptions::default());
        let rows = lines
            .iter()
            .filter(|l| matches!(l.event, SensorEvent::HitTest { .. }))
            .count();
        let mut scene = SyntheticScene::office(42);
        let expected = scene.sweep(0, 0.04).len() + scene.sweep(1, 0.04).len();
        assert_eq!(rows, expected);
        assert!(rows >= 30);
        assert!(lines.last().unwrap().at >= 5_000);
    }

    #[test]
    fn test_mesh_script_holds_heartbeats() {
        let options = SimOptions {
            source: SimSource::Mesh,
            duration_ms: 1_000,
            ..SimOptions::default()
        };
        let lines = script(&options);
        assert!(!lines.iter().any(|l| matches!(l.event, SensorEvent::MeshUpdate(_))));
        let at: Vec<Timestamp> = lines[3..].iter().map(|l| l.at).collect();
        assert_eq!(at, vec![300, 600, 900, 1_000]);
    }

    fn lenient_runner() -> Runner {
        let mut config = DetectorConfig::default();
        config.clustering.min_surface_area = 0.0;
        Runner::new(SurfaceDetector::new(config).unwrap())
    }

    #[test]
    fn test_mesh_session_answers_each_request() {
        let options = SimOptions {
            source: SimSource::Mesh,
            duration_ms: 7_000,
            ..SimOptions::default()
        };
        let mut out = Vec::new();
        let (fed, summary) = run(&mut lenient_runner(), &options, &mut out).unwrap();
        assert_eq!(summary.lines, fed.len());

        let answers: Vec<(Timestamp, MeshTicket)> = fed
            .iter()
            .filter_map(|l| match &l.event {
                SensorEvent::MeshUpdate(payload) => Some((l.at, payload.ticket?)),
                _ => None,
            })
            .collect();
        assert_eq!(answers.len(), 3);
        assert_eq!(answers[0].0, 300 + MESH_LATENCY_MS);
        assert_eq!(answers[1].0, 3_300 + MESH_LATENCY_MS);
        assert_eq!(answers[0].1.request, 1);
        assert_eq!(answers[1].1.request, 2);
        assert!(fed.windows(2).all(|w| w[0].at <= w[1].at));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(r#""source":"mesh""#));
        assert!(text.contains("placementCreated"));
    }

    #[test]
    fn test_fed_lines_replay_the_same() {
        let options = SimOptions {
            source: SimSource::Mesh,
            ..SimOptions::default()
        };
        let mut simulated = Vec::new();
        let (fed, _) = run(&mut lenient_runner(), &options, &mut simulated).unwrap();

        let mut script = Vec::new();
        write_script(&mut script, &fed).unwrap();
        let mut replayed = Vec::new();
        replay(&mut lenient_runner(), script.as_slice(), &mut replayed).unwrap();

        let kinds = |out: &[u8]| -> Vec<String> {
            String::from_utf8_lossy(out)
                .lines()
                .map(|l| {
                    let v: serde_json::Value = serde_json::from_str(l).unwrap();
                    format!("{}@{}", v["event"]["type"], v["at"])
                })
                .collect()
        };
        assert_eq!(kinds(&simulated), kinds(&replayed));
    }

    #[test]
    fn test_same_seed_same_script() {
        let a = script(&SimOptions::default());
        let b = script(&SimOptions::default());
        assert_eq!(a, b);
    }
}
