use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::link::Link;
use crate::nav_log::NavLog;
use crate::state_machine::{FlightStateMachine, TelemetryEvent, VehicleCommand};
use crate::trajectory;

const RECV_TIMEOUT: Duration = Duration::from_millis(10);

/// Drives one mission over a vehicle link: routes telemetry events into the
/// state machine and issues the resulting commands back to the link until
/// the state machine reaches its terminal mode.
pub struct Mission<L: Link> {
    link: L,
    state_machine: FlightStateMachine,
}

impl<L: Link> Mission<L> {
    /// The trajectory is computed here, once, and never mutated afterwards.
    pub fn new(link: L) -> Self {
        Mission {
            link,
            state_machine: FlightStateMachine::new(trajectory::compute_trajectory()),
        }
    }

    /// Runs the mission to completion. The telemetry log is closed on every
    /// exit path; link errors are fatal and propagate to the caller, there
    /// is no retry.
    pub fn start(&mut self, log_dir: &Path, log_file: &str) -> io::Result<()> {
        let mut nav_log = NavLog::create(log_dir, log_file)?;
        let result = self.event_loop(&mut nav_log);
        nav_log.stop()?;
        result
    }

    fn event_loop(&mut self, nav_log: &mut NavLog) -> io::Result<()> {
        info!("entering event loop");
        while self.state_machine.mission_active() {
            match self.link.recv_timeout(RECV_TIMEOUT)? {
                Some(event) => {
                    if let Err(e) = nav_log.record(&event) {
                        warn!("failed to record telemetry: {}", e);
                    }
                    self.dispatch(&event)?;
                }
                None => continue,
            }
        }
        info!("mission finished");
        Ok(())
    }

    fn dispatch(&mut self, event: &TelemetryEvent) -> io::Result<()> {
        for command in self.state_machine.handle_event(event) {
            debug!("issuing {:?}", command);
            match command {
                VehicleCommand::TakeControl => self.link.take_control()?,
                VehicleCommand::ReleaseControl => self.link.release_control()?,
                VehicleCommand::Arm => self.link.arm()?,
                VehicleCommand::Disarm => self.link.disarm()?,
                VehicleCommand::SetHome(p) => self.link.set_home_position(p.x, p.y, p.z)?,
                VehicleCommand::Takeoff(altitude) => self.link.takeoff(altitude)?,
                VehicleCommand::Goto(p) => self.link.goto(p)?,
                VehicleCommand::Land => self.link.land()?,
                VehicleCommand::StopLink => self.link.stop()?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state_machine::FlightMode;
    use nalgebra::Vector3;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::PathBuf;

    /// Replays a scripted telemetry sequence and records every command the
    /// mission issues. An exhausted script reports a dead link.
    struct MockLink {
        script: VecDeque<TelemetryEvent>,
        calls: Vec<String>,
    }

    impl MockLink {
        fn new(script: Vec<TelemetryEvent>) -> Self {
            MockLink {
                script: script.into(),
                calls: Vec::new(),
            }
        }
    }

    impl Link for MockLink {
        fn recv_timeout(&mut self, _timeout: Duration) -> io::Result<Option<TelemetryEvent>> {
            match self.script.pop_front() {
                Some(event) => Ok(Some(event)),
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed")),
            }
        }

        fn take_control(&mut self) -> io::Result<()> {
            self.calls.push("take_control".into());
            Ok(())
        }

        fn release_control(&mut self) -> io::Result<()> {
            self.calls.push("release_control".into());
            Ok(())
        }

        fn arm(&mut self) -> io::Result<()> {
            self.calls.push("arm".into());
            Ok(())
        }

        fn disarm(&mut self) -> io::Result<()> {
            self.calls.push("disarm".into());
            Ok(())
        }

        fn set_home_position(&mut self, _x: f32, _y: f32, _z: f32) -> io::Result<()> {
            self.calls.push("set_home".into());
            Ok(())
        }

        fn takeoff(&mut self, altitude: f32) -> io::Result<()> {
            self.calls.push(format!("takeoff {}", altitude));
            Ok(())
        }

        fn land(&mut self) -> io::Result<()> {
            self.calls.push("land".into());
            Ok(())
        }

        fn goto(&mut self, position: Vector3<f32>) -> io::Result<()> {
            self.calls.push(format!("goto {},{}", position.x, position.y));
            Ok(())
        }

        fn stop(&mut self) -> io::Result<()> {
            self.calls.push("stop".into());
            Ok(())
        }
    }

    fn temp_log_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mission-test-{}-{}", tag, std::process::id()))
    }

    fn state(armed: bool) -> TelemetryEvent {
        TelemetryEvent::VehicleState {
            armed,
            guided: armed,
            global_position: Vector3::new(8.54, 47.37, 488.0),
        }
    }

    #[test]
    fn full_mission_issues_the_documented_command_sequence() {
        let script = vec![
            state(false),
            state(true),
            TelemetryEvent::LocalPosition {
                position: Vector3::new(0.0, 0.0, -2.95),
            },
            TelemetryEvent::LocalVelocity {
                velocity: Vector3::zeros(),
                local_position: Vector3::new(0.0, 0.0, -0.005),
                global_altitude: 488.05,
                home_altitude: 488.0,
            },
            state(false),
        ];
        let dir = temp_log_dir("full");
        let mut mission = Mission::new(MockLink::new(script));
        mission.start(&dir, "NavLog.txt").unwrap();

        assert_eq!(
            mission.link.calls,
            vec![
                "take_control",
                "arm",
                "set_home",
                "takeoff 3",
                "land",
                "disarm",
                "release_control",
                "stop",
            ]
        );
        assert!(!mission.state_machine.mission_active());
        assert_eq!(mission.state_machine.mode(), FlightMode::Manual);

        let log = fs::read_to_string(dir.join("NavLog.txt")).unwrap();
        assert_eq!(log.lines().count(), 5);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn link_failure_propagates_and_still_closes_the_log() {
        let dir = temp_log_dir("fail");
        let mut mission = Mission::new(MockLink::new(vec![state(false)]));
        let err = mission.start(&dir, "NavLog.txt").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        // The log file exists and holds the one event seen before the loss.
        let log = fs::read_to_string(dir.join("NavLog.txt")).unwrap();
        assert_eq!(log.lines().count(), 1);
        fs::remove_dir_all(&dir).unwrap();
    }
}
