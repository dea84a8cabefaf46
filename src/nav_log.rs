use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use log::info;

use crate::state_machine::TelemetryEvent;

/// Telemetry log file, one timestamped line per event. The writer is
/// flushed on `stop` and again on drop, so the file is usable on every
/// exit path of the mission.
pub struct NavLog {
    writer: BufWriter<File>,
    t0: Instant,
}

impl NavLog {
    pub fn create(dir: &Path, filename: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(filename);
        info!("creating log file {}", path.display());
        Ok(NavLog {
            writer: BufWriter::new(File::create(path)?),
            t0: Instant::now(),
        })
    }

    pub fn record(&mut self, event: &TelemetryEvent) -> io::Result<()> {
        let t = self.t0.elapsed().as_secs_f64();
        match event {
            TelemetryEvent::LocalPosition { position } => writeln!(
                self.writer,
                "{:.3},local_position,{},{},{}",
                t, position.x, position.y, position.z
            ),
            TelemetryEvent::LocalVelocity { velocity, .. } => writeln!(
                self.writer,
                "{:.3},local_velocity,{},{},{}",
                t, velocity.x, velocity.y, velocity.z
            ),
            TelemetryEvent::VehicleState { armed, guided, .. } => writeln!(
                self.writer,
                "{:.3},state,{},{}",
                t, armed, guided
            ),
        }
    }

    pub fn stop(mut self) -> io::Result<()> {
        info!("closing log file");
        self.writer.flush()
    }
}

impl Drop for NavLog {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn records_one_line_per_event() {
        let dir = std::env::temp_dir().join(format!("nav-log-test-{}", std::process::id()));
        let mut nav_log = NavLog::create(&dir, "NavLog.txt").unwrap();
        nav_log
            .record(&TelemetryEvent::LocalPosition {
                position: Vector3::new(1.0, 2.0, -3.0),
            })
            .unwrap();
        nav_log
            .record(&TelemetryEvent::VehicleState {
                armed: true,
                guided: false,
                global_position: Vector3::zeros(),
            })
            .unwrap();
        nav_log.stop().unwrap();

        let contents = fs::read_to_string(dir.join("NavLog.txt")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("local_position,1,2,-3"));
        assert!(lines[1].contains("state,true,false"));
        fs::remove_dir_all(&dir).unwrap();
    }
}
