use std::collections::VecDeque;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use mavlink::common::MavMessage::*;
use mavlink::common::*;
use mavlink::{MavConnection, MavHeader};
use nalgebra::Vector3;

use crate::state_machine::TelemetryEvent;

type MavResponse = io::Result<(MavHeader, MavMessage)>;

const TARGET_SYSTEM: u8 = 1;
const TARGET_COMPONENT: u8 = 1;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Command and telemetry boundary to the vehicle.
///
/// Commands are fire-and-forget; acknowledgment, if any, arrives as a later
/// telemetry event. `recv_timeout` yields `Ok(None)` when no telemetry event
/// became available within the timeout.
pub trait Link {
    fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<TelemetryEvent>>;
    fn take_control(&mut self) -> io::Result<()>;
    fn release_control(&mut self) -> io::Result<()>;
    fn arm(&mut self) -> io::Result<()>;
    fn disarm(&mut self) -> io::Result<()>;
    /// Sets the vehicle home position; x is longitude, y latitude, z
    /// altitude in meters.
    fn set_home_position(&mut self, x: f32, y: f32, z: f32) -> io::Result<()>;
    fn takeoff(&mut self, altitude: f32) -> io::Result<()>;
    fn land(&mut self) -> io::Result<()>;
    /// Commands a local-frame destination; altitude is up-positive.
    fn goto(&mut self, position: Vector3<f32>) -> io::Result<()>;
    fn stop(&mut self) -> io::Result<()>;
}

/// Latest-known telemetry values, updated as messages decode. The global
/// position is (longitude, latitude, altitude).
#[derive(Clone, Debug)]
pub struct TelemetrySnapshot {
    pub local_position: Vector3<f32>,
    pub local_velocity: Vector3<f32>,
    pub global_position: Vector3<f32>,
    pub global_home: Vector3<f32>,
    pub armed: bool,
    pub guided: bool,
}

impl TelemetrySnapshot {
    fn new() -> Self {
        TelemetrySnapshot {
            local_position: Vector3::zeros(),
            local_velocity: Vector3::zeros(),
            global_position: Vector3::zeros(),
            global_home: Vector3::zeros(),
            armed: false,
            guided: false,
        }
    }
}

/// Turns raw MAVLink messages into telemetry events, filling each event
/// payload from the snapshot at decode time.
pub struct TelemetryDecoder {
    snapshot: TelemetrySnapshot,
}

impl TelemetryDecoder {
    pub fn new() -> Self {
        TelemetryDecoder {
            snapshot: TelemetrySnapshot::new(),
        }
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// A LOCAL_POSITION_NED frame carries both position and velocity, so it
    /// yields two events, position first. Unsupported messages yield none.
    pub fn decode(&mut self, msg: &MavMessage) -> Vec<TelemetryEvent> {
        match msg {
            LOCAL_POSITION_NED(p) => {
                self.snapshot.local_position = Vector3::new(p.x, p.y, p.z);
                self.snapshot.local_velocity = Vector3::new(p.vx, p.vy, p.vz);
                vec![
                    TelemetryEvent::LocalPosition {
                        position: self.snapshot.local_position,
                    },
                    TelemetryEvent::LocalVelocity {
                        velocity: self.snapshot.local_velocity,
                        local_position: self.snapshot.local_position,
                        global_altitude: self.snapshot.global_position.z,
                        home_altitude: self.snapshot.global_home.z,
                    },
                ]
            }
            GLOBAL_POSITION_INT(g) => {
                self.snapshot.global_position = Vector3::new(
                    g.lon as f32 / 1e7,
                    g.lat as f32 / 1e7,
                    g.alt as f32 / 1000.0,
                );
                Vec::new()
            }
            HOME_POSITION(h) => {
                self.snapshot.global_home = Vector3::new(
                    h.longitude as f32 / 1e7,
                    h.latitude as f32 / 1e7,
                    h.altitude as f32 / 1000.0,
                );
                Vec::new()
            }
            HEARTBEAT(hb) => {
                self.snapshot.armed = hb
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                self.snapshot.guided = hb
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_GUIDED_ENABLED);
                vec![TelemetryEvent::VehicleState {
                    armed: self.snapshot.armed,
                    guided: self.snapshot.guided,
                    global_position: self.snapshot.global_position,
                }]
            }
            _ => Vec::new(),
        }
    }
}

/// A MAVLink connection with a dedicated reader thread, so the consumer can
/// poll with a timeout while the reader blocks on the socket.
pub struct WrappedMavConnection {
    rx: mpsc::Receiver<MavResponse>,
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
}

impl WrappedMavConnection {
    pub fn connect(address: &str) -> io::Result<Self> {
        info!("connecting to {}", address);
        let conn: Arc<dyn MavConnection<MavMessage> + Send + Sync> =
            mavlink::connect::<MavMessage>(address)?.into();

        let (tx, rx) = mpsc::channel();
        thread::spawn({
            let conn = conn.clone();
            move || loop {
                let response = conn
                    .recv()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{:?}", e)));
                if tx.send(response).is_err() {
                    return;
                }
            }
        });

        Ok(WrappedMavConnection { rx, conn })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> MavResponse {
        match self.rx.recv_timeout(timeout) {
            Ok(mav_response) => mav_response,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "timed out waiting for MAVMessage",
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                error!("MAVLink reader thread died");
                Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "MAVLink reader thread died",
                ))
            }
        }
    }

    pub fn send(&self, msg: &MavMessage) -> io::Result<()> {
        self.conn
            .send_default(msg)
            .map(|_| ())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{:?}", e)))
    }
}

/// `Link` implementation over the MAVLink common dialect.
pub struct MavlinkLink {
    conn: WrappedMavConnection,
    decoder: TelemetryDecoder,
    pending: VecDeque<TelemetryEvent>,
    last_heartbeat: Instant,
}

impl MavlinkLink {
    pub fn connect(address: &str) -> io::Result<Self> {
        let conn = WrappedMavConnection::connect(address)?;
        let link = MavlinkLink {
            conn,
            decoder: TelemetryDecoder::new(),
            pending: VecDeque::new(),
            last_heartbeat: Instant::now(),
        };
        link.send_heartbeat()?;
        Ok(link)
    }

    fn send_heartbeat(&self) -> io::Result<()> {
        self.conn.send(&HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 0x3,
        }))
    }

    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> io::Result<()> {
        self.conn.send(&COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: TARGET_SYSTEM,
            target_component: TARGET_COMPONENT,
            confirmation: 0,
        }))
    }
}

impl Link for MavlinkLink {
    fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<TelemetryEvent>> {
        if self.last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            self.send_heartbeat()?;
            self.last_heartbeat = Instant::now();
        }
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        match self.conn.recv_timeout(timeout) {
            Ok((_header, msg)) => {
                self.pending.extend(self.decoder.decode(&msg));
                Ok(self.pending.pop_front())
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn take_control(&mut self) -> io::Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_GUIDED_ENABLE,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn release_control(&mut self) -> io::Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_GUIDED_ENABLE,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn arm(&mut self) -> io::Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn disarm(&mut self) -> io::Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn set_home_position(&mut self, x: f32, y: f32, z: f32) -> io::Result<()> {
        // DO_SET_HOME takes latitude, longitude, altitude in params 5..7.
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_HOME,
            [0.0, 0.0, 0.0, 0.0, y, x, z],
        )
    }

    fn takeoff(&mut self, altitude: f32) -> io::Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude],
        )
    }

    fn land(&mut self) -> io::Result<()> {
        self.command_long(
            MavCmd::MAV_CMD_NAV_LAND,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    fn goto(&mut self, position: Vector3<f32>) -> io::Result<()> {
        debug!("goto {:?}", position);
        self.conn
            .send(&SET_POSITION_TARGET_LOCAL_NED(
                SET_POSITION_TARGET_LOCAL_NED_DATA {
                    time_boot_ms: 0,
                    x: position.x,
                    y: position.y,
                    // NED frame: down-positive.
                    z: -position.z,
                    vx: 0.0,
                    vy: 0.0,
                    vz: 0.0,
                    afx: 0.0,
                    afy: 0.0,
                    afz: 0.0,
                    yaw: 0.0,
                    yaw_rate: 0.0,
                    type_mask: PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE
                        | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE,
                    target_system: TARGET_SYSTEM,
                    target_component: TARGET_COMPONENT,
                    coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
                },
            ))
    }

    fn stop(&mut self) -> io::Result<()> {
        info!("closing vehicle link");
        self.pending.clear();
        Ok(())
    }
}
