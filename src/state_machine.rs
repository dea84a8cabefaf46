use log::{debug, info};
use nalgebra::Vector3;

/// Target altitude for takeoff and all waypoint legs, in meters, up-positive.
pub const CRUISE_ALTITUDE: f32 = 3.0;

/// Fraction of the target altitude at which a climb counts as complete.
const TAKEOFF_COMPLETE_RATIO: f32 = 0.95;

/// Global altitude above home below which the vehicle counts as landed.
const LANDED_ALTITUDE_MARGIN: f32 = 0.1;

/// Magnitude of local z below which the vehicle counts as on the ground.
const GROUND_CONTACT_MARGIN: f32 = 0.01;

/// Horizontal distance at which a waypoint counts as reached.
const WAYPOINT_RADIUS: f32 = 1.0;

/// Phase of the mission. `Manual` is both the initial and the terminal mode;
/// a completed mission loops back to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightMode {
    Manual,
    Arming,
    Takeoff,
    Waypoint,
    Landing,
    Disarming,
}

/// One decoded telemetry notification from the vehicle link.
///
/// Each variant carries every value its handler needs, so the state machine
/// never reads link-internal state.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    /// New vehicle-frame position; z is down-positive.
    LocalPosition { position: Vector3<f32> },
    /// New vehicle-frame velocity, with the position and altitude values the
    /// landed check evaluates.
    LocalVelocity {
        velocity: Vector3<f32>,
        local_position: Vector3<f32>,
        global_altitude: f32,
        home_altitude: f32,
    },
    /// New armed/guided status, with the global position an arming
    /// transition records as home.
    VehicleState {
        armed: bool,
        guided: bool,
        global_position: Vector3<f32>,
    },
}

/// A fire-and-forget instruction for the vehicle link. Acknowledgment, if
/// any, arrives as a later telemetry event.
#[derive(Clone, Debug, PartialEq)]
pub enum VehicleCommand {
    TakeControl,
    ReleaseControl,
    Arm,
    Disarm,
    SetHome(Vector3<f32>),
    Takeoff(f32),
    Goto(Vector3<f32>),
    Land,
    StopLink,
}

/// Owns the mission state and advances it in response to telemetry.
///
/// All mutation happens inside [`handle_event`](Self::handle_event); the
/// caller issues the returned commands to the link in order.
pub struct FlightStateMachine {
    mode: FlightMode,
    /// Currently commanded destination, altitude-up-positive. The altitude
    /// component is authoritative for the takeoff-complete check.
    target_position: Vector3<f32>,
    trajectory: Vec<Vector3<f32>>,
    /// Index of the next unvisited waypoint; runs 0..=trajectory.len().
    waypoint_cursor: usize,
    mission_active: bool,
}

impl FlightStateMachine {
    pub fn new(trajectory: Vec<Vector3<f32>>) -> Self {
        FlightStateMachine {
            mode: FlightMode::Manual,
            target_position: Vector3::zeros(),
            trajectory,
            waypoint_cursor: 0,
            mission_active: true,
        }
    }

    pub fn mode(&self) -> FlightMode {
        self.mode
    }

    pub fn mission_active(&self) -> bool {
        self.mission_active
    }

    /// Routes one telemetry event to its handler and returns the commands to
    /// issue. Unexpected (mode, event) combinations are no-ops; the mode
    /// guard is the error-prevention mechanism.
    pub fn handle_event(&mut self, event: &TelemetryEvent) -> Vec<VehicleCommand> {
        let mut commands = Vec::new();
        match event {
            TelemetryEvent::LocalPosition { position } => {
                self.on_position_update(*position, &mut commands)
            }
            TelemetryEvent::LocalVelocity {
                local_position,
                global_altitude,
                home_altitude,
                ..
            } => self.on_velocity_update(
                *local_position,
                *global_altitude,
                *home_altitude,
                &mut commands,
            ),
            TelemetryEvent::VehicleState {
                armed,
                guided: _,
                global_position,
            } => self.on_vehicle_state_update(*armed, *global_position, &mut commands),
        }
        commands
    }

    fn on_position_update(&mut self, position: Vector3<f32>, commands: &mut Vec<VehicleCommand>) {
        match self.mode {
            FlightMode::Takeoff => {
                // Local frame is down-positive.
                let altitude = -position.z;
                if altitude > TAKEOFF_COMPLETE_RATIO * self.target_position.z {
                    self.landing_transition(commands);
                }
            }
            FlightMode::Waypoint => {
                let distance = (self.target_position.xy() - position.xy()).norm();
                if distance < WAYPOINT_RADIUS {
                    if self.waypoint_cursor < self.trajectory.len() {
                        self.waypoint_transition(commands);
                    } else {
                        self.landing_transition(commands);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_velocity_update(
        &mut self,
        local_position: Vector3<f32>,
        global_altitude: f32,
        home_altitude: f32,
        commands: &mut Vec<VehicleCommand>,
    ) {
        if self.mode != FlightMode::Landing {
            return;
        }
        if global_altitude - home_altitude < LANDED_ALTITUDE_MARGIN
            && local_position.z.abs() < GROUND_CONTACT_MARGIN
        {
            self.disarming_transition(commands);
        }
    }

    fn on_vehicle_state_update(
        &mut self,
        armed: bool,
        global_position: Vector3<f32>,
        commands: &mut Vec<VehicleCommand>,
    ) {
        if !self.mission_active {
            return;
        }
        match self.mode {
            FlightMode::Manual => self.arming_transition(global_position, commands),
            FlightMode::Arming if armed => self.takeoff_transition(commands),
            FlightMode::Disarming if !armed => self.manual_transition(commands),
            _ => {}
        }
    }

    /// Takes control, arms, and records the current global position as home.
    fn arming_transition(
        &mut self,
        global_position: Vector3<f32>,
        commands: &mut Vec<VehicleCommand>,
    ) {
        info!("arming transition");
        commands.push(VehicleCommand::TakeControl);
        commands.push(VehicleCommand::Arm);
        commands.push(VehicleCommand::SetHome(global_position));
        self.mode = FlightMode::Arming;
    }

    /// Sets the cruise target altitude exactly once per takeoff.
    fn takeoff_transition(&mut self, commands: &mut Vec<VehicleCommand>) {
        info!("takeoff transition");
        self.target_position.z = CRUISE_ALTITUDE;
        commands.push(VehicleCommand::Takeoff(self.target_position.z));
        self.mode = FlightMode::Takeoff;
    }

    /// Commands the next trajectory entry and advances the cursor. The
    /// target altitude stays at cruise; the square is flat by construction.
    fn waypoint_transition(&mut self, commands: &mut Vec<VehicleCommand>) {
        info!("waypoint transition");
        let next = self.trajectory[self.waypoint_cursor];
        debug!("next waypoint: {:?}", next);
        self.target_position.x = next.x;
        self.target_position.y = next.y;
        commands.push(VehicleCommand::Goto(self.target_position));
        self.waypoint_cursor += 1;
        self.mode = FlightMode::Waypoint;
    }

    fn landing_transition(&mut self, commands: &mut Vec<VehicleCommand>) {
        info!("landing transition");
        commands.push(VehicleCommand::Land);
        self.mode = FlightMode::Landing;
    }

    fn disarming_transition(&mut self, commands: &mut Vec<VehicleCommand>) {
        info!("disarming transition");
        commands.push(VehicleCommand::Disarm);
        self.mode = FlightMode::Disarming;
    }

    /// Releases control, stops the link, and ends the mission.
    fn manual_transition(&mut self, commands: &mut Vec<VehicleCommand>) {
        info!("manual transition");
        commands.push(VehicleCommand::ReleaseControl);
        commands.push(VehicleCommand::StopLink);
        self.mission_active = false;
        self.mode = FlightMode::Manual;
    }
}
