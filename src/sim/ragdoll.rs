use rapier3d::na::{UnitQuaternion, Vector3, point, vector};
use rapier3d::prelude::*;

use super::{BodyPart, BodyPoseSnapshot, Simulator, SimulatorFactory, SnapshotFrame};
use crate::action::{ACTUATOR_COUNT, Actuator};
use crate::error::{Result, SearchError};

pub const FIXED_SIM_DT: f32 = 1.0 / 100.0;
const GRAVITY_Y: f32 = -9.81;
const BODY_DEPTH: f32 = 0.2;
const FOOT_CLEARANCE: f32 = 0.005;
const TORSO_SIZE: [f32; 2] = [0.32, 0.62];
const HEAD_SIZE: [f32; 2] = [0.22, 0.22];
const THIGH_SIZE: [f32; 2] = [0.14, 0.46];
const CALF_SIZE: [f32; 2] = [0.12, 0.46];
const TORSO_MASS: f32 = 30.0;
const HEAD_MASS: f32 = 5.0;
const THIGH_MASS: f32 = 8.0;
const CALF_MASS: f32 = 4.0;
const HIP_LIMITS: [f32; 2] = [-0.7, 1.4];
const KNEE_LIMITS: [f32; 2] = [-1.6, 0.05];
const NECK_LIMITS: [f32; 2] = [-0.35, 0.35];
const NECK_STIFFNESS: f32 = 60.0;
const NECK_DAMPING: f32 = 6.0;
// 9000 maps to 6 rad/s.
const COMMAND_TO_MOTOR_SPEED: f32 = 1.0 / 1500.0;
const MAX_MOTOR_SPEED: f32 = 6.8;
const MOTOR_TORQUE_HIP: f32 = 85.0;
const MOTOR_TORQUE_KNEE: f32 = 68.0;
const JOINT_MOTOR_RESPONSE: f32 = 12.0;
/// Damping of an uncommanded joint; high enough to hold the pose against
/// gravity up to the joint's torque limit.
const JOINT_HOLD_DAMPING: f32 = 2000.0;
/// Steps taken before the origin is recorded so contacts come to rest.
const SETTLE_STEPS: usize = 60;
/// No body may move further than this in a single step.
const MAX_STEP_TRAVEL: f32 = 0.5;
const MAX_BODY_ANGULAR_SPEED: f32 = 15.0;
const MAX_BODY_LINEAR_SPEED: f32 = 22.0;
const GROUND_COLLISION_GROUP: Group = Group::GROUP_1;
const CHARACTER_COLLISION_GROUP: Group = Group::GROUP_2;

/// Joint angles of one leg in radians; positive hip angles swing the foot
/// forward, negative knee angles fold the calf back.
#[derive(Clone, Copy, Debug)]
struct LegPose {
    hip: f32,
    knee: f32,
}

/// Starting stance: weight on a straight left leg, right leg lifted forward
/// with the knee bent. Must not be mirror-symmetric, or every action starts
/// with zero net displacement.
const LEFT_LEG_POSE: LegPose = LegPose { hip: 0.0, knee: 0.0 };
const RIGHT_LEG_POSE: LegPose = LegPose {
    hip: 0.3,
    knee: -0.6,
};

#[derive(Clone, Debug)]
pub struct RagdollConfig {
    pub dt: f32,
    pub motor_power_scale: f32,
}

impl Default for RagdollConfig {
    fn default() -> Self {
        Self {
            dt: FIXED_SIM_DT,
            motor_power_scale: 1.0,
        }
    }
}

/// Builds a fresh [`Ragdoll`] per call.
#[derive(Clone, Debug, Default)]
pub struct RagdollFactory {
    pub config: RagdollConfig,
}

impl SimulatorFactory for RagdollFactory {
    type Sim = Ragdoll;

    fn create(&self) -> Result<Ragdoll> {
        Ragdoll::new(&self.config)
    }
}

struct SimPart {
    body: RigidBodyHandle,
    size: [f32; 3],
}

struct LegMotor {
    actuator: Actuator,
    joint: ImpulseJointHandle,
    torque: f32,
}

/// Planar QWOP-style ragdoll: torso, head and two legs of thigh + calf.
/// Bodies are locked to the xy plane and only collide with the ground.
pub struct Ragdoll {
    pipeline: PhysicsPipeline,
    gravity: Vector3<f32>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    parts: Vec<SimPart>,
    motors: Vec<LegMotor>,
    torso_handle: RigidBodyHandle,
    head_handle: RigidBodyHandle,
    pending: [f32; ACTUATOR_COUNT],
    spawn_x: f32,
    elapsed: f32,
}

impl Ragdoll {
    pub fn new(config: &RagdollConfig) -> Result<Self> {
        if !(config.dt.is_finite() && config.dt > 0.0) {
            return Err(SearchError::Simulation(format!(
                "time step must be positive, got {}",
                config.dt
            )));
        }

        let gravity = vector![0.0, GRAVITY_Y, 0.0];
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = config.dt;
        integration_parameters.max_ccd_substeps = 4;

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();
        let mut impulse_joints = ImpulseJointSet::new();

        let ground_handle = bodies.insert(RigidBodyBuilder::fixed().build());
        let ground_collider = ColliderBuilder::cuboid(420.0, 5.0, 4.0)
            .translation(vector![0.0, -5.0, 0.0])
            .friction(1.08)
            .restitution(0.015)
            .collision_groups(InteractionGroups::new(
                GROUND_COLLISION_GROUP,
                CHARACTER_COLLISION_GROUP,
                InteractionTestMode::And,
            ))
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        let hip_y = FOOT_CLEARANCE + CALF_SIZE[1] + THIGH_SIZE[1];
        let torso_center = vector![0.0, hip_y + TORSO_SIZE[1] * 0.5, 0.0];
        let torso_handle = insert_box_body(
            &mut bodies,
            &mut colliders,
            TORSO_SIZE,
            TORSO_MASS,
            torso_center,
        );
        // The hinges keep every limb in the torso's plane.
        if let Some(torso) = bodies.get_mut(torso_handle) {
            torso.set_locked_axes(
                LockedAxes::TRANSLATION_LOCKED_Z
                    | LockedAxes::ROTATION_LOCKED_X
                    | LockedAxes::ROTATION_LOCKED_Y,
                true,
            );
        }
        let mut parts = vec![SimPart {
            body: torso_handle,
            size: box_size(TORSO_SIZE),
        }];

        let neck_y = hip_y + TORSO_SIZE[1];
        let head_handle = insert_box_body(
            &mut bodies,
            &mut colliders,
            HEAD_SIZE,
            HEAD_MASS,
            vector![0.0, neck_y + HEAD_SIZE[1] * 0.5, 0.0],
        );
        parts.push(SimPart {
            body: head_handle,
            size: box_size(HEAD_SIZE),
        });
        let neck = RevoluteJointBuilder::new(UnitVector::new_normalize(vector![0.0, 0.0, 1.0]))
            .local_anchor1(point![0.0, TORSO_SIZE[1] * 0.5, 0.0])
            .local_anchor2(point![0.0, -HEAD_SIZE[1] * 0.5, 0.0])
            .limits(NECK_LIMITS)
            .motor_position(0.0, NECK_STIFFNESS, NECK_DAMPING)
            .contacts_enabled(false);
        impulse_joints.insert(torso_handle, head_handle, neck, true);

        let hip = vector![0.0, hip_y, 0.0];
        let mut motors = Vec::with_capacity(ACTUATOR_COUNT);
        for (pose, thigh_actuator, calf_actuator) in [
            (LEFT_LEG_POSE, Actuator::ThighLeft, Actuator::CalfLeft),
            (RIGHT_LEG_POSE, Actuator::ThighRight, Actuator::CalfRight),
        ] {
            let thigh = insert_segment(
                &mut bodies,
                &mut colliders,
                THIGH_SIZE,
                THIGH_MASS,
                hip,
                pose.hip,
            );
            let hip_joint = insert_motor_joint(
                &mut impulse_joints,
                torso_handle,
                thigh,
                [-TORSO_SIZE[1] * 0.5, THIGH_SIZE[1] * 0.5],
                HIP_LIMITS,
                MOTOR_TORQUE_HIP * config.motor_power_scale,
            );
            motors.push(LegMotor {
                actuator: thigh_actuator,
                joint: hip_joint,
                torque: MOTOR_TORQUE_HIP * config.motor_power_scale,
            });

            let knee = hip + limb_direction(pose.hip) * THIGH_SIZE[1];
            let calf = insert_segment(
                &mut bodies,
                &mut colliders,
                CALF_SIZE,
                CALF_MASS,
                knee,
                pose.hip + pose.knee,
            );
            let knee_joint = insert_motor_joint(
                &mut impulse_joints,
                thigh,
                calf,
                [-THIGH_SIZE[1] * 0.5, CALF_SIZE[1] * 0.5],
                KNEE_LIMITS,
                MOTOR_TORQUE_KNEE * config.motor_power_scale,
            );
            motors.push(LegMotor {
                actuator: calf_actuator,
                joint: knee_joint,
                torque: MOTOR_TORQUE_KNEE * config.motor_power_scale,
            });

            parts.push(SimPart {
                body: thigh,
                size: box_size(THIGH_SIZE),
            });
            parts.push(SimPart {
                body: calf,
                size: box_size(CALF_SIZE),
            });
        }

        let mut ragdoll = Self {
            pipeline: PhysicsPipeline::new(),
            gravity,
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            impulse_joints,
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            parts,
            motors,
            torso_handle,
            head_handle,
            pending: [0.0; ACTUATOR_COUNT],
            spawn_x: torso_center.x,
            elapsed: 0.0,
        };
        for _ in 0..SETTLE_STEPS {
            ragdoll.advance_pipeline();
        }
        ragdoll.come_to_rest();
        ragdoll.spawn_x = ragdoll.character_position()?[0];
        Ok(ragdoll)
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn part_sizes(&self) -> Vec<[f32; 3]> {
        self.parts.iter().map(|part| part.size).collect()
    }

    pub fn current_frame(&self) -> SnapshotFrame {
        let mut bodies = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            if let Some(body) = self.bodies.get(part.body) {
                let p = body.translation();
                let q = body.rotation();
                bodies.push(BodyPoseSnapshot {
                    p: [p.x, p.y, p.z],
                    q: [q.i, q.j, q.k, q.w],
                });
            }
        }
        let distance = self
            .bodies
            .get(self.torso_handle)
            .map(|torso| torso.translation().x - self.spawn_x)
            .unwrap_or(0.0);
        SnapshotFrame {
            time: self.elapsed,
            distance,
            bodies,
        }
    }

    fn planar_translation(&self, handle: RigidBodyHandle, label: &str) -> Result<[f32; 2]> {
        let body = self
            .bodies
            .get(handle)
            .ok_or_else(|| SearchError::Simulation(format!("{label} body missing")))?;
        let p = body.translation();
        Ok([p.x, p.y])
    }

    fn come_to_rest(&mut self) {
        for part in &self.parts {
            if let Some(body) = self.bodies.get_mut(part.body) {
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
            }
        }
    }

    fn advance_pipeline(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }
}

impl Simulator for Ragdoll {
    fn character_position(&self) -> Result<[f32; 2]> {
        self.planar_translation(self.torso_handle, "torso")
    }

    fn body_part_position(&self, part: BodyPart) -> Result<[f32; 2]> {
        match part {
            BodyPart::Head => self.planar_translation(self.head_handle, "head"),
            BodyPart::Torso => self.planar_translation(self.torso_handle, "torso"),
        }
    }

    fn apply(&mut self, actuator: Actuator, command: f32) {
        self.pending[actuator.index()] = command;
    }

    fn step(&mut self) -> Result<()> {
        for motor in &self.motors {
            let command = self.pending[motor.actuator.index()];
            let joint = self.impulse_joints.get_mut(motor.joint, true).ok_or_else(|| {
                SearchError::Simulation(format!("{:?} joint missing", motor.actuator))
            })?;
            if command == 0.0 {
                joint
                    .data
                    .set_motor_velocity(JointAxis::AngX, 0.0, JOINT_HOLD_DAMPING);
            } else {
                let speed =
                    (command * COMMAND_TO_MOTOR_SPEED).clamp(-MAX_MOTOR_SPEED, MAX_MOTOR_SPEED);
                joint
                    .data
                    .set_motor_velocity(JointAxis::AngX, speed, JOINT_MOTOR_RESPONSE);
            }
            joint.data.set_motor_max_force(JointAxis::AngX, motor.torque);
        }

        let before: Vec<(RigidBodyHandle, Vector3<f32>)> = self
            .parts
            .iter()
            .filter_map(|part| {
                self.bodies
                    .get(part.body)
                    .map(|body| (part.body, *body.translation()))
            })
            .collect();

        self.advance_pipeline();

        for (handle, previous) in before {
            let body = self
                .bodies
                .get_mut(handle)
                .ok_or_else(|| SearchError::Simulation("body missing after step".to_string()))?;
            let travel = (body.translation() - previous).norm();
            if !(travel.is_finite() && travel <= MAX_STEP_TRAVEL) {
                return Err(SearchError::Simulation(format!(
                    "body moved {travel}m in one step at t={:.2}s",
                    self.elapsed
                )));
            }

            let av = *body.angvel();
            let av_len = av.norm();
            if av_len > MAX_BODY_ANGULAR_SPEED {
                body.set_angvel(av * (MAX_BODY_ANGULAR_SPEED / av_len), true);
            }
            let lv = *body.linvel();
            let lv_len = lv.norm();
            if lv_len > MAX_BODY_LINEAR_SPEED {
                body.set_linvel(lv * (MAX_BODY_LINEAR_SPEED / lv_len), true);
            }
        }

        self.pending = [0.0; ACTUATOR_COUNT];
        self.elapsed += self.integration_parameters.dt;
        Ok(())
    }
}

fn box_size(size: [f32; 2]) -> [f32; 3] {
    [size[0], size[1], BODY_DEPTH]
}

fn insert_box_body(
    bodies: &mut RigidBodySet,
    colliders: &mut ColliderSet,
    size: [f32; 2],
    mass: f32,
    center: Vector3<f32>,
) -> RigidBodyHandle {
    let body = RigidBodyBuilder::dynamic()
        .translation(center)
        .linear_damping(0.19)
        .angular_damping(0.31)
        .ccd_enabled(true)
        .build();
    let handle = bodies.insert(body);
    let collider = ColliderBuilder::cuboid(size[0] * 0.5, size[1] * 0.5, BODY_DEPTH * 0.5)
        .mass(mass)
        .friction(1.08)
        .restitution(0.015)
        .collision_groups(InteractionGroups::new(
            CHARACTER_COLLISION_GROUP,
            GROUND_COLLISION_GROUP,
            InteractionTestMode::And,
        ))
        .build();
    colliders.insert_with_parent(collider, handle, bodies);
    handle
}

/// Unit vector pointing down a limb rotated `angle` about z from hanging
/// straight down.
fn limb_direction(angle: f32) -> Vector3<f32> {
    vector![angle.sin(), -angle.cos(), 0.0]
}

/// Box limb whose top end sits at `top`, rotated `angle` about z.
fn insert_segment(
    bodies: &mut RigidBodySet,
    colliders: &mut ColliderSet,
    size: [f32; 2],
    mass: f32,
    top: Vector3<f32>,
    angle: f32,
) -> RigidBodyHandle {
    let center = top + limb_direction(angle) * (size[1] * 0.5);
    let handle = insert_box_body(bodies, colliders, size, mass, center);
    if let Some(body) = bodies.get_mut(handle) {
        body.set_rotation(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
            true,
        );
    }
    handle
}

/// Hinge about z between `parent` and `child`; `anchors` are the y offsets of
/// the pivot in each body's local frame.
fn insert_motor_joint(
    impulse_joints: &mut ImpulseJointSet,
    parent: RigidBodyHandle,
    child: RigidBodyHandle,
    anchors: [f32; 2],
    limits: [f32; 2],
    torque: f32,
) -> ImpulseJointHandle {
    let joint = RevoluteJointBuilder::new(UnitVector::new_normalize(vector![0.0, 0.0, 1.0]))
        .local_anchor1(point![0.0, anchors[0], 0.0])
        .local_anchor2(point![0.0, anchors[1], 0.0])
        .limits(limits)
        .contacts_enabled(false);
    let handle = impulse_joints.insert(parent, child, joint, true);
    if let Some(joint_ref) = impulse_joints.get_mut(handle, false) {
        joint_ref
            .data
            .set_motor_model(JointAxis::AngX, MotorModel::ForceBased);
        joint_ref
            .data
            .set_motor_velocity(JointAxis::AngX, 0.0, JOINT_HOLD_DAMPING);
        joint_ref.data.set_motor_max_force(JointAxis::AngX, torque);
    }
    handle
}
