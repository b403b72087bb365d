//! Machine geometry translation between axis space (mm) and stepper space.
//!
//! Three geometries are supported. Cartesian and coreXY are linear maps and
//! can never fail; the rotary delta solves three tower angles and reports
//! unreachable targets. Skew compensation is a cartesian-only shear applied
//! before the inverse map.

use crate::config::{AXIS_COUNT, STEPPER_COUNT};
use crate::machine::Status;
use crate::settings::Settings;

const COS120: f32 = -0.5;
const SIN120: f32 = 0.866_025_4;
const SIN30: f32 = 0.5;
const TAN60: f32 = 1.732_050_8;
const HALF_TAN30: f32 = 0.288_675_13;
/// Degrees per motor revolution, inverted.
const FULL_TURN_INV: f32 = 1.0 / 360.0;
const DEG_RAD: f32 = core::f32::consts::PI / 180.0;
const RAD_DEG: f32 = 180.0 / core::f32::consts::PI;

pub const AXIS_X: usize = 0;
pub const AXIS_Y: usize = 1;
pub const AXIS_Z: usize = 2;

/// Rotary delta arm dimensions (mm) and the bicep angle the towers rest at
/// against the homing switches (degrees).
#[derive(Debug, Clone, Copy)]
pub struct DeltaParams {
    pub base_radius: f32,
    pub effector_radius: f32,
    pub bicep_length: f32,
    pub forearm_length: f32,
    pub bicep_homing_angle: f32,
}

/// Delta geometry with its precomputed work envelope. The reachable volume is
/// approximated by the largest centered cuboid whose corners all have a valid
/// inverse solution.
#[derive(Debug, Clone, Copy)]
pub struct DeltaGeometry {
    params: DeltaParams,
    steps_per_angle: [f32; 3],
    cuboid_xy: f32,
    cuboid_z_min: f32,
    cuboid_z_max: f32,
    z_home: f32,
}

impl DeltaGeometry {
    pub fn new(params: DeltaParams, settings: &Settings) -> Self {
        let mut geo = Self {
            params,
            steps_per_angle: [
                settings.step_per_mm[0] * FULL_TURN_INV,
                settings.step_per_mm[1] * FULL_TURN_INV,
                settings.step_per_mm[2] * FULL_TURN_INV,
            ],
            cuboid_xy: 0.0,
            cuboid_z_min: 0.0,
            cuboid_z_max: 0.0,
            z_home: 0.0,
        };
        geo.calc_bounds(settings);
        geo
    }

    fn home_angle_steps(&self) -> [i32; STEPPER_COUNT] {
        let mut steps = [0i32; STEPPER_COUNT];
        let angle = self.params.bicep_homing_angle;
        for i in 0..3 {
            steps[i] = libm::roundf(angle * self.steps_per_angle[i]) as i32;
        }
        steps
    }

    fn calc_bounds(&mut self, settings: &Settings) {
        let reach = self.params.effector_radius
            + self.params.base_radius
            + self.params.forearm_length
            + self.params.bicep_length;
        let mut minz = reach;
        let mut maxz = -reach;

        // sweep the towers together to find the vertical extents
        let sweep = libm::roundf(
            settings.step_per_mm[0]
                .max(settings.step_per_mm[1])
                .max(settings.step_per_mm[2]),
        ) as i32;
        let mut steps = [0i32; STEPPER_COUNT];
        for z in 0..sweep {
            steps[0] = z;
            steps[1] = z;
            steps[2] = z;
            if let Ok(axis) = self.forward(&steps) {
                minz = minz.min(axis[AXIS_Z]);
                maxz = maxz.max(axis[AXIS_Z]);
            }
        }
        minz = minz.max(maxz - settings.max_distance[AXIS_Z]);

        // grow a centered cuboid until a corner loses its inverse solution,
        // then halve the growth step
        let middlez = 0.5 * (maxz + minz);
        let original_dist = maxz - middlez;
        let mut dist = 0.5 * original_dist;
        let mut sum = 0.0f32;
        loop {
            sum += dist;
            let mut valid = true;
            for signs in [
                [1.0f32, 1.0, 1.0],
                [1.0, -1.0, 1.0],
                [-1.0, -1.0, 1.0],
                [-1.0, 1.0, 1.0],
                [1.0, 1.0, -1.0],
                [1.0, -1.0, -1.0],
                [-1.0, -1.0, -1.0],
                [-1.0, 1.0, -1.0],
            ] {
                let mut axis = [0.0f32; AXIS_COUNT];
                axis[AXIS_X] = signs[0] * sum;
                axis[AXIS_Y] = signs[1] * sum;
                axis[AXIS_Z] = middlez + signs[2] * sum;
                if self.inverse(&axis, settings).is_err() {
                    valid = false;
                    break;
                }
            }
            if valid {
                minz = middlez - sum;
            } else {
                sum -= dist;
                dist *= 0.5;
            }
            if original_dist <= sum || dist <= 0.1 {
                break;
            }
        }

        self.cuboid_xy = sum;
        self.cuboid_z_min = minz;
        self.cuboid_z_max = maxz;
        self.z_home = minz;
    }

    /// Solves one tower angle in its own YZ plane. The target is expressed in
    /// the tower frame; `Err` means the arms cannot reach it.
    fn calc_angle_yz(&self, x0: f32, y0: f32, z0: f32) -> Result<f32, Status> {
        let re = self.params.forearm_length;
        let rf = self.params.bicep_length;
        let y1 = -HALF_TAN30 * self.params.base_radius;
        let y0 = y0 - HALF_TAN30 * self.params.effector_radius;
        // the elbow lies on z = a + b*y
        let a = 0.5 * (x0 * x0 + y0 * y0 + z0 * z0 + rf * rf - re * re - y1 * y1) / z0;
        let b = (y1 - y0) / z0;
        let d = -(a + b * y1) * (a + b * y1) + rf * (b * b * rf + rf);
        if d < 0.0 {
            return Err(Status::OutOfReach);
        }
        // outer intersection point
        let yj = (y1 - a * b - libm::sqrtf(d)) / (b * b + 1.0);
        let zj = a + b * yj;
        Ok(RAD_DEG * libm::atan2f(-zj, y1 - yj))
    }

    fn inverse(
        &self,
        axis: &[f32; AXIS_COUNT],
        settings: &Settings,
    ) -> Result<[i32; STEPPER_COUNT], Status> {
        let mut steps = [0i32; STEPPER_COUNT];
        let x = axis[AXIS_X];
        let y = axis[AXIS_Y];
        let z = axis[AXIS_Z] + self.z_home;

        let theta1 = self.calc_angle_yz(x, y, z)?;
        let theta2 = self.calc_angle_yz(x * COS120 + y * SIN120, y * COS120 - x * SIN120, z)?;
        let theta3 = self.calc_angle_yz(x * COS120 - y * SIN120, y * COS120 + x * SIN120, z)?;

        steps[0] = libm::roundf(self.steps_per_angle[0] * theta1) as i32;
        steps[1] = libm::roundf(self.steps_per_angle[1] * theta2) as i32;
        steps[2] = libm::roundf(self.steps_per_angle[2] * theta3) as i32;
        for i in 3..AXIS_COUNT {
            steps[i] = libm::roundf(settings.step_per_mm[i] * axis[i]) as i32;
        }
        Ok(steps)
    }

    /// Three-sphere intersection of the forearm ends.
    fn forward(&self, steps: &[i32; STEPPER_COUNT]) -> Result<[f32; AXIS_COUNT], Status> {
        let rf = self.params.bicep_length;
        let re = self.params.forearm_length;
        let t = HALF_TAN30 * (self.params.base_radius - self.params.effector_radius);

        let theta1 = steps[0] as f32 * DEG_RAD / self.steps_per_angle[0];
        let theta2 = steps[1] as f32 * DEG_RAD / self.steps_per_angle[1];
        let theta3 = steps[2] as f32 * DEG_RAD / self.steps_per_angle[2];

        let y1 = -(t + rf * libm::cosf(theta1));
        let z1 = -rf * libm::sinf(theta1);

        let y2 = (t + rf * libm::cosf(theta2)) * SIN30;
        let x2 = y2 * TAN60;
        let z2 = -rf * libm::sinf(theta2);

        let y3 = (t + rf * libm::cosf(theta3)) * SIN30;
        let x3 = -y3 * TAN60;
        let z3 = -rf * libm::sinf(theta3);

        let dnm = (y2 - y1) * x3 - (y3 - y1) * x2;

        let w1 = y1 * y1 + z1 * z1;
        let w2 = x2 * x2 + y2 * y2 + z2 * z2;
        let w3 = x3 * x3 + y3 * y3 + z3 * z3;

        // x = (a1*z + b1)/dnm
        let a1 = (z2 - z1) * (y3 - y1) - (z3 - z1) * (y2 - y1);
        let b1 = -0.5 * ((w2 - w1) * (y3 - y1) - (w3 - w1) * (y2 - y1));
        // y = (a2*z + b2)/dnm
        let a2 = -(z2 - z1) * x3 + (z3 - z1) * x2;
        let b2 = 0.5 * ((w2 - w1) * x3 - (w3 - w1) * x2);

        // a*z^2 + b*z + c = 0
        let a = a1 * a1 + a2 * a2 + dnm * dnm;
        let b = 2.0 * (a1 * b1 + a2 * (b2 - y1 * dnm) - z1 * dnm * dnm);
        let c = (b2 - y1 * dnm) * (b2 - y1 * dnm) + b1 * b1 + dnm * dnm * (z1 * z1 - re * re);

        let d = b * b - 4.0 * a * c;
        if d < 0.0 {
            return Err(Status::OutOfReach);
        }

        let z0 = -0.5 * (b + libm::sqrtf(d)) / a;
        let mut axis = [0.0f32; AXIS_COUNT];
        axis[AXIS_X] = (a1 * z0 + b1) / dnm;
        axis[AXIS_Y] = (a2 * z0 + b2) / dnm;
        axis[AXIS_Z] = z0 - self.z_home;
        Ok(axis)
    }
}

pub enum Kinematics {
    Cartesian,
    CoreXy,
    Delta(DeltaGeometry),
}

impl Kinematics {
    /// Axis space to stepper space.
    pub fn apply_inverse(
        &self,
        settings: &Settings,
        axis: &[f32; AXIS_COUNT],
    ) -> Result<[i32; STEPPER_COUNT], Status> {
        match self {
            Kinematics::Cartesian => {
                let mut steps = [0i32; STEPPER_COUNT];
                for i in 0..AXIS_COUNT {
                    steps[i] = libm::roundf(settings.step_per_mm[i] * axis[i]) as i32;
                }
                Ok(steps)
            }
            Kinematics::CoreXy => {
                let mut steps = [0i32; STEPPER_COUNT];
                steps[0] =
                    libm::roundf(settings.step_per_mm[0] * (axis[AXIS_X] + axis[AXIS_Y])) as i32;
                steps[1] =
                    libm::roundf(settings.step_per_mm[1] * (axis[AXIS_X] - axis[AXIS_Y])) as i32;
                for i in 2..AXIS_COUNT {
                    steps[i] = libm::roundf(settings.step_per_mm[i] * axis[i]) as i32;
                }
                Ok(steps)
            }
            Kinematics::Delta(geo) => geo.inverse(axis, settings),
        }
    }

    /// Stepper space back to axis space.
    pub fn apply_forward(
        &self,
        settings: &Settings,
        steps: &[i32; STEPPER_COUNT],
    ) -> Result<[f32; AXIS_COUNT], Status> {
        match self {
            Kinematics::Cartesian => {
                let mut axis = [0.0f32; AXIS_COUNT];
                for i in 0..AXIS_COUNT {
                    axis[i] = steps[i] as f32 / settings.step_per_mm[i];
                }
                Ok(axis)
            }
            Kinematics::CoreXy => {
                let mut axis = [0.0f32; AXIS_COUNT];
                axis[AXIS_X] = 0.5 * (steps[0] + steps[1]) as f32 / settings.step_per_mm[0];
                axis[AXIS_Y] = 0.5 * (steps[0] - steps[1]) as f32 / settings.step_per_mm[1];
                for i in 2..AXIS_COUNT {
                    axis[i] = steps[i] as f32 / settings.step_per_mm[i];
                }
                Ok(axis)
            }
            Kinematics::Delta(geo) => geo.forward(steps),
        }
    }

    /// Skew compensation shear, cartesian frames only. Undone by
    /// [`Self::apply_reverse_transform`].
    pub fn apply_transform(&self, settings: &Settings, axis: &mut [f32; AXIS_COUNT]) {
        if let Kinematics::Cartesian = self {
            axis[AXIS_X] -= axis[AXIS_Y] * settings.skew_xy_factor;
            axis[AXIS_X] -= axis[AXIS_Z]
                * (settings.skew_xz_factor - settings.skew_xy_factor * settings.skew_yz_factor);
            axis[AXIS_Y] -= axis[AXIS_Z] * settings.skew_yz_factor;
        }
    }

    pub fn apply_reverse_transform(&self, settings: &Settings, axis: &mut [f32; AXIS_COUNT]) {
        if let Kinematics::Cartesian = self {
            axis[AXIS_X] += axis[AXIS_Y] * settings.skew_xy_factor;
            axis[AXIS_X] += axis[AXIS_Z] * settings.skew_xz_factor;
            axis[AXIS_Y] += axis[AXIS_Z] * settings.skew_yz_factor;
        }
    }

    /// Soft-limit check. Homing motions deliberately run outside the
    /// envelope, so the check passes while homing is active.
    pub fn check_boundaries(
        &self,
        settings: &Settings,
        axis: &mut [f32; AXIS_COUNT],
        homing: bool,
    ) -> bool {
        match self {
            Kinematics::Delta(geo) => {
                if !settings.soft_limits_enabled || homing {
                    if homing {
                        // clamp the homing seek to the reachable z range
                        if settings.homing_dir_invert_mask & (1 << AXIS_Z) != 0 {
                            axis[AXIS_Z] = axis[AXIS_Z].min(geo.cuboid_z_max);
                        } else {
                            axis[AXIS_Z] = axis[AXIS_Z].max(geo.cuboid_z_min);
                        }
                    }
                    return true;
                }

                let xy = geo.cuboid_xy;
                if axis[AXIS_X] < -xy || axis[AXIS_X] > xy {
                    return false;
                }
                if axis[AXIS_Y] < -xy || axis[AXIS_Y] > xy {
                    return false;
                }
                let z_min = geo.cuboid_z_min - geo.z_home;
                let z_max = geo.cuboid_z_max - geo.z_home;
                if axis[AXIS_Z] < z_min || axis[AXIS_Z] > z_max {
                    return false;
                }
                for i in 3..AXIS_COUNT {
                    if settings.max_distance[i] != 0.0
                        && (axis[i] < 0.0 || axis[i] > settings.max_distance[i])
                    {
                        return false;
                    }
                }
                true
            }
            _ => {
                if !settings.soft_limits_enabled || homing {
                    return true;
                }
                for i in 0..AXIS_COUNT {
                    if settings.max_distance[i] != 0.0
                        && (axis[i] < 0.0 || axis[i] > settings.max_distance[i])
                    {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Homing sequence: `(axis, limit mask)` pairs in the order the axes must
    /// be homed. The delta homes all three towers against their switches at
    /// once.
    pub fn homing_order(&self) -> &'static [(usize, u8)] {
        match self {
            Kinematics::Delta(_) => &[(AXIS_Z, 0b0000_0111), (3, 1 << 3), (4, 1 << 4), (5, 1 << 5)],
            _ => &[
                (AXIS_Z, 1 << AXIS_Z),
                (AXIS_X, 1 << AXIS_X),
                (AXIS_Y, 1 << AXIS_Y),
                (3, 1 << 3),
                (4, 1 << 4),
                (5, 1 << 5),
            ],
        }
    }

    /// Longest straight line the geometry tolerates before chord error
    /// matters. `None` means lines never need re-segmenting.
    pub fn motion_segment_len(&self) -> Option<f32> {
        match self {
            Kinematics::Delta(_) => Some(crate::config::DELTA_MOTION_SEGMENT_SIZE),
            _ => None,
        }
    }

    /// Position the machine must assume before homing starts. The delta
    /// cannot know its pose, so it pretends to be at the far end of travel.
    pub fn pre_home_position(&self, settings: &Settings) -> Option<[f32; AXIS_COUNT]> {
        match self {
            Kinematics::Delta(geo) => {
                let mut axis = [0.0f32; AXIS_COUNT];
                axis[AXIS_Z] = if settings.homing_dir_invert_mask & (1 << AXIS_Z) != 0 {
                    geo.cuboid_z_min
                } else {
                    geo.cuboid_z_max
                };
                Some(axis)
            }
            _ => None,
        }
    }

    /// Axis position at the moment every homing switch has triggered, when
    /// the geometry knows it from construction. The delta rests with all
    /// biceps at the homing angle.
    pub fn post_home_position(&self) -> Option<[f32; AXIS_COUNT]> {
        match self {
            Kinematics::Delta(geo) => geo.forward(&geo.home_angle_steps()).ok(),
            _ => None,
        }
    }

    /// Re-anchors the coordinate origin once homing completed.
    pub fn finish_home(&mut self) {
        if let Kinematics::Delta(geo) = self {
            geo.z_home = geo.cuboid_z_min;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn delta_settings() -> Settings {
        let mut settings = Settings::default();
        // steps per degree resolution of 10
        settings.step_per_mm = [3600.0; STEPPER_COUNT];
        settings.max_distance[AXIS_Z] = 100.0;
        settings
    }

    fn delta() -> DeltaGeometry {
        DeltaGeometry::new(
            DeltaParams {
                base_radius: 100.0,
                effector_radius: 30.0,
                bicep_length: 60.0,
                forearm_length: 140.0,
                bicep_homing_angle: -15.0,
            },
            &delta_settings(),
        )
    }

    #[test]
    fn cartesian_round_trips_through_steps() {
        let settings = Settings::default();
        let kin = Kinematics::Cartesian;
        let axis = [10.0, -3.5, 7.25, 0.0, 0.0, 0.0];
        let steps = kin.apply_inverse(&settings, &axis).unwrap();
        let back = kin.apply_forward(&settings, &steps).unwrap();
        for i in 0..AXIS_COUNT {
            assert_approx_eq!(f32, back[i], axis[i], epsilon = 0.01);
        }
    }

    #[test]
    fn corexy_mixes_x_and_y_motors() {
        let settings = Settings::default();
        let kin = Kinematics::CoreXy;

        // pure x move drives both motors the same way
        let steps = kin
            .apply_inverse(&settings, &[4.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(steps[0], steps[1]);
        assert_eq!(steps[0], 1000);

        // pure y move drives them in opposition
        let steps = kin
            .apply_inverse(&settings, &[0.0, 4.0, 0.0, 0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(steps[0], -steps[1]);

        let axis = [3.0, -2.0, 5.0, 0.0, 0.0, 0.0];
        let steps = kin.apply_inverse(&settings, &axis).unwrap();
        let back = kin.apply_forward(&settings, &steps).unwrap();
        for i in 0..3 {
            assert_approx_eq!(f32, back[i], axis[i], epsilon = 0.01);
        }
    }

    #[test]
    fn delta_center_uses_equal_tower_angles() {
        let settings = delta_settings();
        let kin = Kinematics::Delta(delta());
        let mut axis = [0.0f32; AXIS_COUNT];
        axis[AXIS_Z] = 20.0;
        let steps = kin.apply_inverse(&settings, &axis).unwrap();
        assert_eq!(steps[0], steps[1]);
        assert_eq!(steps[1], steps[2]);
    }

    #[test]
    fn delta_round_trips_inside_envelope() {
        let settings = delta_settings();
        let kin = Kinematics::Delta(delta());
        let mut axis = [0.0f32; AXIS_COUNT];
        axis[AXIS_X] = 8.0;
        axis[AXIS_Y] = -5.0;
        axis[AXIS_Z] = 30.0;
        let steps = kin.apply_inverse(&settings, &axis).unwrap();
        let back = kin.apply_forward(&settings, &steps).unwrap();
        for i in 0..3 {
            assert_approx_eq!(f32, back[i], axis[i], epsilon = 0.2);
        }
    }

    #[test]
    fn delta_rejects_unreachable_target() {
        let settings = delta_settings();
        let kin = Kinematics::Delta(delta());
        let mut axis = [0.0f32; AXIS_COUNT];
        axis[AXIS_X] = 1000.0;
        assert!(matches!(
            kin.apply_inverse(&settings, &axis),
            Err(Status::OutOfReach)
        ));
    }

    #[test]
    fn skew_transform_pair_is_inverse() {
        let mut settings = Settings::default();
        settings.skew_xy_factor = 0.01;
        settings.skew_yz_factor = 0.002;
        settings.skew_xz_factor = 0.005;
        let kin = Kinematics::Cartesian;
        let original = [12.0, 30.0, -4.0, 0.0, 0.0, 0.0];
        let mut axis = original;
        kin.apply_transform(&settings, &mut axis);
        kin.apply_reverse_transform(&settings, &mut axis);
        for i in 0..3 {
            assert_approx_eq!(f32, axis[i], original[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn soft_limits_reject_outside_envelope_unless_homing() {
        let mut settings = Settings::default();
        settings.soft_limits_enabled = true;
        let kin = Kinematics::Cartesian;
        let mut inside = [10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        let mut outside = [10.0, 300.0, 10.0, 0.0, 0.0, 0.0];
        let mut negative = [-1.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        assert!(kin.check_boundaries(&settings, &mut inside, false));
        assert!(!kin.check_boundaries(&settings, &mut outside, false));
        assert!(!kin.check_boundaries(&settings, &mut negative, false));
        // homing motions run past the envelope on purpose
        assert!(kin.check_boundaries(&settings, &mut outside, true));
    }

    #[test]
    fn homing_order_starts_with_z() {
        assert_eq!(Kinematics::Cartesian.homing_order()[0].0, AXIS_Z);
        let kin = Kinematics::Delta(delta());
        let (axis, mask) = kin.homing_order()[0];
        assert_eq!(axis, AXIS_Z);
        // all three towers share the first homing step
        assert_eq!(mask, 0b111);
    }
}
