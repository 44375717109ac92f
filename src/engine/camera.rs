//! Per-eye camera matrices.
//!
//! Column-major `[[f32; 4]; 4]` (`m[column][row]`), OpenGL clip conventions:
//! right-handed view space looking down -Z, clip depth in [-1, 1].

use crate::engine::xr::{Fov, Pose};

pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Asymmetric perspective frustum from the four FOV half-angles.
pub fn projection_from_fov(fov: &Fov, near_z: f32, far_z: f32) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let width = tan_right - tan_left;
    let height = tan_up - tan_down;

    [
        [2.0 / width, 0.0, 0.0, 0.0],
        [0.0, 2.0 / height, 0.0, 0.0],
        [
            (tan_right + tan_left) / width,
            (tan_up + tan_down) / height,
            -(far_z + near_z) / (far_z - near_z),
            -1.0,
        ],
        [0.0, 0.0, -(far_z * (near_z + near_z)) / (far_z - near_z), 0.0],
    ]
}

/// Rotation from a unit quaternion (xyzw).
pub fn rotation_from_quat(q: [f32; 4]) -> Mat4 {
    let [x, y, z, w] = q;
    let (x2, y2, z2) = (x + x, y + y, z + z);
    let (xx, yy, zz) = (x * x2, y * y2, z * z2);
    let (xy, xz, yz) = (x * y2, x * z2, y * z2);
    let (wx, wy, wz) = (w * x2, w * y2, w * z2);

    [
        [1.0 - (yy + zz), xy + wz, xz - wy, 0.0],
        [xy - wz, 1.0 - (xx + zz), yz + wx, 0.0],
        [xz + wy, yz - wx, 1.0 - (xx + yy), 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// `translation * rotation`: local-to-reference transform of a pose.
pub fn pose_matrix(pose: &Pose) -> Mat4 {
    let mut m = rotation_from_quat(pose.orientation);
    m[3] = [pose.position[0], pose.position[1], pose.position[2], 1.0];
    m
}

/// Inverse of `pose_matrix`.
///
/// The pose is rigid, so the inverse is the transposed rotation with the
/// translation rotated back and negated.
pub fn view_from_pose(pose: &Pose) -> Mat4 {
    let m = pose_matrix(pose);
    let t = pose.position;

    let mut out = IDENTITY;
    for c in 0..3 {
        for r in 0..3 {
            out[c][r] = m[r][c];
        }
    }
    for r in 0..3 {
        out[3][r] = -(m[r][0] * t[0] + m[r][1] * t[1] + m[r][2] * t[2]);
    }
    out
}
