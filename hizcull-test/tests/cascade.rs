use glam::{Mat4, Vec3};
use hizcull::{
    managers::cascade::{cascade_states, fit_cascades, CascadeSettings},
    types::{CameraTransform, Handedness},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn settings(direction: Vec3) -> CascadeSettings {
    CascadeSettings {
        splits: vec![0.1, 8.0, 30.0, 100.0],
        resolution: 1024,
        direction,
        bias: 0.005,
    }
}

fn bits(matrix: Mat4) -> [u32; 16] {
    matrix.to_cols_array().map(f32::to_bits)
}

/// Fitting the same camera twice gives bit-identical matrices.
#[test]
fn fits_are_deterministic() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..32 {
        let position = Vec3::new(
            rng.gen_range(-500.0..500.0),
            rng.gen_range(0.0..50.0),
            rng.gen_range(-500.0..500.0),
        );
        let forward = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-0.5..0.5), rng.gen_range(-1.0..1.0));
        if forward.length_squared() < 0.01 {
            continue;
        }
        let transform = CameraTransform::looking_at(position, forward, Vec3::Y, 1.0, 0.1, 100.0, 16.0 / 9.0);
        let direction = Vec3::new(rng.gen_range(-1.0..1.0), -1.0, rng.gen_range(-1.0..1.0));
        let settings = settings(direction);

        for handedness in [Handedness::Left, Handedness::Right] {
            let first = fit_cascades(&transform, &settings, handedness);
            let second = fit_cascades(&transform, &settings, handedness);
            assert_eq!(first.len(), 3);
            for (a, b) in first.iter().zip(&second) {
                assert_eq!(bits(a.view_proj()), bits(b.view_proj()));
                assert_eq!(a.center.to_array().map(f32::to_bits), b.center.to_array().map(f32::to_bits));
            }
        }
    }
}

/// Every state points at its own layer and carries the light and bias.
#[test]
fn states_follow_fits() {
    let transform = CameraTransform::looking_at(Vec3::new(0.0, 2.0, 0.0), Vec3::Z, Vec3::Y, 1.0, 0.1, 100.0, 1.0);
    let settings = settings(Vec3::new(0.0, -2.0, 0.0));
    let fits = fit_cascades(&transform, &settings, Handedness::Left);
    let states = cascade_states(&fits, &settings);

    assert_eq!(states.len(), fits.len());
    for (layer, (state, fit)) in states.iter().zip(&fits).enumerate() {
        assert_eq!(state.layer, layer as u32);
        assert_eq!(state.view_proj, fit.view_proj());
        assert_eq!(state.direction_bias.to_array(), [0.0, -1.0, 0.0, 0.005]);
        // Every corner of the slice lands inside the shadow volume, give or
        // take the texel the center was snapped by.
        let slack = 2.0 / settings.resolution as f32;
        for corner in fit.corners {
            let clip = state.view_proj.project_point3(corner);
            assert!(clip.x.abs() <= 1.0 + slack && clip.y.abs() <= 1.0 + slack, "{clip:?}");
            assert!((-slack..=1.0 + slack).contains(&clip.z), "{clip:?}");
        }
    }
}
