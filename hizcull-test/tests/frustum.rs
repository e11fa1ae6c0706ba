use glam::{Mat4, Vec3};
use hizcull::{
    managers::CameraManager,
    types::{Cluster, IndirectDispatchArgs, IndirectDrawArgs},
    CullingOptions, RendererMode,
};
use hizcull_test::{default_camera, no_gpu_return, perspective_camera, test_attr, TestRunner};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_clusters(seed: u64, count: usize) -> Vec<Cluster> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
                rng.gen_range(-30.0..30.0),
            );
            let extent = Vec3::new(rng.gen_range(0.05..2.0), rng.gen_range(0.05..2.0), rng.gen_range(0.05..2.0));
            Cluster::new(position, extent)
        })
        .collect()
}

fn frustum_options() -> CullingOptions {
    CullingOptions {
        occlusion: false,
        ..CullingOptions::default()
    }
}

async fn runner(mode: RendererMode, capacity: u32) -> anyhow::Result<TestRunner> {
    TestRunner::builder()
        .mode(mode)
        .capacity(capacity)
        .options(frustum_options())
        .build()
        .await
}

/// Clip-space half-spaces a point inside a perspective frustum satisfies:
/// left, right, bottom, top, near.
fn clip_half_spaces(view_proj: Mat4, point: Vec3) -> [f32; 5] {
    let clip = view_proj * point.extend(1.0);
    [clip.w + clip.x, clip.w - clip.x, clip.w + clip.y, clip.w - clip.y, clip.z]
}

/// A box is outside when all 8 corners fail the same half-space.
fn corners_outside(view_proj: Mat4, center: Vec3, extent: Vec3) -> bool {
    let corners: Vec<[f32; 5]> = (0..8)
        .map(|i| {
            let sign = Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { -1.0 } else { 1.0 },
            );
            clip_half_spaces(view_proj, center + extent * sign)
        })
        .collect();
    (0..5).any(|half_space| corners.iter().all(|corner| corner[half_space] < 0.0))
}

fn random_camera(rng: &mut StdRng) -> CameraManager {
    let eye = Vec3::new(
        rng.gen_range(-10.0..10.0),
        rng.gen_range(-10.0..10.0),
        rng.gen_range(-10.0..10.0),
    );
    // keep clear of the up axis
    let dir = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-0.5..0.5), rng.gen_range(-1.0..1.0));
    let dir = dir.try_normalize().unwrap_or(Vec3::Z);
    perspective_camera(eye, eye + dir * 10.0, Vec3::Y, rng.gen_range(30.0..100.0))
}

/// Boxes centered on the side and near planes of `camera`.
fn straddling_clusters(rng: &mut StdRng, camera: &CameraManager, count: usize) -> Vec<Cluster> {
    let inv_view_proj = camera.view_proj().inverse();
    (0..count)
        .map(|i| {
            let along = rng.gen_range(-1.0..1.0);
            let ndc = match i % 5 {
                0 => Vec3::new(-1.0, along, rng.gen_range(0.5..0.995)),
                1 => Vec3::new(1.0, along, rng.gen_range(0.5..0.995)),
                2 => Vec3::new(along, -1.0, rng.gen_range(0.5..0.995)),
                3 => Vec3::new(along, 1.0, rng.gen_range(0.5..0.995)),
                _ => Vec3::new(along, rng.gen_range(-1.0..1.0), 0.0),
            };
            let position = inv_view_proj.project_point3(ndc);
            let extent = Vec3::new(rng.gen_range(0.05..1.0), rng.gen_range(0.05..1.0), rng.gen_range(0.05..1.0));
            Cluster::new(position, extent)
        })
        .collect()
}

/// Runs seeded random cameras over random and plane straddling boxes, and
/// checks every box whose verdict survives growing or shrinking it by
/// `margin` lands where the corner test puts it.
async fn matches_corner_test(mut runner: TestRunner, margin: f32) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(0xF0_5EED);
    let mut ambiguous = 0;
    let mut total = 0;

    for round in 0..8 {
        let camera = random_camera(&mut rng);
        let view_proj = camera.view_proj();
        let mut clusters = random_clusters(rng.gen(), 700);
        clusters.extend(straddling_clusters(&mut rng, &camera, 300));

        runner.set_clusters(&clusters)?;
        let readback = runner.frame(&camera).await?;

        let mut kept = 0;
        let mut culled = 0;
        for (idx, cluster) in clusters.iter().enumerate() {
            let idx = idx as u32;
            let shrunk = (cluster.extent - margin).max(Vec3::ZERO);
            let grown = cluster.extent + margin;
            if corners_outside(view_proj, cluster.position, grown) {
                assert!(!readback.visible.contains(&idx), "round {round}: cluster {idx} should be culled");
                culled += 1;
            } else if !corners_outside(view_proj, cluster.position, shrunk) {
                assert!(readback.visible.contains(&idx), "round {round}: cluster {idx} should be visible");
                kept += 1;
            } else {
                ambiguous += 1;
            }
        }
        assert!(kept > 0 && culled > 0, "round {round} kept {kept}, culled {culled}");
        assert_eq!(readback.draw_args.instance_count, readback.visible.len() as u32);
        assert_eq!(readback.draw_args.vertex_count, IndirectDrawArgs::INITIAL.vertex_count);
        assert_eq!(readback.dispatch_args, IndirectDispatchArgs::INITIAL);

        // every slot is written at most once
        let mut deduped = readback.visible.clone();
        deduped.dedup();
        assert_eq!(deduped, readback.visible);
        total += clusters.len();
    }
    assert!(ambiguous * 100 < total, "{ambiguous} of {total} clusters within float error of a plane");

    Ok(())
}

#[test_attr]
pub async fn matches_corner_test_cpu() -> anyhow::Result<()> {
    matches_corner_test(runner(RendererMode::CpuPowered, 1000).await?, 1e-3).await
}

#[test_attr]
pub async fn matches_corner_test_gpu() -> anyhow::Result<()> {
    matches_corner_test(no_gpu_return!(runner(RendererMode::GpuPowered, 1000).await), 1e-2).await
}

/// Both backends produce the same buffers for a scene with no borderline clusters.
#[test_attr]
pub async fn gpu_agrees_with_cpu() -> anyhow::Result<()> {
    let camera = default_camera();
    let frustum = camera.frustum();
    let clusters: Vec<_> = (0..200)
        .map(|i| {
            let x = (i % 20) as f32 * 1.5 - 15.0;
            let z = (i / 20) as f32 * 4.0;
            Cluster::new(Vec3::new(x, 0.0, z), Vec3::splat(0.25))
        })
        .filter(|c| frustum.contains_box(c.position, Vec3::splat(0.2)) == frustum.contains_box(c.position, Vec3::splat(0.3)))
        .collect();
    let capacity = clusters.len() as u32;

    let mut gpu = no_gpu_return!(runner(RendererMode::GpuPowered, capacity).await);
    let mut cpu = runner(RendererMode::CpuPowered, capacity).await?;
    gpu.set_clusters(&clusters)?;
    cpu.set_clusters(&clusters)?;

    let gpu_readback = gpu.frame(&camera).await?;
    let cpu_readback = cpu.frame(&camera).await?;
    assert_eq!(gpu_readback, cpu_readback);

    Ok(())
}
