use std::{path::PathBuf, time::Instant};

use anyhow::Context as _;
use clap::Parser;
use indicatif::ProgressBar;
use minibvh::{
    Accelerator as _, BruteForce, BuildParams, BuildStrategy, ObjMesh, TriangleBvh,
    bvh::traversal::TraversalStats,
    geometry::{Ray, WorldPoint, WorldVector},
};
use rand::{SeedableRng as _, rngs::SmallRng};
use rand_distr::{Distribution as _, UnitSphere};
use tracing_subscriber::EnvFilter;

const DEFAULT_RAY_COUNT: usize = 100_000;
/// Rays checked against brute force per strategy
const VERIFY_RAY_COUNT: usize = 1000;

#[derive(Parser)]
#[command(name = "minibvh-cli")]
#[command(about = "Builds BVHs of an OBJ model and traces random rays", long_about = None)]
struct Cli {
    /// Wavefront OBJ model
    model: PathBuf,

    /// Number of random rays traced per strategy
    #[arg(default_value_t = DEFAULT_RAY_COUNT)]
    ray_count: usize,

    /// Compare hits of the first rays against brute force, fail on mismatch
    #[arg(long)]
    verify: bool,

    /// Print the whole tree of each build
    #[arg(long)]
    print_tree: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let path = &cli.model;

    let obj = ObjMesh::load(path).with_context(|| format!("Loading {}", path.display()))?;
    let mesh = obj.mesh()?;
    println!(
        "Loaded {}: {} triangles, {} vertices",
        path.display(),
        mesh.triangle_count(),
        mesh.vertex_count()
    );

    let params = BuildParams::default();
    let rays = random_rays(&mesh.bounding_box(), cli.ray_count);
    let brute = BruteForce::new(mesh);

    for strategy in BuildStrategy::ALL {
        let bvh = TriangleBvh::build(mesh, strategy, &params)?;
        println!();
        bvh.print_statistics();
        if cli.print_tree {
            bvh.print_tree();
        }

        let bar = ProgressBar::new(rays.len() as u64);
        let mut stats = TraversalStats::default();
        let mut hits = 0usize;
        let start = Instant::now();
        for ray in &rays {
            if bvh.intersect_with_stats(ray, &mut stats).is_some() {
                hits += 1;
            }
            bar.inc(1);
        }
        let elapsed = start.elapsed();
        bar.finish_and_clear();

        let per_ray = |count: usize| count as f32 / rays.len().max(1) as f32;
        println!(
            "Traced {} rays in {:.2?} ({:.0} rays/s), {} hits",
            rays.len(),
            elapsed,
            rays.len() as f64 / elapsed.as_secs_f64(),
            hits
        );
        println!(
            "Per ray: {:.1} nodes, {:.1} leaves, {:.1} triangle tests",
            per_ray(stats.nodes_visited),
            per_ray(stats.leaves_visited),
            per_ray(stats.primitive_tests)
        );

        if cli.verify {
            let mismatches = rays
                .iter()
                .take(VERIFY_RAY_COUNT)
                .filter(|ray| {
                    bvh.intersect(ray).map(|hit| hit.t) != brute.intersect(ray).map(|hit| hit.t)
                        || bvh.occluded(ray) != brute.occluded(ray)
                })
                .count();
            println!("Brute force check: {} mismatches", mismatches);
            anyhow::ensure!(mismatches == 0, "{} disagrees with brute force", strategy);
        }
    }

    Ok(())
}

/// Rays from a sphere around the model towards random points inside its bounding box.
fn random_rays(bbox: &minibvh::geometry::WorldBox, count: usize) -> Vec<Ray> {
    if bbox.is_empty() {
        return Vec::new();
    }
    let mut rng = SmallRng::seed_from_u64(0);
    let center = bbox.center();
    let radius = bbox.size().norm().max(1e-3);
    (0..count)
        .map(|_| {
            let origin: [f32; 3] = UnitSphere.sample(&mut rng);
            let target: [f32; 3] = UnitSphere.sample(&mut rng);
            let origin = center + WorldVector::from(origin) * radius;
            let target: WorldPoint = center + WorldVector::from(target) * (radius * 0.25);
            Ray::new(origin, target - origin)
        })
        .collect()
}
