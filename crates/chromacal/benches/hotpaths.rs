use std::f64::consts::PI;

use chromacal::admm::{
    solve_admm, AdmmConfig, ImagingOperator, LinearOperator, Norm, Prior, PriorKind, SpectralWarp,
};
use chromacal::{
    fit_disks, fit_dispersion, fit_ellipse_direct, trace_spectrum, ColorWeights,
    DispersionFitConfig, DispersionSample, DiskFitConfig, LensSystem, Plane, RaySampling,
    TraceConfig,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn make_disk_image(width: usize, height: usize, pitch: f64, radius: f64) -> Plane {
    Plane::from_shape_fn((height, width), |(row, col)| {
        let (x, y) = (col as f64, row as f64);
        let cx = (x / pitch).floor() * pitch + pitch / 2.0;
        let cy = (y / pitch).floor() * pitch + pitch / 2.0;
        if (x - cx).hypot(y - cy) <= radius {
            0.9
        } else {
            0.1
        }
    })
}

fn make_ellipse_points(n: usize) -> Vec<[f64; 2]> {
    let (cx, cy, a, b, angle) = (320.0f64, 240.0f64, 21.0f64, 13.5f64, 0.4f64);
    let (sin_a, cos_a) = angle.sin_cos();
    let mut rng = StdRng::seed_from_u64(2024);
    (0..n)
        .map(|i| {
            let t = 2.0 * PI * i as f64 / n as f64;
            let (ex, ey) = (a * t.cos(), b * t.sin());
            [
                cx + cos_a * ex - sin_a * ey + rng.gen_range(-0.3..0.3),
                cy + sin_a * ex + cos_a * ey + rng.gen_range(-0.3..0.3),
            ]
        })
        .collect()
}

fn make_warp(width: usize, height: usize) -> SpectralWarp {
    let wavelengths = vec![450.0, 500.0, 550.0, 600.0, 650.0];
    let mut samples = Vec::new();
    for &wl in &wavelengths {
        let t = (wl - 550.0) / 100.0;
        for j in 0..6 {
            for i in 0..8 {
                let p = [20.0 + 40.0 * i as f64, 20.0 + 40.0 * j as f64];
                samples.push(DispersionSample {
                    reference: p,
                    wavelength_nm: wl,
                    observed: [
                        p[0] + 0.006 * t * (p[0] - width as f64 / 2.0),
                        p[1] + 0.006 * t * (p[1] - height as f64 / 2.0),
                    ],
                });
            }
        }
    }
    let config = DispersionFitConfig {
        spatial_degree: 2,
        ..DispersionFitConfig::default()
    };
    let (model, _) = fit_dispersion(&samples, [width, height], &config)
        .expect("deterministic fixture should always fit");
    SpectralWarp {
        model,
        wavelengths_nm: wavelengths,
    }
}

fn bench_raytrace(c: &mut Criterion) {
    let system = LensSystem::default();
    let config = TraceConfig {
        sampling: RaySampling::Grid { n: 61 },
        ..TraceConfig::default()
    };
    c.bench_function("trace_spectrum_61grid_3wl", |b| {
        b.iter(|| {
            let spots = trace_spectrum(black_box(&system), black_box(&config))
                .expect("default system traces");
            black_box(spots.len())
        })
    });
}

fn bench_disk_fit(c: &mut Criterion) {
    let img = make_disk_image(640, 480, 40.0, 12.0);
    let config = DiskFitConfig::default();
    c.bench_function("fit_disks_640x480_192", |b| {
        b.iter(|| {
            let disks = fit_disks(black_box(&img.view()), black_box(&config))
                .expect("fixture is finite");
            black_box(disks.len())
        })
    });
}

fn bench_ellipse_fit(c: &mut Criterion) {
    let points = make_ellipse_points(64);
    c.bench_function("ellipse_fit_64pts", |b| {
        b.iter(|| black_box(fit_ellipse_direct(black_box(&points))))
    });
}

fn bench_admm_patch(c: &mut Criterion) {
    let (h, w, bands) = (32usize, 32usize, 5usize);
    let warp = make_warp(320, 240);
    let weights = ColorWeights::from_matrix(ndarray::array![
        [0.05, 0.1, 0.2, 0.3, 0.35],
        [0.1, 0.3, 0.35, 0.2, 0.05],
        [0.35, 0.3, 0.2, 0.1, 0.05]
    ])
    .expect("finite weights");
    let operator = ImagingOperator::new(
        &weights,
        Some(chromacal::BayerPattern::Rggb),
        Some(&warp),
        [100, 140],
        [h, w],
    );
    let mut rng = StdRng::seed_from_u64(7);
    let truth: Vec<f64> = (0..operator.input_len())
        .map(|_| rng.gen_range(0.2..0.8))
        .collect();
    let mut observed = vec![0.0; operator.output_len()];
    operator.apply(&truth, &mut observed);
    let config = AdmmConfig {
        priors: vec![
            Prior::new(PriorKind::SpatialGradient, Norm::L1, 0.01),
            Prior::new(PriorKind::SpectralGradient, Norm::L2, 0.01),
        ],
        max_iters: 30,
        ..AdmmConfig::default()
    };

    c.bench_function("admm_patch_32x32x5_raw_30it", |b| {
        b.iter(|| {
            let result = solve_admm(
                black_box(&operator),
                black_box(&observed),
                [h, w, bands],
                black_box(&config),
                None,
            )
            .expect("consistent fixture");
            black_box(result.final_primal)
        })
    });

    c.bench_function("imaging_operator_apply_adjoint_32x32x5", |b| {
        let mut x = vec![0.0; operator.input_len()];
        b.iter(|| {
            operator.apply(black_box(&truth), &mut observed);
            operator.adjoint(black_box(&observed), &mut x);
            black_box(x[0])
        })
    });
}

criterion_group!(
    hotpaths,
    bench_raytrace,
    bench_disk_fit,
    bench_ellipse_fit,
    bench_admm_patch
);
criterion_main!(hotpaths);
