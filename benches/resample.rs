#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gigaview_engine::resample::{self, FilterType};
use image::{ImageBuffer, Rgba};

fn benchmark_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    group.sample_size(50);

    let img = ImageBuffer::from_fn(7680, 4320, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    });

    for res in [(3840, 2160), (1920, 1080), (1280, 720), (256, 144)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", res.0, res.1)),
            &res,
            |b, _s| {
                b.iter_custom(|iters| {
                    let mut total = Duration::from_secs(0);

                    for _i in 0..iters {
                        let start = Instant::now();
                        let _out =
                            resample::resize_par_linear(&img, res.0, res.1, FilterType::Lanczos3);
                        total += start.elapsed();
                    }
                    total
                })
            },
        );
    }
}

fn benchmark_resample_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample_nearest");
    group.sample_size(50);

    let img = ImageBuffer::from_fn(2048, 2048, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    });

    for res in [(4096, 4096), (512, 512)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", res.0, res.1)),
            &res,
            |b, _s| {
                b.iter_custom(|iters| {
                    let mut total = Duration::from_secs(0);

                    for _i in 0..iters {
                        let start = Instant::now();
                        let _out =
                            resample::resize_par_linear(&img, res.0, res.1, FilterType::Nearest);
                        total += start.elapsed();
                    }
                    total
                })
            },
        );
    }
}

criterion_group!(benches, benchmark_resample, benchmark_resample_nearest);
criterion_main!(benches);
