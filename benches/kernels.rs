//! Kernel throughput suites
//!
//! Measures the launch path of each host backend directly, without the
//! harness's warm-up and reporting layers:
//! - Julia fractal frames at a few resolutions
//! - Naive vs blocked matmul on cpu and serial devices
//! - The f64 host reference used for verification

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kernel_contract_bench::backend::{
    BackendDescriptor, CpuDevice, Device, LaunchRange, SerialDevice, SERIAL_BACKEND,
};
use kernel_contract_bench::benches::fractal::julia_pixel;
use kernel_contract_bench::fixtures::{generate_inputs, GenerateConfig, InputPattern};
use kernel_contract_bench::verify::reference_matmul;

fn devices() -> Vec<(&'static str, Box<dyn Device>)> {
    let cpu = CpuDevice::new(BackendDescriptor::cpu(), None).expect("cpu pool");
    let serial = SerialDevice::new(BackendDescriptor::new(SERIAL_BACKEND, true));
    let cpu: Box<dyn Device> = Box::new(cpu);
    let serial: Box<dyn Device> = Box::new(serial);
    vec![("cpu", cpu), ("serial", serial)]
}

fn bench_fractal_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("fractal_frame");

    for (label, device) in devices() {
        for n in [64usize, 160, 320] {
            let range = LaunchRange::new(n, 2 * n);
            let mut out = device.upload(&vec![0.0; range.len()]).expect("upload");
            group.throughput(Throughput::Elements(range.len() as u64));
            group.bench_with_input(BenchmarkId::new(label, n), &n, |bencher, &n| {
                bencher.iter(|| {
                    device
                        .launch_2d(range, &mut out, &|row, col| julia_pixel(col, row, n, 0.3))
                        .expect("launch");
                    device.synchronize().expect("sync");
                })
            });
        }
    }

    group.finish();
}

fn bench_matmul_launch(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul_launch");
    group.sample_size(20);

    for (label, device) in devices() {
        for n in [64usize, 128, 256] {
            let pair = generate_inputs(&GenerateConfig {
                size: n,
                seed: 7,
                pattern: InputPattern::Random,
            });
            let a = device.upload(pair.a.as_slice()).expect("upload");
            let b = device.upload(pair.b.as_slice()).expect("upload");
            let mut out = device.upload(&vec![0.0; n * n]).expect("upload");
            let (a, b) = (a.as_slice(), b.as_slice());
            group.throughput(Throughput::Elements((2 * n * n * n) as u64));

            for (variant, tile) in [("naive", 1usize), ("blocked", 16)] {
                let range = LaunchRange::new(n, n).tiled(tile);
                group.bench_function(BenchmarkId::new(format!("{label}/{variant}"), n), |bencher| {
                    bencher.iter(|| {
                        device
                            .launch_2d(range, &mut out, &|i, j| {
                                let mut sum = 0.0f32;
                                for k in 0..n {
                                    sum += a[i * n + k] * b[k * n + j];
                                }
                                sum
                            })
                            .expect("launch");
                        device.synchronize().expect("sync");
                    })
                });
            }
        }
    }

    group.finish();
}

fn bench_reference(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul_reference");
    group.sample_size(10);

    for n in [32usize, 64, 128] {
        let pair = generate_inputs(&GenerateConfig {
            size: n,
            seed: 7,
            pattern: InputPattern::Random,
        });
        group.bench_with_input(BenchmarkId::from_parameter(n), &pair, |bencher, pair| {
            bencher.iter(|| reference_matmul(black_box(&pair.a), black_box(&pair.b)).expect("shapes"))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fractal_frame,
    bench_matmul_launch,
    bench_reference
);
criterion_main!(benches);
