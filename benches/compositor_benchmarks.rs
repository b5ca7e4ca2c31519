use bgremove_studio::{
    compositor::{compose, Backdrop},
    write_archive, Color, ImageIOService,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgba, RgbaImage};
use zip::CompressionMethod;

/// Cutout with a soft-edged circular subject
fn portrait_cutout(size: u32) -> RgbaImage {
    let center = size as f32 / 2.0;
    let radius = size as f32 / 3.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let distance = ((x as f32 - center).powi(2) + (y as f32 - center).powi(2)).sqrt();
        let alpha = ((radius + 4.0 - distance) / 8.0).clamp(0.0, 1.0);
        Rgba([200, 150, 120, (alpha * 255.0) as u8])
    })
}

fn compose_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");
    let backdrop_image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1920, 1080, Rgba([40, 90, 160, 255])));

    for size in [256_u32, 1024] {
        let cutout = portrait_cutout(size);
        let backdrops = [
            ("transparent", Backdrop::Transparent),
            ("solid", Backdrop::Solid(Color::WHITE)),
            (
                "gradient",
                Backdrop::Gradient {
                    start: Color::rgb(102, 126, 234),
                    end: Color::rgb(118, 75, 162),
                },
            ),
            ("image", Backdrop::Image(backdrop_image.clone())),
        ];

        for (name, backdrop) in &backdrops {
            group.bench_with_input(BenchmarkId::new(*name, size), &cutout, |b, cutout| {
                b.iter(|| compose(black_box(cutout), black_box(backdrop)));
            });
        }
    }
    group.finish();
}

fn export_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    group.sample_size(20);

    let rendered = compose(&portrait_cutout(1024), &Backdrop::Solid(Color::WHITE));
    group.bench_function("encode_png_1024", |b| {
        b.iter(|| ImageIOService::encode_png(black_box(&rendered)));
    });

    let png = ImageIOService::encode_png(&rendered).expect("encode benchmark image");
    let files: Vec<(String, Vec<u8>)> = (0..10).map(|i| (format!("image-{i:04}.png"), png.clone())).collect();
    for (name, method) in [("stored", CompressionMethod::Stored), ("deflated", CompressionMethod::Deflated)] {
        group.bench_function(BenchmarkId::new("zip_10_files", name), |b| {
            b.iter(|| write_archive(black_box(&files), method));
        });
    }
    group.finish();
}

criterion_group!(benches, compose_benchmarks, export_benchmarks);
criterion_main!(benches);
