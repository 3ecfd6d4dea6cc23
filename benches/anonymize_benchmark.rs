//! Detection and blur benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use facemask::anonymize::blur::blur_region;
use facemask::anonymize::cascade::Cascade;
use facemask::anonymize::detect::{detect_multi_scale, grayscale};
use facemask::anonymize::integral::IntegralImage;
use facemask::anonymize::Region;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

const CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stages>
    <_>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 0.5</internalNodes>
          <leafValues>-1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 8 8 1.</_>
        <_>2 2 4 4 -4.</_></rects></_></features></cascade>
</opencv_storage>
"#;

fn scene(size: u32) -> RgbImage {
    let (lo, hi) = (size * 3 / 8, size * 5 / 8);
    RgbImage::from_fn(size, size, |x, y| {
        if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
            Rgb([20, 20, 20])
        } else {
            Rgb([230, 230, 230])
        }
    })
}

fn benchmark_integral_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("integral_image");

    for size in [256u32, 512, 1024] {
        let gray = GrayImage::from_fn(size, size, |x, y| Luma([((x ^ y) & 0xff) as u8]));
        group.throughput(Throughput::Elements(u64::from(size * size)));
        group.bench_with_input(BenchmarkId::new("upright", size), &gray, |b, gray| {
            b.iter(|| IntegralImage::new(black_box(gray), false));
        });
        group.bench_with_input(BenchmarkId::new("with_tilted", size), &gray, |b, gray| {
            b.iter(|| IntegralImage::new(black_box(gray), true));
        });
    }

    group.finish();
}

fn benchmark_detection(c: &mut Criterion) {
    let cascade = match Cascade::from_xml(CASCADE) {
        Ok(cascade) => cascade,
        Err(e) => panic!("benchmark cascade: {e}"),
    };
    let mut group = c.benchmark_group("detect_multi_scale");
    group.sample_size(20);

    for size in [128u32, 320, 640] {
        let gray = grayscale(&DynamicImage::ImageRgb8(scene(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &gray, |b, gray| {
            b.iter(|| detect_multi_scale(&cascade, black_box(gray)));
        });
    }

    group.finish();
}

fn benchmark_blur(c: &mut Criterion) {
    let mut group = c.benchmark_group("blur_region");
    group.sample_size(20);

    for side in [64u32, 128, 256] {
        let img = DynamicImage::ImageRgb8(scene(side * 2));
        let region = Region {
            x: side / 2,
            y: side / 2,
            width: side,
            height: side,
        };
        group.throughput(Throughput::Elements(u64::from(side * side)));
        group.bench_with_input(BenchmarkId::from_parameter(side), &region, |b, &region| {
            b.iter_batched(
                || img.clone(),
                |mut img| blur_region(&mut img, black_box(region)),
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_integral_image,
    benchmark_detection,
    benchmark_blur
);
criterion_main!(benches);
