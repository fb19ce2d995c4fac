use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mimic_render::{barycentric_transform, grid_sample, CorrespondenceMaps, MeshTopology, SoftRasterizer};

fn bench_warp(c: &mut Criterion) {
    let device = Device::Cpu;
    let (topology, template) = MeshTopology::plane(24);
    let raster = SoftRasterizer::new(topology, 256).unwrap();
    let flat: Vec<f32> = template.iter().flatten().copied().collect();
    let verts = Tensor::from_vec(flat, (1, template.len(), 3), &device).unwrap();
    let src_cam = Tensor::new(&[[1.0f32, 0.0, 0.0]], &device).unwrap();
    let tgt_cam = Tensor::new(&[[1.1f32, 0.05, -0.05]], &device).unwrap();

    let src = CorrespondenceMaps::compute(&raster, &src_cam, &verts, false).unwrap();
    let tgt = CorrespondenceMaps::compute(&raster, &tgt_cam, &verts, false).unwrap();
    let image = Tensor::rand(-1f32, 1.0, (1, 3, 256, 256), &device).unwrap();

    c.bench_function("barycentric_transform_256", |b| {
        b.iter(|| barycentric_transform(black_box(&src.p2verts), &tgt.fim, &tgt.wim).unwrap())
    });

    let field = barycentric_transform(&src.p2verts, &tgt.fim, &tgt.wim).unwrap();
    c.bench_function("grid_sample_256", |b| {
        b.iter(|| grid_sample(black_box(&image), &field).unwrap())
    });
}

criterion_group!(benches, bench_warp);
criterion_main!(benches);
