//! Warp fields between rendered poses.

use candle_core::{Device, Tensor};
use mimic_core::Result;
use mimic_render::{
    grid_sample, CorrespondenceMaps, MeshTopology, Renderer, SoftRasterizer, OUT_OF_FRAME,
};

const SIZE: usize = 32;

fn setup() -> Result<(SoftRasterizer, Tensor)> {
    let (topology, template) = MeshTopology::plane(6);
    let raster = SoftRasterizer::new(topology, SIZE)?;
    let flat: Vec<f32> = template.iter().flatten().copied().collect();
    let verts = Tensor::from_vec(flat, (1, template.len(), 3), &Device::Cpu)?;
    Ok((raster, verts))
}

fn textured_image() -> Result<Tensor> {
    let data: Vec<f32> = (0..3 * SIZE * SIZE)
        .map(|i| ((i * 37) % 101) as f32 / 50.0 - 1.0)
        .collect();
    Ok(Tensor::from_vec(data, (1, 3, SIZE, SIZE), &Device::Cpu)?)
}

#[test]
fn same_pose_warp_is_identity_on_body() -> Result<()> {
    let (raster, verts) = setup()?;
    let cam = Tensor::new(&[[1.2f32, 0.05, -0.1]], &Device::Cpu)?;
    let maps = CorrespondenceMaps::compute(&raster, &cam, &verts, false)?;

    let field = raster.warp_field(&maps.p2verts, &maps.fim, &maps.wim)?;
    assert_eq!(field.dims(), &[1, SIZE, SIZE, 2]);

    let image = textured_image()?;
    let warped = grid_sample(&image, &field)?;

    let body = maps.bg_channel()?.affine(-1.0, 1.0)?;
    let covered = body.sum_all()?.to_scalar::<f32>()?;
    assert!(covered > 0.0);

    let err = (warped - &image)?
        .broadcast_mul(&body)?
        .abs()?
        .max_all()?
        .to_scalar::<f32>()?;
    assert!(err < 1e-3, "max error on body pixels {err}");
    Ok(())
}

#[test]
fn background_pixels_sample_nothing() -> Result<()> {
    let (raster, verts) = setup()?;
    let cam = Tensor::new(&[[1.0f32, 0.0, 0.0]], &Device::Cpu)?;
    let maps = CorrespondenceMaps::compute(&raster, &cam, &verts, false)?;
    let field = raster.warp_field(&maps.p2verts, &maps.fim, &maps.wim)?;

    let corner = field.get(0)?.get(0)?.get(0)?.to_vec1::<f32>()?;
    assert_eq!(corner, vec![OUT_OF_FRAME as f32; 2]);

    let warped = grid_sample(&(textured_image()? + 2.0)?, &field)?;
    let bg = maps.bg_channel()?;
    let leaked = warped.broadcast_mul(&bg)?.abs()?.sum_all()?.to_scalar::<f32>()?;
    assert_eq!(leaked, 0.0);
    Ok(())
}

#[test]
fn translated_target_samples_shifted_source() -> Result<()> {
    let (raster, verts) = setup()?;
    let device = Device::Cpu;
    let src_cam = Tensor::new(&[[1.0f32, 0.0, 0.0]], &device)?;
    // 0.125 NDC = 2 pixels at 32 px
    let tgt_cam = Tensor::new(&[[1.0f32, 0.125, 0.0]], &device)?;
    let src = CorrespondenceMaps::compute(&raster, &src_cam, &verts, false)?;
    let tgt = CorrespondenceMaps::compute(&raster, &tgt_cam, &verts, false)?;

    let field = raster.warp_field(&src.p2verts, &tgt.fim, &tgt.wim)?;
    let image = textured_image()?;
    let warped = grid_sample(&image, &field)?.get(0)?.get(0)?.to_vec2::<f32>()?;
    let source = image.get(0)?.get(0)?.to_vec2::<f32>()?;
    let fim = tgt.fim.get(0)?.to_vec2::<i64>()?;
    for i in 0..SIZE {
        for j in 2..SIZE {
            if fim[i][j] >= 0 {
                assert!((warped[i][j] - source[i][j - 2]).abs() < 1e-3);
            }
        }
    }
    Ok(())
}
