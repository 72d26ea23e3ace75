use std::path::Path;

use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;

use crate::Result;

/// Side of the square BLIP vision input.
pub const IMAGE_SIZE: usize = 384;

// OpenAI CLIP normalisation, shared by the BLIP image processor.
const MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const STD: [f32; 3] = [0.26862954, 0.261_302_6, 0.275_777_1];

/// Opens and decodes an image, whatever its extension claims, as 8-bit RGB.
pub fn open_rgb<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(img.to_rgb8())
}

/// Resizes to `IMAGE_SIZE` squared (no crop), rescales to [0, 1] and
/// normalises per channel. Output shape is `(3, IMAGE_SIZE, IMAGE_SIZE)`.
pub fn image_to_tensor(img: &RgbImage, device: &Device) -> Result<Tensor> {
    let size = IMAGE_SIZE as u32;
    let img = image::imageops::resize(img, size, size, FilterType::CatmullRom);
    let data = img.into_raw();
    let data = Tensor::from_vec(data, (IMAGE_SIZE, IMAGE_SIZE, 3), &Device::Cpu)?
        .permute((2, 0, 1))?;
    let mean = Tensor::new(&MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&STD, &Device::Cpu)?.reshape((3, 1, 1))?;
    let data = (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(data.to_device(device)?)
}
