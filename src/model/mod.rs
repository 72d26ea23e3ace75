pub mod blip;

pub use blip::{BlipCaptioner, LoadOptions, ModelKind};

use image::RgbImage;

use crate::Result;

/// Anything that can turn an RGB image into caption text.
///
/// Implementations own their preprocessing, generation and decoding. The
/// returned text is raw model output; callers trim it.
pub trait Captioner {
    fn caption(&mut self, image: &RgbImage) -> Result<String>;
}

impl<C: Captioner + ?Sized> Captioner for &mut C {
    fn caption(&mut self, image: &RgbImage) -> Result<String> {
        (**self).caption(image)
    }
}
