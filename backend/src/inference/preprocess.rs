use image::imageops::FilterType;
use ndarray::Array4;

use crate::config::ImageConfig;

/// Decodes an uploaded image and turns it into a `[1, height, width, 3]` tensor scaled to [0, 1].
///
/// The image is stretched to the target grid regardless of aspect ratio. Grayscale and
/// alpha images are flattened to RGB first.
pub fn preprocess(image_data: &[u8], dims: &ImageConfig) -> Result<Array4<f32>, image::ImageError> {
    let img = image::load_from_memory(image_data)?;
    let resized = img
        .resize_exact(dims.width, dims.height, FilterType::CatmullRom)
        .to_rgb8();

    let tensor = Array4::from_shape_fn(
        (1, dims.height as usize, dims.width as usize, 3),
        |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    );
    Ok(tensor)
}
