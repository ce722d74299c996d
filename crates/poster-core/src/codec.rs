//! Photo decoding and poster encoding.

use crate::error::PipelineError;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use std::io::Cursor;

/// Decode an uploaded photo from memory, rotating it upright according to its
/// EXIF orientation.
pub fn decode_photo(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Encode a finished poster as PNG.
pub fn encode_png(poster: &RgbaImage) -> Result<Vec<u8>, PipelineError> {
    let mut out = Cursor::new(Vec::new());
    poster.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
