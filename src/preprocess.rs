use std::io::Cursor;

use image::DynamicImage;

use crate::error::IdentifyError;

/// 解码后的图像以及原始 EXIF 方向值（没有时为 None）
#[derive(Debug)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub orientation_tag: Option<u32>,
}

pub fn decode(bytes: &[u8]) -> Result<DecodedImage, IdentifyError> {
    let image = image::load_from_memory(bytes)?;
    Ok(DecodedImage {
        image,
        orientation_tag: read_orientation_tag(bytes),
    })
}

/// Reads the raw EXIF orientation tag (0x0112) from the primary image.
pub fn read_orientation_tag(bytes: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(bytes);
    let reader = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

/// EXIF orientation, named after where row 0 / column 0 of the stored pixels belong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    LeftMirrored,
    Right,
    RightMirrored,
    Left,
}

impl Orientation {
    pub fn from_exif(value: u32) -> Option<Self> {
        Some(match value {
            1 => Self::Up,
            2 => Self::UpMirrored,
            3 => Self::Down,
            4 => Self::DownMirrored,
            5 => Self::LeftMirrored,
            6 => Self::Right,
            7 => Self::RightMirrored,
            8 => Self::Left,
            _ => return None,
        })
    }

    /// 旋转/翻转像素使图像正向显示
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Self::Up => image,
            Self::UpMirrored => image.fliph(),
            Self::Down => image.rotate180(),
            Self::DownMirrored => image.flipv(),
            Self::LeftMirrored => image.rotate90().fliph(),
            Self::Right => image.rotate90(),
            Self::RightMirrored => image.rotate270().fliph(),
            Self::Left => image.rotate270(),
        }
    }
}

/// RGB8 pixels, upright, ready for the inference request.
#[derive(Debug, Clone)]
pub struct PixelBuffer(DynamicImage);

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn as_image(&self) -> &DynamicImage {
        &self.0
    }
}

/// Resolves the orientation and converts the decoded image into a pixel buffer.
pub fn normalize(decoded: DecodedImage, max_pixels: u64) -> Result<PixelBuffer, IdentifyError> {
    let orientation = match decoded.orientation_tag {
        Some(tag) => Orientation::from_exif(tag).ok_or(IdentifyError::Orientation(tag))?,
        None => Orientation::Up,
    };
    to_pixel_buffer(orientation.apply(decoded.image), max_pixels)
}

fn to_pixel_buffer(image: DynamicImage, max_pixels: u64) -> Result<PixelBuffer, IdentifyError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(IdentifyError::Conversion(format!(
            "image has no pixels ({width}x{height})"
        )));
    }
    let pixels = u64::from(width) * u64::from(height);
    if pixels > max_pixels {
        return Err(IdentifyError::Conversion(format!(
            "{width}x{height} exceeds the limit of {max_pixels} pixels"
        )));
    }
    Ok(PixelBuffer(DynamicImage::ImageRgb8(image.into_rgb8())))
}
