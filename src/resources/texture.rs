//! Texture decoding and upload

use image::GenericImageView;

use crate::backend::{GpuBackend, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage};
use crate::error::{RendererError, RendererResult};

const CHECKER_SIZE: u32 = 16;
const CHECKER_MAGENTA: [u8; 4] = [255, 0, 255, 255];
const CHECKER_BLACK: [u8; 4] = [0, 0, 0, 255];

/// Decoded RGBA8 pixels ready for upload
#[derive(Debug, Clone)]
pub struct TextureData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

impl TextureData {
    /// Decode an encoded image (PNG, JPEG, ...) from memory
    pub fn from_bytes(bytes: &[u8], name: &str) -> RendererResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| RendererError::AssetLoadFailure(format!("image '{name}': {e}")))?;
        let (width, height) = img.dimensions();
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data: img.to_rgba8().into_raw(),
        })
    }

    /// Wrap already decoded RGBA8 pixels, checking their length
    pub fn from_rgba8(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        name: &str,
    ) -> RendererResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RendererError::AssetLoadFailure(format!(
                "image '{name}' is {width}x{height} but carries {} bytes",
                pixels.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            data: pixels,
        })
    }

    /// Decode `bytes`, substituting the checkerboard if decoding fails.
    ///
    /// This is the one recovered failure in the renderer: the scene still
    /// loads and the broken image is plainly visible.
    pub fn decode_or_substitute(bytes: &[u8], name: &str) -> Self {
        match Self::from_bytes(bytes, name) {
            Ok(texture) => texture,
            Err(e) => {
                log::warn!("{e}; substituting checkerboard");
                Self::checkerboard().named(name)
            }
        }
    }

    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            name: name.to_string(),
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            data: color.to_vec(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255; 4], "white")
    }

    /// Magenta and black checkerboard marking a missing image
    pub fn checkerboard() -> Self {
        let data = (0..CHECKER_SIZE * CHECKER_SIZE)
            .flat_map(|i| {
                let (x, y) = (i % CHECKER_SIZE, i / CHECKER_SIZE);
                if (x + y) % 2 == 0 {
                    CHECKER_MAGENTA
                } else {
                    CHECKER_BLACK
                }
            })
            .collect();
        Self {
            name: "checkerboard".to_string(),
            width: CHECKER_SIZE,
            height: CHECKER_SIZE,
            format: TextureFormat::Rgba8Unorm,
            data,
        }
    }

    fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Create a sampled GPU texture holding these pixels
    pub fn upload<B: GpuBackend>(&self, backend: &mut B) -> RendererResult<TextureHandle> {
        let handle = backend.create_texture(
            &TextureDescriptor {
                label: Some(self.name.clone()),
                width: self.width,
                height: self.height,
                format: self.format,
                usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            },
            &self.data,
        )?;
        Ok(handle)
    }
}
