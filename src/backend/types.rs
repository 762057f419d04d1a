//! Common types shared between backends

use crate::backend::traits::{BindingLayoutHandle, BufferHandle, SamplerHandle, TextureHandle};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_DST: Self = Self(1 << 0);
    pub const SAMPLED: Self = Self(1 << 1);
    pub const STORAGE: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 3);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const INDEX: Self = Self(1 << 2);
    pub const UNIFORM: Self = Self(1 << 3);
    pub const STORAGE: Self = Self(1 << 4);
    pub const INDIRECT: Self = Self(1 << 5);
    pub const DEVICE_ADDRESS: Self = Self(1 << 6);
    /// Buffer holds raw resource descriptors (binding table)
    pub const RESOURCE_DESCRIPTORS: Self = Self(1 << 7);
    /// Buffer holds raw sampler descriptors (binding table)
    pub const SAMPLER_DESCRIPTORS: Self = Self(1 << 8);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, not CPU visible
    GpuOnly,
    /// CPU-visible, persistently mapped, readable by the GPU
    CpuToGpu,
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub location: MemoryLocation,
}

impl BufferDescriptor {
    /// CPU-visible upload source
    pub fn staging(label: &str, size: u64) -> Self {
        Self {
            label: Some(label.to_string()),
            size,
            usage: BufferUsage::COPY_SRC,
            location: MemoryLocation::CpuToGpu,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
        }
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const COMPUTE: Self = Self(1 << 2);
    pub const ALL: Self = Self((1 << 0) | (1 << 1) | (1 << 2));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Kind of resource a descriptor refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    UniformBuffer,
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
}

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::UniformBuffer => "uniform buffer",
            ResourceKind::Sampler => "sampler",
            ResourceKind::CombinedImageSampler => "combined image/sampler",
            ResourceKind::SampledImage => "sampled image",
            ResourceKind::StorageImage => "storage image",
        }
    }
}

/// One resource descriptor to be written into a binding-table slot.
///
/// `None` payloads are empty entries used to pad fixed-size arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDescriptor {
    UniformBuffer { address: u64, range: u64 },
    Sampler(Option<SamplerHandle>),
    CombinedImageSampler(Option<(TextureHandle, SamplerHandle)>),
    SampledImage(Option<TextureHandle>),
    StorageImage(Option<TextureHandle>),
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceDescriptor::UniformBuffer { .. } => ResourceKind::UniformBuffer,
            ResourceDescriptor::Sampler(_) => ResourceKind::Sampler,
            ResourceDescriptor::CombinedImageSampler(_) => ResourceKind::CombinedImageSampler,
            ResourceDescriptor::SampledImage(_) => ResourceKind::SampledImage,
            ResourceDescriptor::StorageImage(_) => ResourceKind::StorageImage,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(
            self,
            ResourceDescriptor::Sampler(None)
                | ResourceDescriptor::CombinedImageSampler(None)
                | ResourceDescriptor::SampledImage(None)
                | ResourceDescriptor::StorageImage(None)
        )
    }
}

/// Binding-table layout entry
#[derive(Debug, Clone)]
pub struct BindingLayoutEntry {
    pub binding: u32,
    pub kind: ResourceKind,
    /// Array length of the binding
    pub count: u32,
    pub visibility: ShaderStageFlags,
}

/// A binding-table buffer as seen by the command recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTableBinding {
    pub address: u64,
    pub usage: BufferUsage,
}

/// Pipeline access scope on one side of a buffer barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    TransferWrite,
    ComputeWrite,
    ComputeRead,
    IndirectRead,
    VertexShaderRead,
    /// Culling-kernel rewrites plus the indirect draw that consumes them
    ComputeWriteIndirectRead,
    /// Storage reads from both the culling kernel and the vertex stage
    ComputeVertexRead,
}

/// Buffer memory barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src: AccessScope,
    pub dst: AccessScope,
}

/// Compare function for depth testing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend component state
#[derive(Debug, Clone, Copy)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
        }
    }
}

/// Blend state (additive operation)
#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
        }
    }
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    /// SPIR-V words
    pub shader: Vec<u32>,
    pub entry_point: String,
    /// One layout per set, in set order
    pub binding_layouts: Vec<BindingLayoutHandle>,
}

/// Render pipeline descriptor. Vertices are pulled from storage buffers, so
/// there is no vertex input state.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub binding_layouts: Vec<BindingLayoutHandle>,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub cull_mode: CullMode,
    pub blend: Option<BlendState>,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
        }
    }
}

impl SamplerDescriptor {
    pub fn nearest() -> Self {
        Self {
            label: Some("nearest".into()),
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            ..Default::default()
        }
    }
}

/// Attachments for one dynamic rendering scope
#[derive(Debug, Clone, Copy)]
pub struct RenderTargets {
    pub color: TextureHandle,
    pub depth: Option<TextureHandle>,
    pub extent: Extent2D,
    /// `None` loads the previous contents
    pub clear_color: Option<[f32; 4]>,
}
