use bytemuck::{Pod, Zeroable};

/// Pixel formats understood by the pipe layer.
///
/// Only the formats that the frontends and the reference backend actually
/// exchange are listed; there is no attempt at a complete format table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Format {
    #[default]
    None,
    R8Unorm,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    R8G8B8A8Uint,
    R16Uint,
    R32Uint,
    R32Float,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    R32G32B32A32Uint,
    L8Unorm,
    I8Unorm,
    A8Unorm,
    Z16Unorm,
    Z32Float,
    Z24UnormS8Uint,
    Z24X8Unorm,
    Z32FloatS8X24Uint,
    S8Uint,
}

impl Format {
    pub const ALL: [Format; 23] = [
        Format::None,
        Format::R8Unorm,
        Format::R8G8Unorm,
        Format::R8G8B8A8Unorm,
        Format::R8G8B8A8Srgb,
        Format::B8G8R8A8Unorm,
        Format::R8G8B8A8Uint,
        Format::R16Uint,
        Format::R32Uint,
        Format::R32Float,
        Format::R32G32Float,
        Format::R32G32B32Float,
        Format::R32G32B32A32Float,
        Format::R32G32B32A32Uint,
        Format::L8Unorm,
        Format::I8Unorm,
        Format::A8Unorm,
        Format::Z16Unorm,
        Format::Z32Float,
        Format::Z24UnormS8Uint,
        Format::Z24X8Unorm,
        Format::Z32FloatS8X24Uint,
        Format::S8Uint,
    ];

    /// Dense index into per-format tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Size of one texel in bytes.
    pub const fn block_size(self) -> u32 {
        match self {
            Format::None => 0,
            Format::R8Unorm | Format::L8Unorm | Format::I8Unorm | Format::A8Unorm => 1,
            Format::S8Uint => 1,
            Format::R8G8Unorm | Format::R16Uint | Format::Z16Unorm => 2,
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8Srgb
            | Format::B8G8R8A8Unorm
            | Format::R8G8B8A8Uint
            | Format::R32Uint
            | Format::R32Float
            | Format::Z32Float
            | Format::Z24UnormS8Uint
            | Format::Z24X8Unorm => 4,
            Format::R32G32Float | Format::Z32FloatS8X24Uint => 8,
            Format::R32G32B32Float => 12,
            Format::R32G32B32A32Float | Format::R32G32B32A32Uint => 16,
        }
    }

    pub const fn has_depth(self) -> bool {
        matches!(
            self,
            Format::Z16Unorm
                | Format::Z32Float
                | Format::Z24UnormS8Uint
                | Format::Z24X8Unorm
                | Format::Z32FloatS8X24Uint
        )
    }

    pub const fn has_stencil(self) -> bool {
        matches!(
            self,
            Format::Z24UnormS8Uint | Format::Z32FloatS8X24Uint | Format::S8Uint
        )
    }

    pub const fn is_depth_or_stencil(self) -> bool {
        self.has_depth() || self.has_stencil()
    }

    /// Depth stored as a 32-bit float.
    pub const fn is_float_depth(self) -> bool {
        matches!(self, Format::Z32Float | Format::Z32FloatS8X24Uint)
    }

    pub const fn is_luminance(self) -> bool {
        matches!(self, Format::L8Unorm)
    }

    pub const fn is_intensity(self) -> bool {
        matches!(self, Format::I8Unorm)
    }

    pub const fn is_pure_integer(self) -> bool {
        matches!(
            self,
            Format::R8G8B8A8Uint | Format::R16Uint | Format::R32Uint | Format::R32G32B32A32Uint
        )
    }

    /// Encode a color clear value into one texel of this format.
    ///
    /// Depth/stencil formats are not handled here; see [`Format::pack_depth_stencil`].
    pub fn pack_color(self, color: &ColorUnion) -> Vec<u8> {
        let f = color.as_f32();
        let u = color.as_u32();
        let unorm8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            Format::R8Unorm | Format::L8Unorm | Format::I8Unorm => vec![unorm8(f[0])],
            Format::A8Unorm => vec![unorm8(f[3])],
            Format::R8G8Unorm => vec![unorm8(f[0]), unorm8(f[1])],
            Format::R8G8B8A8Unorm | Format::R8G8B8A8Srgb => f.iter().map(|&c| unorm8(c)).collect(),
            Format::B8G8R8A8Unorm => vec![unorm8(f[2]), unorm8(f[1]), unorm8(f[0]), unorm8(f[3])],
            Format::R8G8B8A8Uint => u.iter().map(|&c| c.min(u8::MAX as u32) as u8).collect(),
            Format::R16Uint => (u[0].min(u16::MAX as u32) as u16).to_le_bytes().to_vec(),
            Format::R32Uint | Format::R32Float => u[0].to_le_bytes().to_vec(),
            Format::R32G32Float => bytemuck::cast_slice(&u[..2]).to_vec(),
            Format::R32G32B32Float => bytemuck::cast_slice(&u[..3]).to_vec(),
            Format::R32G32B32A32Float | Format::R32G32B32A32Uint => {
                bytemuck::cast_slice(&u[..]).to_vec()
            }
            other => panic!("pack_color called with non-color format {other:?}"),
        }
    }

    /// Overwrite the depth and/or stencil portion of `texel` in place.
    pub fn pack_depth_stencil(
        self,
        texel: &mut [u8],
        depth: Option<f64>,
        stencil: Option<u8>,
    ) {
        match self {
            Format::Z16Unorm => {
                if let Some(d) = depth {
                    let v = (d.clamp(0.0, 1.0) * u16::MAX as f64).round() as u16;
                    texel[..2].copy_from_slice(&v.to_le_bytes());
                }
            }
            Format::Z32Float => {
                if let Some(d) = depth {
                    texel[..4].copy_from_slice(&(d as f32).to_le_bytes());
                }
            }
            Format::Z24UnormS8Uint | Format::Z24X8Unorm => {
                let mut v = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                if let Some(d) = depth {
                    let z = (d.clamp(0.0, 1.0) * 0xff_ffff as f64).round() as u32;
                    v = (v & 0xff00_0000) | z;
                }
                if let (Some(s), Format::Z24UnormS8Uint) = (stencil, self) {
                    v = (v & 0x00ff_ffff) | (u32::from(s) << 24);
                }
                texel[..4].copy_from_slice(&v.to_le_bytes());
            }
            Format::Z32FloatS8X24Uint => {
                if let Some(d) = depth {
                    texel[..4].copy_from_slice(&(d as f32).to_le_bytes());
                }
                if let Some(s) = stencil {
                    texel[4] = s;
                }
            }
            Format::S8Uint => {
                if let Some(s) = stencil {
                    texel[0] = s;
                }
            }
            other => panic!("pack_depth_stencil called with color format {other:?}"),
        }
    }
}

/// Texture dimensionality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    #[default]
    Buffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    TextureRect,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

impl TextureTarget {
    /// True 3D layout, as opposed to a stack of 2D layers.
    pub const fn is_layout_3d(self) -> bool {
        matches!(self, TextureTarget::Texture3D)
    }

    pub const fn is_array(self) -> bool {
        matches!(
            self,
            TextureTarget::Texture1DArray
                | TextureTarget::Texture2DArray
                | TextureTarget::TextureCube
                | TextureTarget::TextureCubeArray
        )
    }
}

/// A color clear value, stored as raw bits so that float, signed and unsigned
/// interpretations compare bit-for-bit.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ColorUnion {
    pub bits: [u32; 4],
}

impl ColorUnion {
    pub fn from_f32(c: [f32; 4]) -> Self {
        Self {
            bits: c.map(f32::to_bits),
        }
    }

    pub const fn from_u32(c: [u32; 4]) -> Self {
        Self { bits: c }
    }

    pub fn from_i32(c: [i32; 4]) -> Self {
        Self {
            bits: c.map(|v| v as u32),
        }
    }

    pub fn as_f32(&self) -> [f32; 4] {
        self.bits.map(f32::from_bits)
    }

    pub const fn as_u32(&self) -> [u32; 4] {
        self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_table_is_dense() {
        for (i, f) in Format::ALL.iter().enumerate() {
            assert_eq!(f.index(), i, "{f:?}");
        }
    }

    #[test]
    fn pack_color_swizzles_bgra() {
        let c = ColorUnion::from_f32([1.0, 0.0, 0.5, 1.0]);
        assert_eq!(Format::R8G8B8A8Unorm.pack_color(&c), vec![255, 0, 128, 255]);
        assert_eq!(Format::B8G8R8A8Unorm.pack_color(&c), vec![128, 0, 255, 255]);
    }

    #[test]
    fn pack_depth_stencil_respects_components() {
        let mut texel = [0u8; 4];
        Format::Z24UnormS8Uint.pack_depth_stencil(&mut texel, None, Some(0x7f));
        assert_eq!(u32::from_le_bytes(texel), 0x7f00_0000);
        Format::Z24UnormS8Uint.pack_depth_stencil(&mut texel, Some(1.0), None);
        assert_eq!(u32::from_le_bytes(texel), 0x7fff_ffff);
    }
}
