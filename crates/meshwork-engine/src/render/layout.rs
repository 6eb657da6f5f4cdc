//! Vertex record types and their static layout descriptors.
//!
//! A layout descriptor lists one entry per field of a vertex record, in the
//! order the shader expects its inputs. Entry `i` is wired to attribute slot
//! `i`, at the byte offset equal to the sum of the preceding entries' lengths.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::buffer::{AnyBuffer, GpuBuffer};

/// Scalar type of one attribute component.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NumericKind {
    Float32,
    Uint32,
    Sint32,
}

impl NumericKind {
    /// Size of one component in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            NumericKind::Float32 | NumericKind::Uint32 | NumericKind::Sint32 => 4,
        }
    }
}

/// One field of a vertex record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AttributeDescriptor {
    pub components: u32,
    pub kind: NumericKind,
    pub byte_len: usize,
}

impl AttributeDescriptor {
    pub const fn new(components: u32, kind: NumericKind) -> Self {
        Self {
            components,
            kind,
            byte_len: components as usize * kind.size(),
        }
    }

    pub const fn float32(components: u32) -> Self {
        Self::new(components, NumericKind::Float32)
    }

    pub const fn uint32(components: u32) -> Self {
        Self::new(components, NumericKind::Uint32)
    }
}

/// Sum of the attribute byte lengths of a layout.
pub const fn layout_size(layout: &[AttributeDescriptor]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < layout.len() {
        total += layout[i].byte_len;
        i += 1;
    }
    total
}

mod sealed {
    pub trait Sealed {}
}

/// A vertex record type that can live in a [`GpuBuffer`].
///
/// The set of vertex types is closed: each one has a variant in [`AnyBuffer`],
/// which is what lets a mesh hold buffers of different record types and still
/// hand out typed buffers through a checked accessor.
pub trait Vertex: Pod + Send + Sync + sealed::Sealed + 'static {
    /// Short name used in labels and diagnostics.
    const NAME: &'static str;

    /// Field layout, in shader input order.
    const LAYOUT: &'static [AttributeDescriptor];

    fn into_any(buffer: Arc<GpuBuffer<Self>>) -> AnyBuffer;

    fn from_any(buffer: &AnyBuffer) -> Option<&Arc<GpuBuffer<Self>>>;
}

/// Lit surface vertex: position, normal and RGBA color.
///
/// Slots: 0 = position, 1 = normal, 2 = color.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct ColoredVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

impl ColoredVertex {
    pub const fn new(position: [f32; 3], normal: [f32; 3], color: [f32; 4]) -> Self {
        Self {
            position,
            normal,
            color,
        }
    }
}

impl sealed::Sealed for ColoredVertex {}

impl Vertex for ColoredVertex {
    const NAME: &'static str = "colored";

    const LAYOUT: &'static [AttributeDescriptor] = &[
        AttributeDescriptor::float32(3), // position
        AttributeDescriptor::float32(3), // normal
        AttributeDescriptor::float32(4), // color
    ];

    fn into_any(buffer: Arc<GpuBuffer<Self>>) -> AnyBuffer {
        AnyBuffer::Colored(buffer)
    }

    fn from_any(buffer: &AnyBuffer) -> Option<&Arc<GpuBuffer<Self>>> {
        match buffer {
            AnyBuffer::Colored(b) => Some(b),
            _ => None,
        }
    }
}

/// Motion path vertex (tool paths, trajectories, point clouds).
///
/// Slots: 0 = position, 1 = travel direction, 2 = color, 3 = layer index.
/// Color stays on slot 2 so path shaders share the fixed color binding.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct PathVertex {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub color: [f32; 4],
    pub layer: u32,
}

impl PathVertex {
    pub const fn new(position: [f32; 3], direction: [f32; 3], color: [f32; 4], layer: u32) -> Self {
        Self {
            position,
            direction,
            color,
            layer,
        }
    }
}

impl sealed::Sealed for PathVertex {}

impl Vertex for PathVertex {
    const NAME: &'static str = "path";

    const LAYOUT: &'static [AttributeDescriptor] = &[
        AttributeDescriptor::float32(3), // position
        AttributeDescriptor::float32(3), // direction
        AttributeDescriptor::float32(4), // color
        AttributeDescriptor::uint32(1),  // layer
    ];

    fn into_any(buffer: Arc<GpuBuffer<Self>>) -> AnyBuffer {
        AnyBuffer::Path(buffer)
    }

    fn from_any(buffer: &AnyBuffer) -> Option<&Arc<GpuBuffer<Self>>> {
        match buffer {
            AnyBuffer::Path(b) => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_cover_whole_record() {
        assert_eq!(layout_size(ColoredVertex::LAYOUT), size_of::<ColoredVertex>());
        assert_eq!(layout_size(PathVertex::LAYOUT), size_of::<PathVertex>());
    }

    #[test]
    fn descriptor_lengths() {
        let d = AttributeDescriptor::float32(4);
        assert_eq!(d.byte_len, 16);
        assert_eq!(AttributeDescriptor::uint32(1).byte_len, 4);
    }

    #[test]
    fn color_is_third_field() {
        // Slot 2 is the fixed color binding for every vertex type.
        assert_eq!(ColoredVertex::LAYOUT[2], AttributeDescriptor::float32(4));
        assert_eq!(PathVertex::LAYOUT[2], AttributeDescriptor::float32(4));
    }
}
