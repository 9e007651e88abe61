//! Descriptor layouts, sets and their GPU-visible encoding.
//!
//! A set's backing store is a plain buffer resource holding one
//! [`Descriptor`] per array element; shaders read it as constant buffer
//! `1 + set`.

use std::fmt;
use std::sync::{Arc, Mutex};

use aero_pipe::state::ShaderStages;
use aero_pipe::{Resource, Screen};
use bytemuck::{Pod, Zeroable};

use crate::cmd::{PipelineBindPoint, WHOLE_SIZE};
use crate::objects::{Buffer, ImageView, Sampler};

pub const MAX_SETS: usize = 8;

/// Size in bytes of one encoded [`Descriptor`].
pub const DESCRIPTOR_SIZE: u64 = std::mem::size_of::<Descriptor>() as u64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Descriptor {
    pub address: u64,
    pub range: u32,
    pub image: u32,
    pub sampler_index: u32,
    pub reserved: u32,
    pub sampler: [u32; 4],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    pub state: [u32; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
}

impl DescriptorType {
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic
        )
    }

    pub fn has_sampler(self) -> bool {
        matches!(
            self,
            DescriptorType::Sampler | DescriptorType::CombinedImageSampler
        )
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
    pub immutable_samplers: Vec<Arc<Sampler>>,
}

#[derive(Clone, Debug)]
pub struct BindingLayout {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
    /// First element of this binding in the set's descriptor array.
    pub descriptor_index: u32,
    /// First dynamic-offset slot, for dynamic buffer bindings.
    pub dynamic_index: Option<u32>,
    pub immutable_samplers: Vec<Arc<Sampler>>,
}

pub struct DescriptorSetLayout {
    pub bindings: Vec<BindingLayout>,
    pub descriptor_count: u32,
    pub dynamic_offset_count: u32,
    pub shader_stages: ShaderStages,
    /// Backing store holding only the immutable samplers, for descriptor
    /// buffer mode.
    pub immutable_bo: Option<Arc<Resource>>,
}

impl DescriptorSetLayout {
    pub fn new(screen: &Screen, mut bindings: Vec<DescriptorSetLayoutBinding>) -> Arc<Self> {
        bindings.sort_by_key(|b| b.binding);
        let mut descriptor_index = 0;
        let mut dynamic_count = 0;
        let mut shader_stages = ShaderStages::empty();
        let mut laid_out = Vec::with_capacity(bindings.len());
        for b in bindings {
            let dynamic_index = b.ty.is_dynamic().then(|| {
                let idx = dynamic_count;
                dynamic_count += b.count;
                idx
            });
            shader_stages |= b.stages;
            laid_out.push(BindingLayout {
                binding: b.binding,
                ty: b.ty,
                count: b.count,
                stages: b.stages,
                descriptor_index,
                dynamic_index,
                immutable_samplers: b.immutable_samplers,
            });
            descriptor_index += b.count;
        }

        let mut layout = Self {
            bindings: laid_out,
            descriptor_count: descriptor_index,
            dynamic_offset_count: dynamic_count,
            shader_stages,
            immutable_bo: None,
        };
        if layout.has_immutable_samplers() {
            let bo = screen.buffer_create(layout.bo_size());
            for (index, desc) in layout.immutable_sampler_descriptors() {
                write_descriptor(&bo, index, &desc);
            }
            layout.immutable_bo = Some(bo);
        }
        Arc::new(layout)
    }

    pub fn binding(&self, binding: u32) -> Option<&BindingLayout> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn has_immutable_samplers(&self) -> bool {
        self.bindings.iter().any(|b| !b.immutable_samplers.is_empty())
    }

    /// Backing store size; never zero so the set can always be bound.
    pub fn bo_size(&self) -> u32 {
        (u64::from(self.descriptor_count.max(1)) * DESCRIPTOR_SIZE) as u32
    }

    /// Encoded immutable samplers with their descriptor indices.
    pub fn immutable_sampler_descriptors(&self) -> Vec<(u32, Descriptor)> {
        self.bindings
            .iter()
            .flat_map(|b| {
                b.immutable_samplers
                    .iter()
                    .enumerate()
                    .map(move |(i, s)| (b.descriptor_index + i as u32, sampler_descriptor(s)))
            })
            .collect()
    }
}

impl fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("bindings", &self.bindings.len())
            .field("descriptor_count", &self.descriptor_count)
            .field("dynamic_offset_count", &self.dynamic_offset_count)
            .field("shader_stages", &self.shader_stages)
            .finish()
    }
}

/// Whether two set layouts produce the same descriptor encoding. Absent
/// layouts only equal each other.
pub fn descriptor_layouts_equal(
    a: Option<&DescriptorSetLayout>,
    b: Option<&DescriptorSetLayout>,
) -> bool {
    let (a, b) = match (a, b) {
        (None, None) => return true,
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if std::ptr::eq(a, b) {
        return true;
    }
    a.descriptor_count == b.descriptor_count
        && a.dynamic_offset_count == b.dynamic_offset_count
        && a.shader_stages == b.shader_stages
        && a.bindings.len() == b.bindings.len()
        && a.bindings.iter().zip(&b.bindings).all(|(x, y)| {
            x.binding == y.binding
                && x.ty == y.ty
                && x.count == y.count
                && x.stages == y.stages
                && x.immutable_samplers.len() == y.immutable_samplers.len()
                && x
                    .immutable_samplers
                    .iter()
                    .zip(&y.immutable_samplers)
                    .all(|(s, t)| s.desc == t.desc)
        })
}

#[derive(Clone, Debug)]
pub enum DescriptorData {
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        range: u64,
    },
    Image {
        view: Arc<ImageView>,
        sampler: Option<Arc<Sampler>>,
    },
    Sampler(Arc<Sampler>),
    Null,
}

#[derive(Clone, Debug)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub data: Vec<DescriptorData>,
}

#[derive(Clone, Copy, Debug)]
pub struct TemplateEntry {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
    /// Index of the first element in the template data.
    pub offset: u32,
    pub stride: u32,
}

#[derive(Clone, Debug)]
pub struct DescriptorUpdateTemplate {
    pub bind_point: PipelineBindPoint,
    pub entries: Vec<TemplateEntry>,
}

impl DescriptorUpdateTemplate {
    /// Expand template data into explicit writes.
    pub fn writes(&self, data: &[DescriptorData]) -> Vec<DescriptorWrite> {
        self.entries
            .iter()
            .map(|e| DescriptorWrite {
                binding: e.binding,
                array_element: e.array_element,
                data: (0..e.count)
                    .map(|j| {
                        data.get((e.offset + j * e.stride) as usize)
                            .cloned()
                            .unwrap_or(DescriptorData::Null)
                    })
                    .collect(),
            })
            .collect()
    }
}

fn sampler_descriptor(sampler: &Sampler) -> Descriptor {
    Descriptor {
        sampler_index: sampler.id,
        sampler: sampler.desc.state,
        ..Descriptor::default()
    }
}

fn write_descriptor(bo: &Resource, index: u32, desc: &Descriptor) -> bool {
    bo.write(u64::from(index) * DESCRIPTOR_SIZE, bytemuck::bytes_of(desc))
}

pub fn read_descriptor(bo: &Resource, offset: u64, index: u32) -> Option<Descriptor> {
    let bytes = bo.read(offset + u64::from(index) * DESCRIPTOR_SIZE, DESCRIPTOR_SIZE)?;
    Some(bytemuck::pod_read_unaligned(&bytes))
}

/// Patch the sampler half of every immutable-sampler descriptor of
/// `layout` in a descriptor buffer whose set starts at `offset`.
pub fn write_immutable_samplers(bo: &Resource, offset: u64, layout: &DescriptorSetLayout) {
    for (index, sampler) in layout.immutable_sampler_descriptors() {
        let at = offset + u64::from(index) * DESCRIPTOR_SIZE;
        let Some(mut desc) = read_descriptor(bo, offset, index) else {
            continue;
        };
        desc.sampler_index = sampler.sampler_index;
        desc.sampler = sampler.sampler;
        bo.write(at, bytemuck::bytes_of(&desc));
    }
}

/// A descriptor set: an encoded backing store plus the objects it
/// references, kept alive for as long as the set is.
pub struct DescriptorSet {
    pub id: u32,
    pub layout: Arc<DescriptorSetLayout>,
    pub bo: Arc<Resource>,
    held: Mutex<Vec<DescriptorData>>,
}

impl DescriptorSet {
    pub fn new(screen: &Screen, layout: &Arc<DescriptorSetLayout>) -> Arc<Self> {
        let bo = screen.buffer_create(layout.bo_size());
        for (index, desc) in layout.immutable_sampler_descriptors() {
            write_descriptor(&bo, index, &desc);
        }
        Arc::new(Self {
            id: screen.alloc_id(),
            layout: layout.clone(),
            bo,
            held: Mutex::new(vec![DescriptorData::Null; layout.descriptor_count as usize]),
        })
    }

    /// Wrap an existing backing store without copying it.
    pub fn from_bo(screen: &Screen, layout: &Arc<DescriptorSetLayout>, bo: Arc<Resource>) -> Arc<Self> {
        Arc::new(Self {
            id: screen.alloc_id(),
            layout: layout.clone(),
            bo,
            held: Mutex::new(Vec::new()),
        })
    }

    /// Copy descriptors (and their references) from `src`, up to the smaller
    /// of the two sets.
    pub fn copy_from(&self, src: &DescriptorSet) {
        let len = self.bo.size().min(src.bo.size());
        if let Some(bytes) = src.bo.read(0, len) {
            self.bo.write(0, &bytes);
        }
        let src_held = src.lock_held().clone();
        let mut held = self.lock_held();
        for (dst, src) in held.iter_mut().zip(src_held) {
            *dst = src;
        }
    }

    pub fn write(&self, write: &DescriptorWrite) {
        let Some(binding) = self.layout.binding(write.binding) else {
            tracing::warn!(binding = write.binding, "descriptor write to unknown binding");
            return;
        };
        let mut held = self.lock_held();
        for (j, data) in write.data.iter().enumerate() {
            let element = write.array_element + j as u32;
            if element >= binding.count {
                break;
            }
            let index = binding.descriptor_index + element;
            let immutable = binding.immutable_samplers.get(element as usize);
            let desc = encode(binding.ty, data, immutable);
            write_descriptor(&self.bo, index, &desc);
            if let Some(slot) = held.get_mut(index as usize) {
                *slot = data.clone();
            }
        }
    }

    /// Add `offsets` to the addresses of the dynamic buffer descriptors.
    /// Returns `false` if there were fewer offsets than dynamic descriptors.
    pub fn apply_dynamic_offsets(&self, offsets: &[u32]) -> bool {
        for binding in &self.layout.bindings {
            let Some(dynamic_index) = binding.dynamic_index else {
                continue;
            };
            for j in 0..binding.count {
                let Some(&offset) = offsets.get((dynamic_index + j) as usize) else {
                    return false;
                };
                let index = binding.descriptor_index + j;
                let Some(mut desc) = read_descriptor(&self.bo, 0, index) else {
                    continue;
                };
                desc.address += u64::from(offset);
                write_descriptor(&self.bo, index, &desc);
            }
        }
        true
    }

    pub fn descriptor(&self, index: u32) -> Option<Descriptor> {
        read_descriptor(&self.bo, 0, index)
    }

    fn lock_held(&self) -> std::sync::MutexGuard<'_, Vec<DescriptorData>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("id", &self.id)
            .field("bo", &self.bo.id())
            .field("layout", &self.layout)
            .finish()
    }
}

fn encode(ty: DescriptorType, data: &DescriptorData, immutable: Option<&Arc<Sampler>>) -> Descriptor {
    let mut desc = match data {
        DescriptorData::Buffer {
            buffer,
            offset,
            range,
        } => {
            let range = if *range == WHOLE_SIZE {
                buffer.size.saturating_sub(*offset)
            } else {
                *range
            };
            Descriptor {
                address: buffer.address + offset,
                range: u32::try_from(range).unwrap_or(u32::MAX),
                ..Descriptor::default()
            }
        }
        DescriptorData::Image { view, sampler } => {
            let mut desc = sampler.as_deref().map(sampler_descriptor).unwrap_or_default();
            desc.image = view.id;
            desc
        }
        DescriptorData::Sampler(sampler) => sampler_descriptor(sampler),
        DescriptorData::Null => Descriptor::default(),
    };
    if ty.has_sampler() {
        if let Some(sampler) = immutable {
            let s = sampler_descriptor(sampler);
            desc.sampler_index = s.sampler_index;
            desc.sampler = s.sampler;
        }
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Device;

    fn ubo_layout(screen: &Screen, ty: DescriptorType, count: u32) -> Arc<DescriptorSetLayout> {
        DescriptorSetLayout::new(
            screen,
            vec![DescriptorSetLayoutBinding {
                binding: 0,
                ty,
                count,
                stages: ShaderStages::VERTEX,
                immutable_samplers: Vec::new(),
            }],
        )
    }

    #[test]
    fn descriptor_is_forty_bytes() {
        assert_eq!(DESCRIPTOR_SIZE, 40);
    }

    #[test]
    fn dynamic_offsets_patch_only_dynamic_bindings() {
        let device = Device::new(Screen::new());
        let screen = device.screen();
        let layout = DescriptorSetLayout::new(
            screen,
            vec![
                DescriptorSetLayoutBinding {
                    binding: 0,
                    ty: DescriptorType::UniformBuffer,
                    count: 1,
                    stages: ShaderStages::VERTEX,
                    immutable_samplers: Vec::new(),
                },
                DescriptorSetLayoutBinding {
                    binding: 1,
                    ty: DescriptorType::UniformBufferDynamic,
                    count: 2,
                    stages: ShaderStages::VERTEX,
                    immutable_samplers: Vec::new(),
                },
            ],
        );
        assert_eq!(layout.dynamic_offset_count, 2);
        let buf = device.create_buffer(1024);
        let set = DescriptorSet::new(screen, &layout);
        for binding in [0, 1] {
            set.write(&DescriptorWrite {
                binding,
                array_element: 0,
                data: vec![
                    DescriptorData::Buffer {
                        buffer: buf.clone(),
                        offset: 0,
                        range: 64,
                    };
                    2
                ],
            });
        }

        assert!(set.apply_dynamic_offsets(&[256, 512]));
        assert_eq!(set.descriptor(0).unwrap().address, buf.address);
        assert_eq!(set.descriptor(1).unwrap().address, buf.address + 256);
        assert_eq!(set.descriptor(2).unwrap().address, buf.address + 512);
        assert!(!set.apply_dynamic_offsets(&[1]));
    }

    #[test]
    fn layouts_compare_by_shape() {
        let screen = Screen::new();
        let a = ubo_layout(&screen, DescriptorType::UniformBuffer, 2);
        let b = ubo_layout(&screen, DescriptorType::UniformBuffer, 2);
        let c = ubo_layout(&screen, DescriptorType::StorageBuffer, 2);
        assert!(descriptor_layouts_equal(Some(&a), Some(&b)));
        assert!(!descriptor_layouts_equal(Some(&a), Some(&c)));
        assert!(!descriptor_layouts_equal(Some(&a), None));
        assert!(descriptor_layouts_equal(None, None));
    }

    #[test]
    fn immutable_samplers_override_written_ones() {
        let device = Device::new(Screen::new());
        let fixed = device.create_sampler(SamplerDesc { state: [7, 0, 0, 0] });
        let other = device.create_sampler(SamplerDesc { state: [9, 0, 0, 0] });
        let layout = DescriptorSetLayout::new(
            device.screen(),
            vec![DescriptorSetLayoutBinding {
                binding: 3,
                ty: DescriptorType::Sampler,
                count: 1,
                stages: ShaderStages::FRAGMENT,
                immutable_samplers: vec![fixed.clone()],
            }],
        );
        assert!(layout.immutable_bo.is_some());
        let set = DescriptorSet::new(device.screen(), &layout);
        assert_eq!(set.descriptor(0).unwrap().sampler, [7, 0, 0, 0]);
        set.write(&DescriptorWrite {
            binding: 3,
            array_element: 0,
            data: vec![DescriptorData::Sampler(other)],
        });
        assert_eq!(set.descriptor(0).unwrap().sampler_index, fixed.id);
    }
}
