use hizcull_types::{LightHandle, LightKind};
use wgpu::{
    CommandEncoder, Extent3d, ImageCopyTexture, Origin3d, Texture, TextureAspect, TextureDescriptor, TextureDimension,
    TextureFormat, TextureUsages, TextureViewDimension,
};

use crate::util::{sorted::SortedInsert, typedefs::FastHashMap};

/// Face size of point light shadow cube maps.
pub const CUBEMAP_SHADOW_RESOLUTION: u32 = 1024;
/// Size of spot and directional light shadow maps.
pub const SINGLE_SHADOW_RESOLUTION: u32 = 2048;
/// Shadow maps store linear distance.
pub const SHADOW_FORMAT: TextureFormat = TextureFormat::R16Float;
const CUBE_FACES: u32 = 6;

/// Shape of the shadow target a light renders into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShadowLayout {
    /// Six square faces.
    Cubemap { resolution: u32 },
    Single2D { resolution: u32 },
}

impl ShadowLayout {
    pub fn for_kind(kind: LightKind) -> Self {
        match kind {
            LightKind::Point => Self::Cubemap {
                resolution: CUBEMAP_SHADOW_RESOLUTION,
            },
            LightKind::Directional | LightKind::Spot => Self::Single2D {
                resolution: SINGLE_SHADOW_RESOLUTION,
            },
        }
    }

    pub fn extent(self) -> Extent3d {
        match self {
            Self::Cubemap { resolution } => Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 6,
            },
            Self::Single2D { resolution } => Extent3d {
                width: resolution,
                height: resolution,
                depth_or_array_layers: 1,
            },
        }
    }

    /// Descriptor of the target the shadow collaborator allocates.
    pub fn descriptor(self, label: Option<&str>) -> TextureDescriptor<'_> {
        TextureDescriptor {
            label,
            size: self.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: SHADOW_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
            view_formats: &[],
        }
    }

    pub fn view_dimension(self) -> TextureViewDimension {
        match self {
            Self::Cubemap { .. } => TextureViewDimension::Cube,
            Self::Single2D { .. } => TextureViewDimension::D2,
        }
    }
}

/// Array layer of `face` of the cube in `slot` of a cube map array.
pub fn cube_array_layer(slot: u32, face: u32) -> u32 {
    slot * CUBE_FACES + face
}

/// Cube map array with room for `cubes` point light shadows.
pub fn cube_array_descriptor(label: Option<&str>, resolution: u32, cubes: u32) -> TextureDescriptor<'_> {
    TextureDescriptor {
        label,
        size: Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: cube_array_layer(cubes, 0),
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: SHADOW_FORMAT,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    }
}

/// Records a copy of the six faces of a drawn cube shadow into `slot` of
/// `cube_array`. Returns false, recording nothing, if the face size differs
/// or the slot is past the end of the array.
pub fn copy_to_cube_array(encoder: &mut CommandEncoder, faces: &Texture, cube_array: &Texture, slot: u32) -> bool {
    let first_layer = cube_array_layer(slot, 0);
    if faces.width() != cube_array.width()
        || faces.height() != cube_array.height()
        || faces.depth_or_array_layers() < CUBE_FACES
        || first_layer + CUBE_FACES > cube_array.depth_or_array_layers()
    {
        log::warn!(
            "Can't copy {}x{} cube faces into slot {slot} of a {}x{}x{} cube array",
            faces.width(),
            faces.height(),
            cube_array.width(),
            cube_array.height(),
            cube_array.depth_or_array_layers()
        );
        return false;
    }

    encoder.copy_texture_to_texture(
        ImageCopyTexture {
            texture: faces,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        ImageCopyTexture {
            texture: cube_array,
            mip_level: 0,
            origin: Origin3d {
                x: 0,
                y: 0,
                z: first_layer,
            },
            aspect: TextureAspect::All,
        },
        Extent3d {
            width: faces.width(),
            height: faces.height(),
            depth_or_array_layers: CUBE_FACES,
        },
    );
    true
}

/// Shadow bookkeeping of one enabled light.
#[derive(Debug, Clone, PartialEq)]
pub struct LightShadowState {
    pub kind: LightKind,
    pub layout: ShadowLayout,
    pub casts_shadows: bool,
    /// Frames to wait between shadow updates. Zero updates every frame.
    pub update_frequency: u64,
    pub last_update_frame: u64,
}

impl LightShadowState {
    pub fn new(kind: LightKind) -> Self {
        Self {
            kind,
            layout: ShadowLayout::for_kind(kind),
            casts_shadows: true,
            update_frequency: 0,
            last_update_frame: 0,
        }
    }

    /// True if the shadow map should be redrawn on `frame`, recording the
    /// update if so.
    pub fn update_due(&mut self, frame: u64) -> bool {
        if !self.casts_shadows {
            return false;
        }
        if self.last_update_frame + self.update_frequency < frame {
            self.last_update_frame = frame;
            true
        } else {
            false
        }
    }

    /// Switches the light kind. Returns true if the shadow target has to be
    /// reallocated with the new layout.
    pub fn set_kind(&mut self, kind: LightKind) -> bool {
        self.kind = kind;
        let layout = ShadowLayout::for_kind(kind);
        let changed = layout != self.layout;
        self.layout = layout;
        changed
    }
}

/// Owned map from light to its shadow state.
///
/// Entries exist exactly while a light is enabled.
#[derive(Debug, Default)]
pub struct LightRegistry {
    lights: FastHashMap<LightHandle, LightShadowState>,
    // Kept sorted so iteration order doesn't depend on the hasher.
    order: Vec<usize>,
}

impl LightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a light. Enabling an enabled light keeps its state.
    pub fn enable(&mut self, handle: LightHandle, kind: LightKind) -> &mut LightShadowState {
        if self.order.insert_sorted(handle.idx) {
            log::debug!("Enabling shadows for light {}", handle.idx);
        }
        self.lights.entry(handle).or_insert_with(|| LightShadowState::new(kind))
    }

    /// Stops tracking a light, handing back its state.
    pub fn disable(&mut self, handle: LightHandle) -> Option<LightShadowState> {
        if let Ok(position) = self.order.binary_search(&handle.idx) {
            self.order.remove(position);
        }
        self.lights.remove(&handle)
    }

    pub fn get(&self, handle: LightHandle) -> Option<&LightShadowState> {
        self.lights.get(&handle)
    }

    pub fn get_mut(&mut self, handle: LightHandle) -> Option<&mut LightShadowState> {
        self.lights.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// Enabled lights in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (LightHandle, &LightShadowState)> + '_ {
        self.order.iter().filter_map(|&idx| {
            let handle = LightHandle::new(idx);
            self.lights.get(&handle).map(|state| (handle, state))
        })
    }

    /// Lights whose shadows should be drawn on `frame`, in handle order.
    pub fn due_this_frame(&mut self, frame: u64) -> Vec<LightHandle> {
        profiling::scope!("lights due this frame");

        let mut due = Vec::new();
        for &idx in &self.order {
            let handle = LightHandle::new(idx);
            if let Some(state) = self.lights.get_mut(&handle) {
                if state.update_due(frame) {
                    due.push(handle);
                }
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_follow_kind() {
        assert_eq!(ShadowLayout::for_kind(LightKind::Point).extent().depth_or_array_layers, 6);
        assert_eq!(ShadowLayout::for_kind(LightKind::Point).extent().width, 1024);
        assert_eq!(ShadowLayout::for_kind(LightKind::Spot).extent().width, 2048);

        let mut state = LightShadowState::new(LightKind::Spot);
        assert!(!state.set_kind(LightKind::Directional));
        assert!(state.set_kind(LightKind::Point));
        assert_eq!(state.layout.view_dimension(), TextureViewDimension::Cube);
        assert_eq!(state.layout.descriptor(None).format, SHADOW_FORMAT);
    }

    #[test]
    fn cube_array_slots() {
        assert_eq!(cube_array_layer(0, 0), 0);
        assert_eq!(cube_array_layer(2, 5), 17);
        let desc = cube_array_descriptor(None, 256, 3);
        assert_eq!(desc.size.depth_or_array_layers, 18);
        assert!(desc.usage.contains(TextureUsages::COPY_DST));
        assert!(ShadowLayout::for_kind(LightKind::Point)
            .descriptor(None)
            .usage
            .contains(TextureUsages::COPY_SRC));
    }

    #[test]
    fn faces_land_in_their_slot() {
        let iad = match pollster::block_on(crate::create_iad(None, None)) {
            Ok(iad) => iad,
            Err(e) => {
                eprintln!("Skipping, no usable adapter: {e}");
                return;
            }
        };
        let device = &iad.device;
        // 128 two byte texels fill one aligned row exactly
        let resolution = 128;
        let row_bytes = resolution * 2;
        let face_bytes = (row_bytes * resolution) as usize;

        let faces = device.create_texture(&ShadowLayout::Cubemap { resolution }.descriptor(Some("faces")));
        let mut face_data = Vec::with_capacity(face_bytes * 6);
        for face in 0..6_u16 {
            let texel = ((face + 1) * 0x0400).to_le_bytes();
            face_data.extend(texel.iter().cycle().take(face_bytes));
        }
        iad.queue.write_texture(
            faces.as_image_copy(),
            &face_data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(resolution),
            },
            faces.size(),
        );

        let mut desc = cube_array_descriptor(Some("cube array"), resolution, 2);
        desc.usage |= TextureUsages::COPY_SRC;
        let cube_array = device.create_texture(&desc);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cube array readback"),
            size: (face_bytes * 12) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        let small = device.create_texture(&ShadowLayout::Cubemap { resolution: 64 }.descriptor(None));
        assert!(!copy_to_cube_array(&mut encoder, &small, &cube_array, 1));
        assert!(!copy_to_cube_array(&mut encoder, &faces, &cube_array, 2));
        assert!(copy_to_cube_array(&mut encoder, &faces, &cube_array, 1));
        encoder.copy_texture_to_buffer(
            cube_array.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes),
                    rows_per_image: Some(resolution),
                },
            },
            cube_array.size(),
        );
        iad.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        slice.map_async(wgpu::MapMode::Read, |result| result.unwrap());
        device.poll(wgpu::Maintain::Wait);
        let data = slice.get_mapped_range();
        let (first, second) = data.split_at(face_bytes * 6);
        assert!(first.iter().all(|&byte| byte == 0));
        assert_eq!(second, &face_data[..]);
    }

    #[test]
    fn throttle() {
        let mut state = LightShadowState::new(LightKind::Spot);
        state.update_frequency = 2;
        let due: Vec<u64> = (0..10).filter(|&frame| state.update_due(frame)).collect();
        assert_eq!(due, [3, 6, 9]);
    }

    #[test]
    fn enable_disable() {
        let mut registry = LightRegistry::new();
        registry.enable(LightHandle::new(7), LightKind::Point);
        registry.enable(LightHandle::new(2), LightKind::Spot).update_frequency = 5;
        // enabling again keeps the existing state
        registry.enable(LightHandle::new(2), LightKind::Spot);
        assert_eq!(registry.get(LightHandle::new(2)).unwrap().update_frequency, 5);

        let order: Vec<usize> = registry.iter().map(|(h, _)| h.idx).collect();
        assert_eq!(order, [2, 7]);

        assert!(registry.disable(LightHandle::new(7)).is_some());
        assert!(registry.disable(LightHandle::new(7)).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.due_this_frame(1).is_empty());
        assert_eq!(registry.due_this_frame(6), [LightHandle::new(2)]);
    }
}
