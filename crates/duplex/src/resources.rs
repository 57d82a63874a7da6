//! # Demo Resources
//!
//! Two resource types built on the core object contract:
//!
//! ```text
//! Material ──depends on──▶ Texture
//!
//! Sim side                          Core side
//! ────────                          ─────────
//! Texture { size, pixels }   ──▶    TextureCore  (size, pixels, version)
//! Material { color, texture } ──▶   MaterialCore (color, texture id,
//!                                                 size of bound texture)
//! ```
//!
//! `MaterialCore` resolves its texture id through the core-side
//! [`TextureTable`] while applying, so it only sees the right size if the
//! texture was applied first. Texture cores join the table when they are
//! initialized and leave it when destroyed, both on the core thread.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytemuck::{Pod, Zeroable};
use duplex_core::{
    CoreObject, CoreObjectCore, CoreObjectExt, CoreObjectId, CoreObjectManager, CoreObjectState,
    CoreSyncData, FrameAlloc, SyncResult,
};
use parking_lot::Mutex;

// =============================================================================
// Context
// =============================================================================

/// What every resource constructor needs.
#[derive(Clone)]
pub struct ResourceContext {
    manager: Arc<CoreObjectManager>,
    textures: Arc<TextureTable>,
}

impl ResourceContext {
    /// Creates a context with an empty texture table.
    #[must_use]
    pub fn new(manager: &Arc<CoreObjectManager>) -> Self {
        Self {
            manager: Arc::clone(manager),
            textures: Arc::new(TextureTable::default()),
        }
    }

    /// Returns the manager resources register with.
    #[must_use]
    pub fn manager(&self) -> &Arc<CoreObjectManager> {
        &self.manager
    }

    /// Returns the core-side texture table.
    #[must_use]
    pub fn textures(&self) -> &Arc<TextureTable> {
        &self.textures
    }
}

impl std::fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceContext")
            .field("textures", &self.textures.len())
            .finish_non_exhaustive()
    }
}

/// Texture cores by id, as the core thread sees them.
#[derive(Debug, Default)]
pub struct TextureTable {
    cores: Mutex<HashMap<CoreObjectId, Weak<TextureCore>>>,
}

impl TextureTable {
    /// Returns the live texture core registered under `id`.
    #[must_use]
    pub fn get(&self, id: CoreObjectId) -> Option<Arc<TextureCore>> {
        self.cores.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Returns the number of registered texture cores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cores.lock().len()
    }

    /// Checks if no texture core is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cores.lock().is_empty()
    }

    fn insert(&self, id: CoreObjectId, core: Weak<TextureCore>) {
        let mut cores = self.cores.lock();
        // Cores dropped without a destroy leave dead entries behind.
        cores.retain(|_, core| core.strong_count() > 0);
        cores.insert(id, core);
    }

    fn remove(&self, id: CoreObjectId) {
        self.cores.lock().remove(&id);
    }
}

// =============================================================================
// Texture
// =============================================================================

/// Texture dirty bits.
pub mod texture_flags {
    /// Width or height changed.
    pub const SIZE: u32 = 1 << 0;
    /// Pixel contents changed.
    pub const PIXELS: u32 = 1 << 1;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct TextureHeader {
    flags: u32,
    width: u32,
    height: u32,
    pixel_count: u32,
}

/// Core-side view of a texture.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureSnapshot {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA8 pixels, row major.
    pub pixels: Vec<u32>,
    /// Number of deltas applied.
    pub version: u64,
}

/// Core half of a [`Texture`].
#[derive(Debug)]
pub struct TextureCore {
    this: Weak<TextureCore>,
    table: Arc<TextureTable>,
    state: Mutex<TextureSnapshot>,
}

impl TextureCore {
    fn new(table: &Arc<TextureTable>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            table: Arc::clone(table),
            state: Mutex::new(TextureSnapshot::default()),
        })
    }

    /// Returns a copy of the current core state.
    #[must_use]
    pub fn snapshot(&self) -> TextureSnapshot {
        self.state.lock().clone()
    }

    /// Returns the current size.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.width, state.height)
    }
}

impl CoreObjectCore for TextureCore {
    fn sync_to_core(&self, data: &CoreSyncData) {
        let mut reader = data.reader();
        let Ok(header) = reader.read::<TextureHeader>() else {
            tracing::error!(bytes = data.size(), "malformed texture payload");
            return;
        };

        let mut state = self.state.lock();
        if header.flags & texture_flags::SIZE != 0 {
            state.width = header.width;
            state.height = header.height;
        }
        if header.flags & texture_flags::PIXELS != 0 {
            let mut pixels = Vec::with_capacity(header.pixel_count as usize);
            for _ in 0..header.pixel_count {
                match reader.read::<u32>() {
                    Ok(pixel) => pixels.push(pixel),
                    Err(err) => {
                        tracing::error!(%err, "truncated texture pixels");
                        break;
                    }
                }
            }
            state.pixels = pixels;
        }
        state.version += 1;
    }

    fn initialize(&self, id: CoreObjectId) {
        self.table.insert(id, self.this.clone());
    }

    fn destroy(&self, id: CoreObjectId) {
        self.table.remove(id);
    }
}

struct TextureData {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

/// A sim-side texture.
pub struct Texture {
    state: CoreObjectState,
    core: Arc<TextureCore>,
    data: Mutex<TextureData>,
}

impl Texture {
    /// Creates and registers a black texture.
    #[must_use]
    pub fn new(ctx: &ResourceContext, width: u32, height: u32) -> Arc<Self> {
        let manager = ctx.manager();
        let texture = Arc::new(Self {
            state: CoreObjectState::new(manager),
            core: TextureCore::new(ctx.textures()),
            data: Mutex::new(TextureData {
                width,
                height,
                pixels: vec![0; pixel_count(width, height)],
            }),
        });
        manager.register(&texture);
        texture
    }

    /// Returns the id assigned at registration.
    #[must_use]
    pub fn id(&self) -> CoreObjectId {
        self.internal_id()
    }

    /// Returns the sim-side size.
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        let data = self.data.lock();
        (data.width, data.height)
    }

    /// Resizes the texture. Pixels are cleared to black.
    pub fn resize(&self, width: u32, height: u32) {
        {
            let mut data = self.data.lock();
            data.width = width;
            data.height = height;
            data.pixels = vec![0; pixel_count(width, height)];
        }
        self.mark_core_dirty(texture_flags::SIZE | texture_flags::PIXELS);
    }

    /// Fills every pixel with `rgba`.
    pub fn fill(&self, rgba: u32) {
        self.data.lock().pixels.fill(rgba);
        self.mark_core_dirty(texture_flags::PIXELS);
    }

    /// Returns the core half.
    #[must_use]
    pub fn core_handle(&self) -> Arc<TextureCore> {
        Arc::clone(&self.core)
    }
}

impl CoreObject for Texture {
    fn core_state(&self) -> &CoreObjectState {
        &self.state
    }

    fn core(&self) -> Option<Arc<dyn CoreObjectCore>> {
        let core: Arc<dyn CoreObjectCore> = self.core.clone();
        Some(core)
    }

    fn sync_to_core(&self, allocator: &Arc<FrameAlloc>) -> CoreSyncData {
        let flags = self.state.dirty_flags();
        let data = self.data.lock();
        let send_pixels = flags & texture_flags::PIXELS != 0;

        let pixel_count = if send_pixels { data.pixels.len() } else { 0 };
        let header = TextureHeader {
            flags: flags & (texture_flags::SIZE | texture_flags::PIXELS),
            width: data.width,
            height: data.height,
            pixel_count: u32::try_from(pixel_count).unwrap_or(u32::MAX),
        };

        let mut payload = allocator.alloc(std::mem::size_of::<TextureHeader>() + pixel_count * 4);
        let mut writer = payload.writer();
        let mut written = writer.write(&header);
        if send_pixels && written.is_ok() {
            written = writer.write_bytes(bytemuck::cast_slice(data.pixels.as_slice()));
        }
        if let Err(err) = written {
            tracing::error!(%err, id = %self.state.id(), "texture payload overflow");
        }
        payload
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

// =============================================================================
// Material
// =============================================================================

/// Material dirty bits.
pub mod material_flags {
    /// Base color changed.
    pub const COLOR: u32 = 1 << 0;
    /// Bound texture changed.
    pub const TEXTURE: u32 = 1 << 1;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct MaterialHeader {
    flags: u32,
    _pad: u32,
    texture: u64,
    color: [f32; 4],
}

/// Core-side view of a material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialSnapshot {
    /// Base color.
    pub color: [f32; 4],
    /// Bound texture, or [`CoreObjectId::NONE`].
    pub texture: CoreObjectId,
    /// Core-side size of the bound texture when the material was last applied.
    pub texture_size: (u32, u32),
    /// Number of deltas applied.
    pub version: u64,
}

/// Core half of a [`Material`].
#[derive(Debug)]
pub struct MaterialCore {
    textures: Arc<TextureTable>,
    state: Mutex<MaterialSnapshot>,
}

impl MaterialCore {
    /// Returns a copy of the current core state.
    #[must_use]
    pub fn snapshot(&self) -> MaterialSnapshot {
        self.state.lock().clone()
    }
}

impl CoreObjectCore for MaterialCore {
    fn sync_to_core(&self, data: &CoreSyncData) {
        let Ok(header) = data.reader().read::<MaterialHeader>() else {
            tracing::error!(bytes = data.size(), "malformed material payload");
            return;
        };

        let mut state = self.state.lock();
        if header.flags & material_flags::COLOR != 0 {
            state.color = header.color;
        }
        if header.flags & material_flags::TEXTURE != 0 {
            state.texture = CoreObjectId::new(header.texture);
        }
        state.texture_size = self
            .textures
            .get(state.texture)
            .map_or((0, 0), |texture| texture.size());
        state.version += 1;
    }
}

struct MaterialData {
    color: [f32; 4],
    texture: Option<Arc<Texture>>,
}

/// A sim-side material, optionally sampling a [`Texture`].
pub struct Material {
    state: CoreObjectState,
    core: Arc<MaterialCore>,
    data: Mutex<MaterialData>,
}

impl Material {
    /// Creates and registers a white, untextured material.
    #[must_use]
    pub fn new(ctx: &ResourceContext) -> Arc<Self> {
        let manager = ctx.manager();
        let material = Arc::new(Self {
            state: CoreObjectState::new(manager),
            core: Arc::new(MaterialCore {
                textures: Arc::clone(ctx.textures()),
                state: Mutex::new(MaterialSnapshot::default()),
            }),
            data: Mutex::new(MaterialData {
                color: [1.0; 4],
                texture: None,
            }),
        });
        manager.register(&material);
        material
    }

    /// Returns the id assigned at registration.
    #[must_use]
    pub fn id(&self) -> CoreObjectId {
        self.internal_id()
    }

    /// Sets the base color.
    pub fn set_color(&self, color: [f32; 4]) {
        self.data.lock().color = color;
        self.mark_core_dirty(material_flags::COLOR);
    }

    /// Binds `texture`, or unbinds with `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the material is not registered.
    pub fn set_texture(&self, texture: Option<&Arc<Texture>>) -> SyncResult<()> {
        self.data.lock().texture = texture.cloned();
        self.mark_core_dirty(material_flags::TEXTURE);
        self.mark_dependencies_dirty()
    }

    /// Returns the bound texture.
    #[must_use]
    pub fn texture(&self) -> Option<Arc<Texture>> {
        self.data.lock().texture.clone()
    }

    /// Returns the core half.
    #[must_use]
    pub fn core_handle(&self) -> Arc<MaterialCore> {
        Arc::clone(&self.core)
    }
}

impl CoreObject for Material {
    fn core_state(&self) -> &CoreObjectState {
        &self.state
    }

    fn core(&self) -> Option<Arc<dyn CoreObjectCore>> {
        let core: Arc<dyn CoreObjectCore> = self.core.clone();
        Some(core)
    }

    fn sync_to_core(&self, allocator: &Arc<FrameAlloc>) -> CoreSyncData {
        let data = self.data.lock();
        let header = MaterialHeader {
            flags: self.state.dirty_flags() & (material_flags::COLOR | material_flags::TEXTURE),
            _pad: 0,
            texture: data.texture.as_ref().map_or(0, |t| t.state.id().raw()),
            color: data.color,
        };

        let mut payload = allocator.alloc(std::mem::size_of::<MaterialHeader>());
        if let Err(err) = payload.writer().write(&header) {
            tracing::error!(%err, id = %self.state.id(), "material payload overflow");
        }
        payload
    }

    fn core_dependencies(&self, dependencies: &mut Vec<CoreObjectId>) {
        if let Some(texture) = &self.data.lock().texture {
            dependencies.push(texture.state.id());
        }
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        self.destroy();
    }
}
