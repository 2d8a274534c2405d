// src/model/material.rs

use crate::renderer::backend::TextureId;

/// The four texture slots an imported material fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapSlot {
    Albedo,
    Normal,
    Metalness,
    Roughness,
}

impl MapSlot {
    pub const ALL: [MapSlot; 4] = [
        MapSlot::Albedo,
        MapSlot::Normal,
        MapSlot::Metalness,
        MapSlot::Roughness,
    ];

    pub const fn index(self) -> usize {
        match self {
            MapSlot::Albedo => 0,
            MapSlot::Normal => 1,
            MapSlot::Metalness => 2,
            MapSlot::Roughness => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialMap {
    /// `None` shades with the host's default texture.
    pub texture: Option<TextureId>,
    pub color: [u8; 4],
    pub value: f32,
}

impl MaterialMap {
    const EMPTY: Self = Self {
        texture: None,
        color: [0, 0, 0, 0],
        value: 0.0,
    };
}

impl Default for MaterialMap {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    maps: [MaterialMap; 4],
}

impl Default for Material {
    /// White albedo, every other slot empty.
    fn default() -> Self {
        let mut maps = [MaterialMap::EMPTY; 4];
        maps[MapSlot::Albedo.index()].color = [255, 255, 255, 255];
        Self { name: None, maps }
    }
}

impl Material {
    /// A default material carrying the source material's name.
    pub fn with_name(name: Option<String>) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn map(&self, slot: MapSlot) -> &MaterialMap {
        &self.maps[slot.index()]
    }

    pub fn map_mut(&mut self, slot: MapSlot) -> &mut MaterialMap {
        &mut self.maps[slot.index()]
    }

    pub fn texture(&self, slot: MapSlot) -> Option<TextureId> {
        self.map(slot).texture
    }

    pub fn set_texture(&mut self, slot: MapSlot, texture: TextureId) {
        self.map_mut(slot).texture = Some(texture);
    }

    pub fn maps(&self) -> &[MaterialMap; 4] {
        &self.maps
    }

    /// Every texture the material references, in slot order.
    pub fn textures(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.maps.iter().filter_map(|m| m.texture)
    }
}
