/*!
Plain geometry for imported 3D models.

Format parsers are out of scope. A loader hands over a [Model] that already carries flattened
vertex positions, triangle indices, morph target names and bones. Models can also be read from
a JSON dump, which is what the CLI uses.
*/

use std::{collections::BTreeMap, path::Path};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::import::ImportError;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    #[serde(default)]
    pub normals: Vec<Vec3>,
    /// Triangle list. Empty means every three consecutive positions form a triangle.
    #[serde(default)]
    pub indices: Vec<u32>,
    /// Morph target name to index into `morph_influences`.
    #[serde(default)]
    pub morph_dictionary: Option<BTreeMap<String, usize>>,
    #[serde(default)]
    pub morph_influences: Vec<f32>,
}

impl Mesh {
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>) -> Self {
        Self {
            name: name.into(),
            positions,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Register morph targets by name, all with an influence of 0.
    pub fn with_morph_targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dictionary = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.into(), i))
            .collect::<BTreeMap<_, _>>();
        self.morph_influences = vec![0.0; dictionary.len()];
        self.morph_dictionary = Some(dictionary);

        self
    }

    pub fn has_morph_targets(&self) -> bool {
        self.morph_dictionary
            .as_ref()
            .map(|d| !d.is_empty())
            .unwrap_or(false)
    }

    /// Current influence of a morph target, by exact name.
    pub fn morph_influence(&self, name: &str) -> Option<f32> {
        let index = *self.morph_dictionary.as_ref()?.get(name)?;
        self.morph_influences.get(index).copied()
    }

    fn triangles(&self) -> Vec<[usize; 3]> {
        if self.indices.is_empty() {
            (0..self.positions.len() / 3)
                .map(|t| [t * 3, t * 3 + 1, t * 3 + 2])
                .collect()
        } else {
            self.indices
                .chunks_exact(3)
                .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
                .collect()
        }
    }

    /// Area weighted vertex normals. Triangles that reference missing vertices are skipped.
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];

        for [a, b, c] in self.triangles() {
            let (Some(pa), Some(pb), Some(pc)) = (
                self.positions.get(a),
                self.positions.get(b),
                self.positions.get(c),
            ) else {
                continue;
            };

            let face = (*pb - *pa).cross(*pc - *pa);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }

        self.normals = normals.into_iter().map(Vec3::normalize_or_zero).collect();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    #[serde(default)]
    pub position: Vec3,
    /// Euler angles in radians.
    #[serde(default)]
    pub rotation: Vec3,
}

impl Bone {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A loaded scene, flattened into meshes and bones.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub name: String,
    pub meshes: Vec<Mesh>,
    #[serde(default)]
    pub bones: Vec<Bone>,
    /// Rotation of the whole model, euler angles in radians.
    #[serde(default)]
    pub rotation: Vec3,
}

impl Model {
    /// Read a JSON model dump. The path goes through the same checks as any other import.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let path = path.as_ref();
        super::import::validate_json_dump(path)?;

        let data = std::fs::read(path).map_err(|e| ImportError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        serde_json::from_slice(&data).map_err(|e| ImportError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.meshes.iter().map(Mesh::vertex_count).sum()
    }
}
