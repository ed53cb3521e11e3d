//! Checks done at the import boundary, before a file ever reaches a parser.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use log::debug;

/// Files larger than this are rejected.
pub const MAX_MODEL_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Glb,
    Gltf,
    Fbx,
    Obj,
}

impl ModelFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "glb" => Some(Self::Glb),
            "gltf" => Some(Self::Gltf),
            "fbx" => Some(Self::Fbx),
            "obj" => Some(Self::Obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    UnsupportedExtension(PathBuf),
    TooLarge { path: PathBuf, size: u64 },
    Io { path: PathBuf, error: String },
    Parse { path: PathBuf, error: String },
}

impl Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedExtension(p) => write!(
                f,
                "Unsupported model format {}, expected one of .glb .gltf .fbx .obj",
                p.display()
            ),
            Self::TooLarge { path, size } => write!(
                f,
                "Model {} is {size} bytes, the limit is {MAX_MODEL_BYTES} bytes",
                path.display()
            ),
            Self::Io { path, error } => write!(f, "Unable to read {}: {error}", path.display()),
            Self::Parse { path, error } => {
                write!(f, "Unable to parse {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for ImportError {}

/// Check the extension and size of a file that is about to be imported.
pub fn check_model_file(path: &Path, size: u64) -> Result<ModelFormat, ImportError> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ModelFormat::from_extension)
        .ok_or_else(|| ImportError::UnsupportedExtension(path.to_path_buf()))?;

    check_size(path, size)?;

    Ok(format)
}

/// Same as [check_model_file], reading the size from the filesystem.
pub fn validate_model_path(path: impl AsRef<Path>) -> Result<ModelFormat, ImportError> {
    let path = path.as_ref();
    let size = file_size(path)?;

    let format = check_model_file(path, size)?;
    debug!("Accepted {format:?} model {}", path.display());

    Ok(format)
}

/// JSON model dumps skip the extension check but keep the size cap.
pub(crate) fn validate_json_dump(path: &Path) -> Result<(), ImportError> {
    check_size(path, file_size(path)?)
}

fn check_size(path: &Path, size: u64) -> Result<(), ImportError> {
    if size > MAX_MODEL_BYTES {
        return Err(ImportError::TooLarge {
            path: path.to_path_buf(),
            size,
        });
    }

    Ok(())
}

fn file_size(path: &Path) -> Result<u64, ImportError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| ImportError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}
