use thiserror::Error;

/// Everything the engine can fail at (spec §7). Distinct from panics: these
/// are conditions callers can recover from (fall back to software resample,
/// surface a load error to the host, retry the upload next frame).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no GPU context available")]
    GpuContextUnavailable,

    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    #[error("shader link failed: {0}")]
    ShaderLink(String),

    #[error("image decode failed: {0}")]
    ImageDecode(String),

    #[error("resample worker unavailable, falling back to synchronous resample")]
    WorkerUnavailable,

    #[error("tile upload failed at ({x}, {y}) level {level}")]
    TileUploadFailed { x: u32, y: u32, level: u8 },

    #[error("LOD upload failed at level {level}")]
    LodUploadFailed { level: u8 },
}

pub type Result<T> = std::result::Result<T, EngineError>;
