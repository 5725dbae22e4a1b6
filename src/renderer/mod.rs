use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cgmath::{Matrix3, Vector2};
use glium::backend::Facade;
use glium::index::PrimitiveType;
use glium::texture::{MipmapsOption, SrgbTexture2d};
use glium::uniforms::{MagnifySamplerFilter, MinifySamplerFilter, Sampler, SamplerBehavior};
use glium::{implement_vertex, program, uniform, Blend, BlendingFunction, DrawParameters, Frame,
            IndexBuffer, Program, Surface, VertexBuffer};
use image::RgbaImage;

use crate::com::Res;
use crate::error::{EngineError, Result};
use crate::memory::MemoryAccounting;

#[derive(Copy, Clone)]
struct Vertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

implement_vertex!(Vertex, position, tex_coords);

const BLEND_PARAMS: Blend = Blend {
    color: BlendingFunction::Addition { source: glium::LinearBlendingFactor::SourceAlpha,
                                         destination: glium::LinearBlendingFactor::OneMinusSourceAlpha },
    alpha: BlendingFunction::Addition { source: glium::LinearBlendingFactor::One,
                                         destination: glium::LinearBlendingFactor::OneMinusSourceAlpha },
    constant_value: (0.0, 0.0, 0.0, 0.0),
};

/// Opaque handle to a GPU texture owned by the renderer. LOD Pyramid and
/// Tile Engine hold these instead of touching glium types directly, so their
/// eviction/priority logic stays testable without a GL context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    /// Pixel-art heuristic (§4.C): source < configured threshold px and LOD scale >= 1.
    Nearest,
    Linear,
}

/// Component F. Owns the shader program, the single quad used for every
/// draw, and every live GPU texture (keyed opaquely by `TextureId`), plus the
/// running memory-accounting counter. One instance per engine.
pub struct Renderer {
    program: Program,
    vertices: VertexBuffer<Vertex>,
    indices: IndexBuffer<u8>,
    textures: Mutex<ahash::AHashMap<TextureId, SrgbTexture2d>>,
    next_id: AtomicU64,
    pub accounting: MemoryAccounting,
    last_render: Mutex<Option<std::time::Instant>>,
}

impl Renderer {
    /// Builds the one shader pipeline and the static quad (§4.F). `facade`
    /// is supplied by the host, which owns the window/surface.
    pub fn new(facade: &impl Facade) -> Result<Self> {
        let vertices = VertexBuffer::new(
            facade,
            &[
                Vertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
                Vertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
                Vertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
                Vertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
            ],
        )
        .map_err(|e| EngineError::ShaderCompile(e.to_string()))?;

        let program = program!(facade,
        140 => {
            vertex: "
                #version 140
                uniform mat3 u_matrix;
                in vec2 position;
                in vec2 tex_coords;
                out vec2 v_tex_coords;
                void main() {
                    vec3 pos = u_matrix * vec3(position, 1.0);
                    gl_Position = vec4(pos.xy, 0.0, 1.0);
                    v_tex_coords = tex_coords;
                }
            ",
            fragment: include_str!("fragment.glsl"),
        },)
        .map_err(|e| EngineError::ShaderLink(e.to_string()))?;

        let indices = IndexBuffer::new(facade, PrimitiveType::TriangleStrip, &[1u8, 2, 0, 3])
            .map_err(|e| EngineError::ShaderCompile(e.to_string()))?;

        Ok(Self {
            program,
            vertices,
            indices,
            textures: Mutex::new(ahash::AHashMap::default()),
            next_id: AtomicU64::new(1),
            accounting: MemoryAccounting::new(),
            last_render: Mutex::new(None),
        })
    }

    /// Uploads `pixels` as a new sRGB texture and accounts its bytes.
    pub fn create_texture(&self, facade: &impl Facade, pixels: &RgbaImage) -> Result<TextureId> {
        let (w, h) = pixels.dimensions();
        let raw = glium::texture::RawImage2d::from_raw_rgba_reversed(pixels.as_raw(), (w, h));
        let texture = SrgbTexture2d::with_mipmaps(facade, raw, MipmapsOption::NoMipmap)
            .map_err(|e| EngineError::ShaderCompile(e.to_string()))?;

        let id = TextureId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.accounting.add(Res { w, h }.byte_size());
        self.textures.lock().unwrap().insert(id, texture);
        Ok(id)
    }

    /// Replaces a sub-rectangle of an existing texture in place (used by
    /// incremental tile repaints). Byte accounting is unaffected since the
    /// texture's own size doesn't change.
    pub fn update_texture_region(
        &self,
        id: TextureId,
        x: u32,
        y: u32,
        pixels: &RgbaImage,
    ) -> Result<()> {
        let textures = self.textures.lock().unwrap();
        let texture = textures.get(&id).ok_or(EngineError::GpuContextUnavailable)?;
        let (w, h) = pixels.dimensions();
        let raw = glium::texture::RawImage2d::from_raw_rgba_reversed(pixels.as_raw(), (w, h));
        texture.write(glium::Rect { left: x, bottom: y, width: w, height: h }, raw);
        Ok(())
    }

    pub fn delete_texture(&self, id: TextureId) {
        if let Some(texture) = self.textures.lock().unwrap().remove(&id) {
            self.accounting.remove(Res { w: texture.width(), h: texture.height() }.byte_size());
        }
    }

    /// Draws `id`'s texture over the current frame contents using `matrix`.
    /// Callers compose `matrix` via [`image_matrix`] or [`tile_matrix`].
    pub fn draw(
        &self,
        frame: &mut Frame,
        id: TextureId,
        matrix: Matrix3<f32>,
        filter: TextureFilter,
    ) -> Result<()> {
        let textures = self.textures.lock().unwrap();
        let texture = textures.get(&id).ok_or(EngineError::GpuContextUnavailable)?;

        let (min, mag) = match filter {
            TextureFilter::Nearest => {
                (MinifySamplerFilter::Nearest, MagnifySamplerFilter::Nearest)
            }
            TextureFilter::Linear => (MinifySamplerFilter::Linear, MagnifySamplerFilter::Linear),
        };
        let sampler = Sampler(
            texture,
            SamplerBehavior { minify_filter: min, magnify_filter: mag, ..Default::default() },
        );

        let raw: [[f32; 3]; 3] = matrix.into();
        let uniforms = uniform! { u_matrix: raw, u_image: sampler };

        let params =
            DrawParameters { blend: BLEND_PARAMS, ..Default::default() };

        frame
            .draw(&self.vertices, &self.indices, &self.program, &uniforms, &params)
            .map_err(|_| EngineError::GpuContextUnavailable)
    }

    /// §4.F throttling: a render within 16ms of the previous one is skipped
    /// (the caller is expected to instead schedule one via its own display
    /// callback). Returns whether this call should actually draw.
    pub fn should_render_now(&self) -> bool {
        let mut last = self.last_render.lock().unwrap();
        let now = std::time::Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < std::time::Duration::from_millis(16) => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// §4.F: `diag(imgW*s/canvasW, imgH*s/canvasH, 1)` composed with
/// `translate(2*tx/canvasW, -2*ty/canvasH)`, for a whole-image (LOD) draw.
pub fn image_matrix(canvas: Res, content: Res, scale: f32, translate: Vector2<f32>) -> Matrix3<f32> {
    let sx = content.w as f32 * scale / canvas.w as f32;
    let sy = content.h as f32 * scale / canvas.h as f32;
    let tx = 2.0 * translate.x / canvas.w as f32;
    let ty = -2.0 * translate.y / canvas.h as f32;

    let scale_m = Matrix3::from_nonuniform_scale(sx, sy);
    let translate_m = Matrix3::from_translation(Vector2::new(tx, ty));
    translate_m * scale_m
}

/// §4.F tile draw: `tileW`/`tileH` replace `imgW`/`imgH`, and the translate
/// term adds the tile's offset from the image center, scaled by `s`.
pub fn tile_matrix(
    canvas: Res,
    tile_size: Res,
    image: Res,
    tile_origin: Vector2<f32>,
    scale: f32,
    translate: Vector2<f32>,
) -> Matrix3<f32> {
    let image_center = Vector2::new(image.w as f32 / 2.0, image.h as f32 / 2.0);
    let offset_from_center = tile_origin - image_center;

    let sx = tile_size.w as f32 * scale / canvas.w as f32;
    let sy = tile_size.h as f32 * scale / canvas.h as f32;
    let tx = 2.0 * (translate.x + offset_from_center.x * scale) / canvas.w as f32;
    let ty = -2.0 * (translate.y + offset_from_center.y * scale) / canvas.h as f32;

    let scale_m = Matrix3::from_nonuniform_scale(sx, sy);
    let translate_m = Matrix3::from_translation(Vector2::new(tx, ty));
    translate_m * scale_m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_matrix_identity_at_fit_scale_no_translate() {
        let canvas = Res { w: 1000, h: 800 };
        let m = image_matrix(canvas, canvas, 1.0, Vector2::new(0.0, 0.0));
        assert!((m.x.x - 1.0).abs() < 1e-6);
        assert!((m.y.y - 1.0).abs() < 1e-6);
        assert!((m.z.x).abs() < 1e-6);
        assert!((m.z.y).abs() < 1e-6);
    }

    #[test]
    fn tile_matrix_centers_tile_at_image_center() {
        let canvas = Res { w: 1000, h: 1000 };
        let image = Res { w: 2000, h: 2000 };
        let tile_size = Res { w: 512, h: 512 };
        // A tile whose origin is the image center contributes zero extra translate.
        let m = tile_matrix(
            canvas,
            tile_size,
            image,
            Vector2::new(1000.0, 1000.0),
            1.0,
            Vector2::new(0.0, 0.0),
        );
        assert!((m.z.x).abs() < 1e-6);
        assert!((m.z.y).abs() < 1e-6);
    }
}
