#[macro_use]
extern crate log;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::process::ExitCode;

use gigaview_engine::{logging, EngineConfig, Image, Platform};

/// Thin harness exercising the library against a single image file, with no
/// window of its own: hosts embedding the engine own the GL context and the
/// input loop, so there is nothing here to render. Prints what `load` would
/// decide — tiled or single-LOD, and at what initial LOD — without spinning
/// up glium.
fn main() -> ExitCode {
    logging::init();

    #[cfg(target_family = "unix")]
    unsafe {
        // Images may be private; don't let other local users read them back
        // out of anything this process writes.
        libc::umask(0o077);
        #[cfg(target_env = "gnu")]
        libc::mallopt(libc::M_TRIM_THRESHOLD, 128 * 1024);
    }

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: gigaview-engine <image path>");
        return ExitCode::FAILURE;
    };

    let image = match Image::open(&path) {
        Ok(img) => img,
        Err(e) => {
            error!("failed to open {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let platform =
        if std::env::args().any(|a| a == "--mobile") { Platform::Mobile } else { Platform::Desktop };
    let config = EngineConfig::for_platform(platform);

    let res = image.res();
    let peak_bytes = res.byte_size();
    let tiled = config.needs_tiling(res, peak_bytes);

    info!(
        "{path}: {res:?} ({:.1} MP), mode={}",
        res.megapixels(),
        if tiled { "tiled" } else { "single-lod" }
    );

    ExitCode::SUCCESS
}
