//! Pixel demo
//!
//! Opens a 400x400 window and puts a red pixel at the origin on every loop
//! iteration, ending the loop after 20000 iterations.
//!
//! `pixel_demo --capture out.png` renders the same scene offscreen on a
//! headless core and writes it to a PNG instead of opening a window.
//! `--config settings.toml` (or `.ron`) replaces the built-in settings.

use slotmap::SlotMap;
use std::path::{Path, PathBuf};

use pixel_render::foundation::fatal;
use pixel_render::prelude::*;
use pixel_render::render::vulkan::core::{DescriptorPool, GraphicsDescriptorLayouts};

const WIDTH: u32 = 400;
const HEIGHT: u32 = 400;
const ITERATIONS: u32 = 20_000;
const RED: u32 = 0x00FF_0000;

#[derive(Default)]
struct Args {
    capture: Option<PathBuf>,
    config: Option<PathBuf>,
    unknown: Vec<String>,
}

fn parse_args() -> Args {
    let mut parsed = Args::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--capture" {
            parsed.capture = args.next().map(PathBuf::from);
        } else if arg == "--config" {
            parsed.config = args.next().map(PathBuf::from);
        } else {
            parsed.unknown.push(arg);
        }
    }
    parsed
}

fn load_config(path: Option<&Path>) -> RendererConfig {
    let Some(path) = path else {
        return RendererConfig::new("pixel_demo");
    };
    match RendererConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            fatal(format_args!("Failed to load {}: {}", path.display(), e));
        }
    }
}

fn run_windowed(config: RendererConfig) {
    let mut app = Application::new(config).or_fatal("Failed to initialize");
    let Some(window) = app.new_window("My window", WIDTH, HEIGHT) else {
        fatal("Failed to open window");
    };

    let mut iteration = 0u32;
    app.loop_hook(move |app| {
        log::trace!("iteration {}", iteration);
        app.pixel_put(window, 0, 0, RED);
        iteration += 1;
        if iteration > ITERATIONS {
            app.loop_end();
        }
    });
    app.run();

    app.destroy_window(window);
    app.destroy();
}

fn render_offscreen(config: &RendererConfig) -> VulkanResult<Vec<u8>> {
    let core = RenderCore::new(config, &[])?;
    let pixels = {
        let layouts = GraphicsDescriptorLayouts::new(&core)?;
        let pool = DescriptorPool::new(&core, 16)?;
        let mut graphics = GraphicsSupport::new(
            &core,
            RenderTarget::Offscreen {
                width: WIDTH,
                height: HEIGHT,
            },
            config,
            &layouts,
            &pool,
        )?;

        graphics.pixel_put(0, 0, RED);
        graphics.render(&SlotMap::with_key())?;
        graphics.renderer_mut().capture()?
    };
    core.destroy();
    Ok(pixels)
}

fn capture(config: &RendererConfig, path: &Path) {
    let pixels = render_offscreen(config).or_fatal("Offscreen render failed");
    let Some(frame) = image::RgbaImage::from_raw(WIDTH, HEIGHT, pixels) else {
        fatal("Captured frame has an unexpected size");
    };
    match frame.save(path) {
        Ok(()) => log::info!("Wrote {}", path.display()),
        Err(e) => fatal(format_args!("Failed to write {}: {}", path.display(), e)),
    }
}

fn main() {
    let args = parse_args();
    let config = load_config(args.config.as_deref());
    logging::init(&config.log_level);
    for arg in &args.unknown {
        log::warn!("Ignoring unknown argument '{}'", arg);
    }

    match args.capture {
        Some(path) => capture(&config, &path),
        None => run_windowed(config),
    }
}
