//! Gradient demo exercising the window, surface, and event pump.
//!
//! Drag with the left button to move the marker, use the arrow keys to shift
//! the hue, press F2 for a PPM screenshot.

use anyhow::Result;
use clap::Parser;
use x11blit::input::{self, keys};
use x11blit::{EventHandler, FrameBuffer, PixelFormat, PlatformWindow, WindowOptions};

#[derive(Parser)]
#[command(name = "x11blit-demo")]
#[command(about = "Software-rendered gradient in an X11 window")]
#[command(version)]
struct Cli {
    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Pin the window to its initial size
    #[arg(long)]
    fixed: bool,

    /// Animate from the idle callback instead of blocking for events
    #[arg(long)]
    poll: bool,
}

struct Demo {
    phase: u8,
    marker: Option<(i32, i32)>,
}

impl Demo {
    fn paint(&self, buf: &mut FrameBuffer) {
        let (w, h) = (buf.width(), buf.height());
        for y in 0..h {
            let g = (y * 255 / h.max(1)) as u8;
            let row = buf.row_mut(y);
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let r = (x as u32 * 255 / w.max(1) as u32) as u8;
                // Surface format is Bgra32.
                px[0] = self.phase;
                px[1] = g;
                px[2] = r;
                px[3] = 255;
            }
        }
        if let Some((mx, my)) = self.marker {
            for dy in -3..=3i32 {
                let y = my + dy;
                if y < 0 || y >= h as i32 {
                    continue;
                }
                let row = buf.row_mut(y as u32);
                for dx in -3..=3i32 {
                    let x = mx + dx;
                    if x < 0 || x >= w as i32 {
                        continue;
                    }
                    row[x as usize * 4..x as usize * 4 + 4].copy_from_slice(&[0, 0, 0, 255]);
                }
            }
        }
    }
}

impl EventHandler for Demo {
    fn on_draw(&mut self, buf: &mut FrameBuffer) {
        self.paint(buf);
    }

    fn on_idle(&mut self) -> bool {
        self.phase = self.phase.wrapping_add(1);
        true
    }

    fn on_mouse_button_down(&mut self, _: &mut FrameBuffer, x: i32, y: i32, flags: u32) -> bool {
        if flags & input::MOUSE_LEFT != 0 {
            self.marker = Some((x, y));
            return true;
        }
        false
    }

    fn on_mouse_move(&mut self, _: &mut FrameBuffer, x: i32, y: i32, flags: u32) -> bool {
        if flags & input::MOUSE_LEFT != 0 {
            self.marker = Some((x, y));
            return true;
        }
        false
    }

    fn on_key(&mut self, _: &mut FrameBuffer, _x: i32, _y: i32, key: u32, _flags: u32) -> bool {
        match key {
            keys::LEFT => self.phase = self.phase.wrapping_sub(16),
            keys::RIGHT => self.phase = self.phase.wrapping_add(16),
            _ => return false,
        }
        true
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let options = WindowOptions {
        format: PixelFormat::Bgra32,
        resizable: !cli.fixed,
        wait_mode: !cli.poll,
        ..Default::default()
    };
    let mut win = PlatformWindow::new("x11blit demo", cli.width, cli.height, options)?;
    let mut demo = Demo {
        phase: 0,
        marker: None,
    };
    win.run(&mut demo)
}
