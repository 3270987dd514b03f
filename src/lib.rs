//! x11blit - X11 windowing shim for software-rendered 2D applications
//!
//! Opens a display connection, creates a window backed by an in-memory pixel
//! buffer, negotiates a native pixel format against the server's visual,
//! pumps X11 events into a callback interface, and blits the buffer to the
//! screen. The application draws into the buffer with whatever 2D engine it
//! likes and never touches the X protocol.
//!
//! ```no_run
//! use x11blit::{EventHandler, FrameBuffer, PlatformWindow, WindowOptions};
//!
//! struct App;
//!
//! impl EventHandler for App {
//!     fn on_draw(&mut self, buf: &mut FrameBuffer) {
//!         buf.bytes_mut().fill(0x80);
//!     }
//! }
//!
//! let mut win = PlatformWindow::new("demo", 640, 480, WindowOptions::default())?;
//! win.run(&mut App)?;
//! # anyhow::Ok(())
//! ```

mod buffer;
mod convert;
mod format;
mod image;
mod ppm;
mod rect;
mod window;

pub mod input;

pub use buffer::FrameBuffer;
pub use convert::{convert_full, row_converter, RowFn};
pub use format::{negotiate, NativeFormat, PixelFormat};
pub use image::{ImageSlots, MAX_IMAGES};
pub use rect::{clip_region, Rect};
pub use window::{
    ControlLayer, EventHandler, NoControls, PlatformWindow, WindowOptions, WindowProxy,
};
