//! Window lifecycle, event pump, and buffer presentation.
//!
//! One [`PlatformWindow`] owns the display connection, the window, and the
//! in-memory surface the application draws into. [`PlatformWindow::run`]
//! pumps X11 events into an [`EventHandler`]; a [`WindowProxy`] lets other
//! threads push updates through a second connection while the pump blocks.

use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, trace, warn};
use x11rb::atom_manager;
use x11rb::connection::Connection;
use x11rb::properties::WmSizeHints;
use x11rb::protocol::xproto::{
    AtomEnum, ClientMessageEvent, ConnectionExt, CreateGCAux, CreateWindowAux, EventMask,
    ExposeEvent, Gcontext, ImageFormat, MotionNotifyEvent, PropMode, Screen, Visualtype, Window,
    WindowClass, EXPOSE_EVENT,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::buffer::FrameBuffer;
use crate::convert::convert_region;
use crate::format::{negotiate, NativeFormat, PixelFormat};
use crate::image::{ImageSlots, MAX_IMAGES};
use crate::input::{self, keys};
use crate::rect::{clip_region, Rect};

atom_manager! {
    Atoms: AtomsCookie {
        WM_PROTOCOLS,
        WM_DELETE_WINDOW,
    }
}

const MIN_WINDOW: u32 = 32;
const MAX_WINDOW: u32 = 4096;

static BACKEND_INIT: Once = Once::new();

/// Application callbacks driven by the event pump. Every callback that takes
/// the surface may draw into it; the input callbacks return whether the
/// frame should be redrawn and presented afterwards.
#[allow(unused_variables)]
pub trait EventHandler {
    fn on_init(&mut self, buf: &mut FrameBuffer) {}
    /// Called after the surface was reallocated for a new window size.
    fn on_resize(&mut self, buf: &mut FrameBuffer) {}
    fn on_draw(&mut self, buf: &mut FrameBuffer) {}
    /// Called when the queue runs dry in poll mode. Return `true` to redraw.
    fn on_idle(&mut self) -> bool {
        false
    }
    fn on_mouse_move(&mut self, buf: &mut FrameBuffer, x: i32, y: i32, flags: u32) -> bool {
        false
    }
    fn on_mouse_button_down(&mut self, buf: &mut FrameBuffer, x: i32, y: i32, flags: u32) -> bool {
        false
    }
    fn on_mouse_button_up(&mut self, buf: &mut FrameBuffer, x: i32, y: i32, flags: u32) -> bool {
        false
    }
    fn on_key(&mut self, buf: &mut FrameBuffer, x: i32, y: i32, key: u32, flags: u32) -> bool {
        false
    }
    /// A control in the [`ControlLayer`] changed state. A redraw always
    /// follows.
    fn on_ctrl_change(&mut self, buf: &mut FrameBuffer) {}
}

/// Widget layer that gets first refusal on input events, in window
/// coordinates (already flipped when the surface is bottom-up).
#[allow(unused_variables)]
pub trait ControlLayer {
    /// Moves keyboard focus to the control under the point. Returns whether
    /// the focus changed.
    fn set_cursor(&mut self, x: i32, y: i32) -> bool {
        false
    }
    fn in_rect(&self, x: i32, y: i32) -> bool {
        false
    }
    fn on_mouse_move(&mut self, x: i32, y: i32, pressed: bool) -> bool {
        false
    }
    fn on_mouse_button_down(&mut self, x: i32, y: i32) -> bool {
        false
    }
    fn on_mouse_button_up(&mut self, x: i32, y: i32) -> bool {
        false
    }
    fn on_arrow_keys(&mut self, left: bool, right: bool, down: bool, up: bool) -> bool {
        false
    }
}

/// Control layer with no controls in it.
pub struct NoControls;

impl ControlLayer for NoControls {}

#[derive(Debug, Clone, Copy)]
pub struct WindowOptions {
    /// Format the application draws in. Presentation converts to the
    /// server's native format when they differ.
    pub format: PixelFormat,
    /// Address surface rows bottom-up.
    pub flip_y: bool,
    /// Let the window manager resize the window.
    pub resizable: bool,
    /// Block for events instead of polling with idle callbacks.
    pub wait_mode: bool,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            format: PixelFormat::Bgra32,
            flip_y: false,
            resizable: true,
            wait_mode: true,
        }
    }
}

/// Surface state shared between the pump thread and proxies.
struct Shared {
    buf: FrameBuffer,
    mapped: bool,
    /// A redraw was requested from outside the pump.
    update: bool,
}

impl Shared {
    /// Claims a pending redraw request. Requests stay queued until the
    /// window is mapped.
    fn take_redraw(&mut self) -> bool {
        self.mapped && std::mem::take(&mut self.update)
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>> {
    shared.lock().map_err(|_| anyhow!("surface lock poisoned"))
}

pub struct PlatformWindow {
    conn: RustConnection,
    window: Window,
    gc: Gcontext,
    atoms: Atoms,
    native: NativeFormat,
    pad_bytes: usize,
    shared: Arc<Mutex<Shared>>,
    slots: ImageSlots,
    controls: Box<dyn ControlLayer>,
    options: WindowOptions,
    caption: String,
    keysyms: Vec<u32>,
    min_keycode: u8,
    syms_per_code: u8,
    proxy: WindowProxy,
    timer: Instant,
}

impl PlatformWindow {
    /// Connects to the display named by `DISPLAY`, negotiates the native
    /// pixel format, and creates an unmapped window with a fresh surface.
    pub fn new(caption: &str, width: u32, height: u32, options: WindowOptions) -> Result<Self> {
        BACKEND_INIT.call_once(|| {
            debug!("x11 backend starting");
        });
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&width)
            || !(MIN_WINDOW..=MAX_WINDOW).contains(&height)
        {
            bail!("window size {width}x{height} out of range");
        }

        let (conn, screen_num) = x11rb::connect(None).context("cannot open display")?;
        let setup = conn.setup();
        let screen = &setup.roots[screen_num];
        let (depth, visual) = root_visual(screen)?;
        let native = negotiate(
            depth,
            visual.red_mask,
            visual.green_mask,
            visual.blue_mask,
            setup.image_byte_order,
        )?;
        let pad_bytes = scanline_pad(&conn, depth, &native)?;
        debug!(
            "visual depth {depth}, native format {:?}, {} bpp",
            native.format, native.bits_per_pixel
        );

        let window = conn.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(screen.white_pixel)
            .event_mask(
                EventMask::EXPOSURE
                    | EventMask::STRUCTURE_NOTIFY
                    | EventMask::BUTTON_PRESS
                    | EventMask::BUTTON_RELEASE
                    | EventMask::POINTER_MOTION
                    | EventMask::KEY_PRESS
                    | EventMask::KEY_RELEASE,
            );
        conn.create_window(
            depth,
            window,
            screen.root,
            0,
            0,
            width as u16,
            height as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &aux,
        )?;

        let gc = conn.generate_id()?;
        conn.create_gc(gc, window, &CreateGCAux::new().graphics_exposures(0))?;

        let atoms = Atoms::new(&conn)?.reply()?;
        conn.change_property32(
            PropMode::REPLACE,
            window,
            atoms.WM_PROTOCOLS,
            AtomEnum::ATOM,
            &[atoms.WM_DELETE_WINDOW],
        )?;

        let mut hints = WmSizeHints::new();
        if options.resizable {
            hints.min_size = Some((MIN_WINDOW as i32, MIN_WINDOW as i32));
            hints.max_size = Some((MAX_WINDOW as i32, MAX_WINDOW as i32));
        } else {
            hints.min_size = Some((width as i32, height as i32));
            hints.max_size = Some((width as i32, height as i32));
        }
        hints.set(&conn, window, AtomEnum::WM_NORMAL_HINTS)?;

        let first = setup.min_keycode;
        let count = setup.max_keycode - setup.min_keycode + 1;
        let mapping = conn.get_keyboard_mapping(first, count)?.reply()?;

        let buf = FrameBuffer::new(width, height, options.format, options.flip_y)?;
        let shared = Arc::new(Mutex::new(Shared {
            buf,
            mapped: false,
            update: false,
        }));

        // Second connection for cross-thread proxies. Requests issued on it
        // never interleave with the pump's replies.
        let (alt, _) = x11rb::connect(None).context("cannot open proxy display connection")?;
        let alt_gc = alt.generate_id()?;
        alt.create_gc(alt_gc, window, &CreateGCAux::new().graphics_exposures(0))?;
        let proxy = WindowProxy {
            inner: Arc::new(ProxyInner {
                conn: alt,
                window,
                gc: alt_gc,
                atoms,
                native,
                pad_bytes,
            }),
            shared: Arc::clone(&shared),
        };

        let mut win = Self {
            conn,
            window,
            gc,
            atoms,
            native,
            pad_bytes,
            shared,
            slots: ImageSlots::new(options.format, options.flip_y),
            controls: Box::new(NoControls),
            options,
            caption: String::new(),
            keysyms: mapping.keysyms,
            min_keycode: first,
            syms_per_code: mapping.keysyms_per_keycode,
            proxy,
            timer: Instant::now(),
        };
        win.set_caption(caption)?;
        Ok(win)
    }

    pub fn width(&self) -> u32 {
        lock(&self.shared).map(|s| s.buf.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        lock(&self.shared).map(|s| s.buf.height()).unwrap_or(0)
    }

    pub fn format(&self) -> PixelFormat {
        self.options.format
    }

    /// Format the server consumes without conversion.
    pub fn native_format(&self) -> NativeFormat {
        self.native
    }

    pub fn wait_mode(&self) -> bool {
        self.options.wait_mode
    }

    pub fn set_wait_mode(&mut self, wait: bool) {
        self.options.wait_mode = wait;
    }

    /// Installs the widget layer that sees input events first.
    pub fn set_controls(&mut self, controls: Box<dyn ControlLayer>) {
        self.controls = controls;
    }

    /// Handle for other threads. Cheap to clone.
    pub fn proxy(&self) -> WindowProxy {
        self.proxy.clone()
    }

    /// Sets the window and icon title. Truncated to 255 bytes.
    pub fn set_caption(&mut self, caption: &str) -> Result<()> {
        let mut text = caption;
        while text.len() > 255 {
            let mut cut = 255;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text = &text[..cut];
        }
        self.caption = text.to_owned();
        self.conn.change_property8(
            PropMode::REPLACE,
            self.window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            text.as_bytes(),
        )?;
        self.conn.change_property8(
            PropMode::REPLACE,
            self.window,
            AtomEnum::WM_ICON_NAME,
            AtomEnum::STRING,
            text.as_bytes(),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Reports a message to the user. Goes to the log on this backend.
    pub fn message(&self, text: &str) {
        log::info!("{text}");
    }

    pub fn start_timer(&mut self) {
        self.timer = Instant::now();
    }

    /// Milliseconds since the last [`start_timer`](Self::start_timer).
    pub fn elapsed_time(&self) -> f64 {
        self.timer.elapsed().as_secs_f64() * 1000.0
    }

    /// Allocates image slot `idx`; zero dimensions default to the window size.
    pub fn create_img(&mut self, idx: usize, width: u32, height: u32) -> Result<()> {
        let (w, h) = {
            let shared = lock(&self.shared)?;
            (
                if width == 0 { shared.buf.width() } else { width },
                if height == 0 { shared.buf.height() } else { height },
            )
        };
        self.slots.create(idx, w, h)
    }

    /// Loads a PPM file into slot `idx`. Failures are logged, not fatal.
    pub fn load_img(&mut self, idx: usize, name: &str) -> bool {
        self.slots.load(idx, name)
    }

    /// Saves slot `idx` as a PPM file. Failures are logged, not fatal.
    pub fn save_img(&self, idx: usize, name: &str) -> bool {
        self.slots.save(idx, name)
    }

    pub fn img(&self, idx: usize) -> Option<&FrameBuffer> {
        self.slots.get(idx)
    }

    pub fn img_mut(&mut self, idx: usize) -> Option<&mut FrameBuffer> {
        self.slots.get_mut(idx)
    }

    pub fn copy_window_to_img(&mut self, idx: usize) -> Result<bool> {
        let shared = lock(&self.shared)?;
        Ok(self.slots.copy_from_window(idx, &shared.buf))
    }

    pub fn copy_img_to_window(&mut self, idx: usize) -> Result<bool> {
        let mut shared = lock(&self.shared)?;
        Ok(self.slots.copy_to_window(idx, &mut shared.buf))
    }

    /// Blits the surface (or a sub-rectangle of it) to the screen.
    pub fn update_window(&self, region: Option<Rect>) -> Result<()> {
        let shared = lock(&self.shared)?;
        blit(
            &self.conn,
            self.window,
            self.gc,
            self.native,
            self.pad_bytes,
            &shared.buf,
            region,
        )
    }

    /// Requests a full redraw on the next pump iteration.
    pub fn force_redraw(&self) -> Result<()> {
        lock(&self.shared)?.update = true;
        Ok(())
    }

    fn redraw(&mut self, handler: &mut dyn EventHandler) -> Result<()> {
        let mut shared = lock(&self.shared)?;
        handler.on_draw(&mut shared.buf);
        blit(
            &self.conn,
            self.window,
            self.gc,
            self.native,
            self.pad_bytes,
            &shared.buf,
            None,
        )
    }

    fn lookup_keysym(&self, keycode: u8, shift: bool) -> u32 {
        let per = self.syms_per_code.max(1) as usize;
        let idx = (keycode.saturating_sub(self.min_keycode)) as usize * per;
        let shifted = self.keysyms.get(idx + 1).copied().unwrap_or(0);
        if shift && per > 1 && shifted != 0 {
            shifted
        } else {
            self.keysyms.get(idx).copied().unwrap_or(0)
        }
    }

    /// Maps event coordinates to surface coordinates.
    fn cursor(&self, shared: &Shared, x: i16, y: i16) -> (i32, i32) {
        let y = if self.options.flip_y {
            shared.buf.height() as i32 - y as i32
        } else {
            y as i32
        };
        (x as i32, y)
    }

    /// Runs the event pump until the window is closed.
    pub fn run(&mut self, handler: &mut dyn EventHandler) -> Result<()> {
        {
            let mut shared = lock(&self.shared)?;
            handler.on_init(&mut shared.buf);
        }
        self.conn.map_window(self.window)?;
        self.conn.flush()?;

        let mut pending: Option<Event> = None;
        loop {
            if lock(&self.shared)?.take_redraw() {
                self.redraw(handler)?;
            }

            let event = match pending.take() {
                Some(ev) => Some(ev),
                None if self.options.wait_mode => Some(self.conn.wait_for_event()?),
                None => self.conn.poll_for_event()?,
            };
            let Some(event) = event else {
                if handler.on_idle() {
                    self.redraw(handler)?;
                }
                continue;
            };

            let mut poll_err = None;
            let (event, follower) = next_dispatch(event, self.options.wait_mode, || {
                self.conn.poll_for_event().unwrap_or_else(|e| {
                    poll_err = Some(e);
                    None
                })
            });
            if let Some(e) = poll_err {
                return Err(e.into());
            }
            pending = follower;

            if self.dispatch(handler, event)? {
                break;
            }
        }
        Ok(())
    }

    /// Handles one event. Returns `true` when the pump should stop.
    fn dispatch(&mut self, handler: &mut dyn EventHandler, event: Event) -> Result<bool> {
        let mut redraw = false;
        match event {
            Event::MapNotify(_) => {
                lock(&self.shared)?.mapped = true;
                // First draw cycle runs on map.
                self.redraw(handler)?;
            }
            Event::UnmapNotify(_) => {
                lock(&self.shared)?.mapped = false;
            }
            Event::ConfigureNotify(e) => {
                let (w, h) = (e.width as u32, e.height as u32);
                let mut shared = lock(&self.shared)?;
                if w > 0 && h > 0 && (w, h) != (shared.buf.width(), shared.buf.height()) {
                    shared.buf.resize(w, h)?;
                    handler.on_resize(&mut shared.buf);
                    redraw = true;
                }
            }
            Event::Expose(e) => {
                // Partial redraws repeat for each damage rectangle; only the
                // final one (count == 0) needs a blit of the whole frame.
                if e.count == 0 {
                    self.update_window(None)?;
                }
            }
            Event::MotionNotify(e) => {
                let mut shared = lock(&self.shared)?;
                let (x, y) = self.cursor(&shared, e.event_x, e.event_y);
                let flags = input::flags_from_state(u16::from(e.state));
                if self
                    .controls
                    .on_mouse_move(x, y, flags & input::MOUSE_LEFT != 0)
                {
                    handler.on_ctrl_change(&mut shared.buf);
                    redraw = true;
                } else if !self.controls.in_rect(x, y) {
                    redraw = handler.on_mouse_move(&mut shared.buf, x, y, flags);
                }
            }
            Event::ButtonPress(e) => {
                let mut shared = lock(&self.shared)?;
                let (x, y) = self.cursor(&shared, e.event_x, e.event_y);
                let flags = input::flags_with_button(u16::from(e.state), e.detail);
                if flags & input::MOUSE_LEFT != 0 {
                    if self.controls.on_mouse_button_down(x, y) {
                        self.controls.set_cursor(x, y);
                        handler.on_ctrl_change(&mut shared.buf);
                        redraw = true;
                    } else if self.controls.in_rect(x, y) {
                        if self.controls.set_cursor(x, y) {
                            handler.on_ctrl_change(&mut shared.buf);
                            redraw = true;
                        }
                    } else {
                        redraw = handler.on_mouse_button_down(&mut shared.buf, x, y, flags);
                    }
                }
                if flags & input::MOUSE_RIGHT != 0 {
                    redraw |= handler.on_mouse_button_down(&mut shared.buf, x, y, flags);
                }
            }
            Event::ButtonRelease(e) => {
                let mut shared = lock(&self.shared)?;
                let (x, y) = self.cursor(&shared, e.event_x, e.event_y);
                let flags = input::flags_with_button(u16::from(e.state), e.detail);
                if flags & input::MOUSE_LEFT != 0 && self.controls.on_mouse_button_up(x, y) {
                    handler.on_ctrl_change(&mut shared.buf);
                    redraw = true;
                }
                if flags & (input::MOUSE_LEFT | input::MOUSE_RIGHT) != 0 {
                    redraw |= handler.on_mouse_button_up(&mut shared.buf, x, y, flags);
                }
            }
            Event::KeyPress(e) => {
                let flags = input::flags_from_state(u16::from(e.state));
                let keysym = self.lookup_keysym(e.detail, flags & input::KBD_SHIFT != 0);
                let key = input::keysym_to_key(keysym);
                if key == keys::F2 {
                    let _ = self.copy_window_to_img(MAX_IMAGES - 1)?;
                    self.save_img(MAX_IMAGES - 1, "screenshot");
                } else if key != 0 {
                    let (left, up, right, down) = (
                        key == keys::LEFT,
                        key == keys::UP,
                        key == keys::RIGHT,
                        key == keys::DOWN,
                    );
                    let mut shared = lock(&self.shared)?;
                    if (left || up || right || down)
                        && self.controls.on_arrow_keys(left, right, down, up)
                    {
                        handler.on_ctrl_change(&mut shared.buf);
                        redraw = true;
                    } else {
                        let (x, y) = self.cursor(&shared, e.event_x, e.event_y);
                        redraw = handler.on_key(&mut shared.buf, x, y, key, flags);
                    }
                }
            }
            Event::KeyRelease(_) => {}
            Event::ClientMessage(e) => {
                if e.format == 32
                    && e.type_ == self.atoms.WM_PROTOCOLS
                    && e.data.as_data32()[0] == self.atoms.WM_DELETE_WINDOW
                {
                    debug!("close requested");
                    return Ok(true);
                }
            }
            Event::Error(e) => {
                warn!("x11 error: {e:?}");
            }
            other => {
                trace!("ignoring event {other:?}");
            }
        }
        if redraw {
            // Drawn at the top of the next pump iteration, which keeps the
            // request queued while the window is unmapped.
            lock(&self.shared)?.update = true;
        }
        Ok(false)
    }
}

impl Drop for PlatformWindow {
    fn drop(&mut self) {
        let _ = self.conn.free_gc(self.gc);
        let _ = self.conn.destroy_window(self.window);
        let _ = self.conn.flush();
    }
}

struct ProxyInner {
    conn: RustConnection,
    window: Window,
    gc: Gcontext,
    atoms: Atoms,
    native: NativeFormat,
    pad_bytes: usize,
}

/// Cross-thread handle to a window. All requests go out over a dedicated
/// connection, so they are safe while the pump thread blocks for events.
#[derive(Clone)]
pub struct WindowProxy {
    inner: Arc<ProxyInner>,
    shared: Arc<Mutex<Shared>>,
}

impl WindowProxy {
    pub fn is_mapped(&self) -> bool {
        lock(&self.shared).map(|s| s.mapped).unwrap_or(false)
    }

    /// Draws into the surface under the lock, then blits `region` of it.
    /// Nothing is sent while the window is unmapped.
    pub fn update_region(
        &self,
        region: Option<Rect>,
        draw: impl FnOnce(&mut FrameBuffer),
    ) -> Result<()> {
        let mut shared = lock(&self.shared)?;
        draw(&mut shared.buf);
        if !shared.mapped {
            return Ok(());
        }
        blit(
            &self.inner.conn,
            self.inner.window,
            self.inner.gc,
            self.inner.native,
            self.inner.pad_bytes,
            &shared.buf,
            region,
        )
    }

    /// Wakes the pump and makes it run the handler's draw pass.
    pub fn force_redraw(&self) -> Result<()> {
        {
            let mut shared = lock(&self.shared)?;
            shared.update = true;
            if !shared.mapped {
                return Ok(());
            }
        }
        let expose = ExposeEvent {
            response_type: EXPOSE_EVENT,
            sequence: 0,
            window: self.inner.window,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            count: 0,
        };
        self.inner
            .conn
            .send_event(false, self.inner.window, EventMask::EXPOSURE, expose)?;
        self.inner.conn.flush()?;
        Ok(())
    }

    /// Asks the pump to shut down, as if the window manager closed us.
    pub fn request_close(&self) -> Result<()> {
        let msg = ClientMessageEvent::new(
            32,
            self.inner.window,
            self.inner.atoms.WM_PROTOCOLS,
            [self.inner.atoms.WM_DELETE_WINDOW, 0, 0, 0, 0],
        );
        self.inner
            .conn
            .send_event(false, self.inner.window, EventMask::NO_EVENT, msg)?;
        self.inner.conn.flush()?;
        Ok(())
    }
}

fn root_visual(screen: &Screen) -> Result<(u8, Visualtype)> {
    for depth in &screen.allowed_depths {
        for visual in &depth.visuals {
            if visual.visual_id == screen.root_visual {
                return Ok((depth.depth, *visual));
            }
        }
    }
    bail!("server does not advertise its own root visual")
}

/// Scanline padding in bytes for ZPixmap rows of our depth.
fn scanline_pad(conn: &RustConnection, depth: u8, native: &NativeFormat) -> Result<usize> {
    let format = conn
        .setup()
        .pixmap_formats
        .iter()
        .find(|f| f.depth == depth)
        .with_context(|| format!("no pixmap format for depth {depth}"))?;
    if format.bits_per_pixel as usize != native.bits_per_pixel {
        bail!(
            "server stores depth {depth} pixmaps at {} bpp, need {}",
            format.bits_per_pixel,
            native.bits_per_pixel
        );
    }
    Ok((format.scanline_pad as usize) / 8)
}

/// Sends `region` of the surface to the window, converting to the native
/// format when needed. `None` means the whole surface.
fn blit(
    conn: &impl Connection,
    window: Window,
    gc: Gcontext,
    native: NativeFormat,
    pad_bytes: usize,
    buf: &FrameBuffer,
    region: Option<Rect>,
) -> Result<()> {
    let bounds = Rect::of_size(buf.width(), buf.height());
    let Some(r) = clip_region(region, bounds) else {
        return Ok(());
    };

    // Window y runs top-down; a bottom-up surface flips the rectangle.
    let dst_y = if buf.flip_y() {
        buf.height() as i32 - (r.y1 + r.height() as i32)
    } else {
        r.y1
    };

    let whole = r == bounds && buf.format() == native.format;
    let scratch;
    let (data, row_len) = if whole {
        (buf.bytes(), buf.row_len())
    } else {
        scratch = convert_region(buf, r, native.format)?;
        (scratch.bytes(), scratch.row_len())
    };

    // ZPixmap rows must land on the server's scanline pad.
    let padded;
    let (data, stride) = if pad_bytes > 1 && row_len % pad_bytes != 0 {
        let stride = row_len.div_ceil(pad_bytes) * pad_bytes;
        let mut out = vec![0u8; stride * r.height() as usize];
        for (src, dst) in data
            .chunks_exact(row_len)
            .zip(out.chunks_exact_mut(stride))
        {
            dst[..row_len].copy_from_slice(src);
        }
        padded = out;
        (&padded[..], stride)
    } else {
        (data, row_len)
    };

    // The server caps the request size, so big frames go out in row bands.
    let height = r.height();
    let band = rows_per_band(stride, height, conn.maximum_request_bytes());
    let mut y = 0;
    while y < height {
        let rows = band.min(height - y);
        let start = y as usize * stride;
        conn.put_image(
            ImageFormat::Z_PIXMAP,
            window,
            gc,
            r.width() as u16,
            rows as u16,
            r.x1 as i16,
            (dst_y + y as i32) as i16,
            0,
            native.depth,
            &data[start..start + rows as usize * stride],
        )?;
        y += rows;
    }
    conn.flush()?;
    Ok(())
}

/// Room kept for the PutImage request header and fixed fields.
const PUT_IMAGE_OVERHEAD: usize = 1024;

/// How many image rows fit into one PutImage request under the server's
/// maximum request size. At least one row goes out per request.
fn rows_per_band(stride: usize, height: u32, max_request_bytes: usize) -> u32 {
    let budget = max_request_bytes.saturating_sub(PUT_IMAGE_OVERHEAD);
    ((budget / stride.max(1)) as u32).max(1).min(height.max(1))
}

/// Applies motion coalescing to a freshly fetched event. Polling mode
/// collapses a motion burst down to its newest position, handing the first
/// non-motion follower back for the next iteration; blocking mode processes
/// one event per iteration and passes it through untouched.
fn next_dispatch(
    event: Event,
    wait_mode: bool,
    next: impl FnMut() -> Option<Event>,
) -> (Event, Option<Event>) {
    match event {
        Event::MotionNotify(m) if !wait_mode => {
            let (last, follower) = coalesce_motion(m, next);
            (Event::MotionNotify(last), follower)
        }
        other => (other, None),
    }
}

/// Pulls events until a non-motion one shows up, keeping only the newest
/// motion. Returns the motion to deliver and the follower to handle next.
fn coalesce_motion(
    first: MotionNotifyEvent,
    mut next: impl FnMut() -> Option<Event>,
) -> (MotionNotifyEvent, Option<Event>) {
    let mut last = first;
    loop {
        match next() {
            Some(Event::MotionNotify(m)) => last = m,
            Some(other) => return (last, Some(other)),
            None => return (last, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(x: i16) -> MotionNotifyEvent {
        MotionNotifyEvent {
            event_x: x,
            ..Default::default()
        }
    }

    #[test]
    fn motion_burst_collapses_to_last() {
        let mut queue = vec![
            Event::MotionNotify(motion(2)),
            Event::MotionNotify(motion(3)),
        ]
        .into_iter();
        let (last, follower) = coalesce_motion(motion(1), || queue.next());
        assert_eq!(last.event_x, 3);
        assert!(follower.is_none());
    }

    #[test]
    fn non_motion_follower_is_pushed_back() {
        let mut queue = vec![
            Event::MotionNotify(motion(2)),
            Event::MapNotify(Default::default()),
            Event::MotionNotify(motion(9)),
        ]
        .into_iter();
        let (last, follower) = coalesce_motion(motion(1), || queue.next());
        assert_eq!(last.event_x, 2);
        assert!(matches!(follower, Some(Event::MapNotify(_))));
        // The later motion stays queued for the next pump iteration.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn empty_queue_returns_first_motion() {
        let (last, follower) = coalesce_motion(motion(7), || None);
        assert_eq!(last.event_x, 7);
        assert!(follower.is_none());
    }

    #[test]
    fn blocking_mode_keeps_intermediate_motions() {
        let mut polled = false;
        let (ev, follower) = next_dispatch(Event::MotionNotify(motion(1)), true, || {
            polled = true;
            None
        });
        assert!(!polled, "blocking mode must not drain the queue");
        assert!(matches!(ev, Event::MotionNotify(m) if m.event_x == 1));
        assert!(follower.is_none());
    }

    #[test]
    fn polling_mode_coalesces() {
        let mut queue = vec![Event::MotionNotify(motion(5))].into_iter();
        let (ev, follower) = next_dispatch(Event::MotionNotify(motion(4)), false, || queue.next());
        assert!(matches!(ev, Event::MotionNotify(m) if m.event_x == 5));
        assert!(follower.is_none());
    }

    #[test]
    fn redraw_requests_stay_queued_until_mapped() {
        let buf = FrameBuffer::new(4, 4, PixelFormat::Bgra32, false).unwrap();
        let mut shared = Shared {
            buf,
            mapped: false,
            update: true,
        };
        assert!(!shared.take_redraw());
        assert!(shared.update, "unmapped claim must not drop the request");
        shared.mapped = true;
        assert!(shared.take_redraw());
        assert!(!shared.take_redraw());
    }

    #[test]
    fn oversized_frame_splits_into_request_sized_bands() {
        // 4096x4096 at 32 bpp is past a 16 MiB request cap.
        let stride = 4096 * 4;
        let cap = 16 * 1024 * 1024;
        let rows = rows_per_band(stride, 4096, cap);
        assert!(rows >= 1 && rows < 4096);
        assert!(rows as usize * stride + PUT_IMAGE_OVERHEAD <= cap);
    }

    #[test]
    fn small_frame_goes_out_in_one_band() {
        assert_eq!(rows_per_band(640 * 4, 480, 16 * 1024 * 1024), 480);
    }
}
