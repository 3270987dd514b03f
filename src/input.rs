//! Input flags and keyboard translation.
//!
//! Mouse and modifier state is packed into a small bitset passed to every
//! handler callback. Key events carry a portable key code; anything printable
//! comes through as its Latin-1 value, everything else maps onto the named
//! constants in [`keys`].

/// Left mouse button is held.
pub const MOUSE_LEFT: u32 = 1;
/// Right mouse button is held.
pub const MOUSE_RIGHT: u32 = 2;
/// A Shift key is held.
pub const KBD_SHIFT: u32 = 4;
/// A Control key is held.
pub const KBD_CTRL: u32 = 8;

/// Portable key codes for non-printable keys.
pub mod keys {
    pub const BACKSPACE: u32 = 8;
    pub const TAB: u32 = 9;
    pub const CLEAR: u32 = 12;
    pub const RETURN: u32 = 13;
    pub const PAUSE: u32 = 19;
    pub const ESCAPE: u32 = 27;
    pub const DELETE: u32 = 127;

    pub const KP0: u32 = 256;
    pub const KP1: u32 = 257;
    pub const KP2: u32 = 258;
    pub const KP3: u32 = 259;
    pub const KP4: u32 = 260;
    pub const KP5: u32 = 261;
    pub const KP6: u32 = 262;
    pub const KP7: u32 = 263;
    pub const KP8: u32 = 264;
    pub const KP9: u32 = 265;
    pub const KP_PERIOD: u32 = 266;
    pub const KP_DIVIDE: u32 = 267;
    pub const KP_MULTIPLY: u32 = 268;
    pub const KP_MINUS: u32 = 269;
    pub const KP_PLUS: u32 = 270;
    pub const KP_ENTER: u32 = 271;
    pub const KP_EQUALS: u32 = 272;

    pub const UP: u32 = 273;
    pub const DOWN: u32 = 274;
    pub const RIGHT: u32 = 275;
    pub const LEFT: u32 = 276;
    pub const INSERT: u32 = 277;
    pub const HOME: u32 = 278;
    pub const END: u32 = 279;
    pub const PAGE_UP: u32 = 280;
    pub const PAGE_DOWN: u32 = 281;

    pub const F1: u32 = 282;
    pub const F2: u32 = 283;
    pub const F3: u32 = 284;
    pub const F4: u32 = 285;
    pub const F5: u32 = 286;
    pub const F6: u32 = 287;
    pub const F7: u32 = 288;
    pub const F8: u32 = 289;
    pub const F9: u32 = 290;
    pub const F10: u32 = 291;
    pub const F11: u32 = 292;
    pub const F12: u32 = 293;
    pub const F13: u32 = 294;
    pub const F14: u32 = 295;
    pub const F15: u32 = 296;

    pub const NUMLOCK: u32 = 300;
    pub const CAPSLOCK: u32 = 301;
    pub const SCROLLOCK: u32 = 302;
}

/// Decodes the X11 core-protocol state mask into our flag bits, merging in
/// mouse buttons for events where the mask reflects the prior state.
pub fn flags_from_state(state: u16) -> u32 {
    // Core protocol mask bits: Shift=1, Control=4, Button1=0x100, Button3=0x400.
    let mut flags = 0;
    if state & 0x0001 != 0 {
        flags |= KBD_SHIFT;
    }
    if state & 0x0004 != 0 {
        flags |= KBD_CTRL;
    }
    if state & 0x0100 != 0 {
        flags |= MOUSE_LEFT;
    }
    if state & 0x0400 != 0 {
        flags |= MOUSE_RIGHT;
    }
    flags
}

/// Flags for a button event: the prior state mask merged with the button
/// the event itself reports. Buttons other than left and right contribute
/// no button flag.
pub fn flags_with_button(state: u16, button: u8) -> u32 {
    let mut flags = flags_from_state(state);
    match button {
        1 => flags |= MOUSE_LEFT,
        3 => flags |= MOUSE_RIGHT,
        _ => {}
    }
    flags
}

/// Maps an X keysym to a portable key code. Latin-1 keysyms pass through
/// unchanged; unmapped function keysyms come back as 0.
pub fn keysym_to_key(keysym: u32) -> u32 {
    use keys::*;
    match keysym {
        // XK_BackSpace .. XK_Escape
        0xFF08 => BACKSPACE,
        0xFF09 => TAB,
        0xFF0B => CLEAR,
        0xFF0D => RETURN,
        0xFF13 => PAUSE,
        0xFF1B => ESCAPE,
        0xFFFF => DELETE,

        // Keypad digits and operators.
        0xFFB0..=0xFFB9 => KP0 + (keysym - 0xFFB0),
        0xFFAE => KP_PERIOD,
        0xFFAF => KP_DIVIDE,
        0xFFAA => KP_MULTIPLY,
        0xFFAD => KP_MINUS,
        0xFFAB => KP_PLUS,
        0xFF8D => KP_ENTER,
        0xFFBD => KP_EQUALS,

        // Keypad navigation cluster (NumLock off).
        0xFF95 => HOME,
        0xFF96 => LEFT,
        0xFF97 => UP,
        0xFF98 => RIGHT,
        0xFF99 => DOWN,
        0xFF9A => PAGE_UP,
        0xFF9B => PAGE_DOWN,
        0xFF9C => END,
        0xFF9D => KP5,
        0xFF9E => INSERT,
        0xFF9F => DELETE,

        // Cursor and editing keys.
        0xFF50 => HOME,
        0xFF51 => LEFT,
        0xFF52 => UP,
        0xFF53 => RIGHT,
        0xFF54 => DOWN,
        0xFF55 => PAGE_UP,
        0xFF56 => PAGE_DOWN,
        0xFF57 => END,
        0xFF63 => INSERT,

        // Function keys.
        0xFFBE..=0xFFCC => F1 + (keysym - 0xFFBE),

        0xFF7F => NUMLOCK,
        0xFFE5 => CAPSLOCK,
        0xFF14 => SCROLLOCK,

        // Printable Latin-1.
        0x20..=0xFF => keysym,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mask_decodes_all_four_flags() {
        assert_eq!(flags_from_state(0), 0);
        assert_eq!(flags_from_state(0x0001), KBD_SHIFT);
        assert_eq!(flags_from_state(0x0004), KBD_CTRL);
        assert_eq!(flags_from_state(0x0100), MOUSE_LEFT);
        assert_eq!(flags_from_state(0x0400), MOUSE_RIGHT);
        assert_eq!(
            flags_from_state(0x0505),
            KBD_SHIFT | KBD_CTRL | MOUSE_LEFT | MOUSE_RIGHT
        );
    }

    #[test]
    fn only_left_and_right_buttons_raise_flags() {
        assert_eq!(flags_with_button(0, 1), MOUSE_LEFT);
        assert_eq!(flags_with_button(0, 3), MOUSE_RIGHT);
        // A bare middle-button event carries no button flag.
        assert_eq!(flags_with_button(0, 2), 0);
        assert_eq!(flags_with_button(0x0001, 3), KBD_SHIFT | MOUSE_RIGHT);
    }

    #[test]
    fn arrow_and_function_keysyms_map() {
        assert_eq!(keysym_to_key(0xFF52), keys::UP);
        assert_eq!(keysym_to_key(0xFF54), keys::DOWN);
        assert_eq!(keysym_to_key(0xFF51), keys::LEFT);
        assert_eq!(keysym_to_key(0xFF53), keys::RIGHT);
        assert_eq!(keysym_to_key(0xFFBE), keys::F1);
        assert_eq!(keysym_to_key(0xFFBF), keys::F2);
        assert_eq!(keysym_to_key(0xFFCC), keys::F15);
    }

    #[test]
    fn home_maps_to_home() {
        assert_eq!(keysym_to_key(0xFF50), keys::HOME);
        assert_eq!(keysym_to_key(0xFF57), keys::END);
    }

    #[test]
    fn printable_latin1_passes_through() {
        assert_eq!(keysym_to_key(b'a' as u32), b'a' as u32);
        assert_eq!(keysym_to_key(b' ' as u32), b' ' as u32);
        assert_eq!(keysym_to_key(0xE9), 0xE9);
    }

    #[test]
    fn keypad_cluster_maps() {
        assert_eq!(keysym_to_key(0xFFB0), keys::KP0);
        assert_eq!(keysym_to_key(0xFFB9), keys::KP9);
        assert_eq!(keysym_to_key(0xFF8D), keys::KP_ENTER);
        assert_eq!(keysym_to_key(0xFF9D), keys::KP5);
    }

    #[test]
    fn unknown_function_keysym_is_zero() {
        assert_eq!(keysym_to_key(0xFE03), 0); // ISO_Level3_Shift
    }
}
