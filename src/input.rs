use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;

macro_rules! key_codes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum KeyCode {
            $($variant),+
        }

        impl KeyCode {
            pub const ALL: &'static [KeyCode] = &[$(KeyCode::$variant),+];

            pub const fn name(self) -> &'static str {
                match self {
                    $(KeyCode::$variant => $name),+
                }
            }
        }
    };
}

key_codes! {
    A => "A", B => "B", C => "C", D => "D", E => "E", F => "F", G => "G", H => "H", I => "I",
    J => "J", K => "K", L => "L", M => "M", N => "N", O => "O", P => "P", Q => "Q", R => "R",
    S => "S", T => "T", U => "U", V => "V", W => "W", X => "X", Y => "Y", Z => "Z",
    Key0 => "Key0", Key1 => "Key1", Key2 => "Key2", Key3 => "Key3", Key4 => "Key4",
    Key5 => "Key5", Key6 => "Key6", Key7 => "Key7", Key8 => "Key8", Key9 => "Key9",
    Up => "Up", Down => "Down", Left => "Left", Right => "Right",
    Space => "Space", Enter => "Enter", Escape => "Escape", Tab => "Tab", Backspace => "Backspace",
    Insert => "Insert", Delete => "Delete", Home => "Home", End => "End",
    PageUp => "PageUp", PageDown => "PageDown",
    Apostrophe => "Apostrophe", Comma => "Comma", Minus => "Minus", Period => "Period",
    Slash => "Slash", Semicolon => "Semicolon", Equal => "Equal",
    LeftShift => "LeftShift", RightShift => "RightShift",
    LeftControl => "LeftControl", RightControl => "RightControl",
    LeftAlt => "LeftAlt", RightAlt => "RightAlt",
    F1 => "F1", F2 => "F2", F3 => "F3", F4 => "F4", F5 => "F5", F6 => "F6",
    F7 => "F7", F8 => "F8", F9 => "F9", F10 => "F10", F11 => "F11", F12 => "F12",
}

impl KeyCode {
    /// Names are case-sensitive: `"up"` is not `Up`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.name() == name)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A key as scripts name it. Unknown names are kept as custom bindings, so parsing never fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    Code(KeyCode),
    Custom(String),
}

impl KeyId {
    pub fn parse(name: &str) -> Self {
        match KeyCode::from_name(name) {
            Some(code) => KeyId::Code(code),
            None => KeyId::Custom(name.to_string()),
        }
    }
}

impl From<KeyCode> for KeyId {
    fn from(code: KeyCode) -> Self {
        KeyId::Code(code)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::parse(name)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Code(code) => f.write_str(code.name()),
            KeyId::Custom(name) => f.write_str(name),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyState: u8 {
        const DOWN = 1 << 0;
        const PRESSED = 1 << 1;
        const RELEASED = 1 << 2;
    }
}

pub type KeyMap = BTreeMap<KeyId, KeyState>;

pub enum InputEvent {
    Key { key: KeyId, pressed: bool },
}

/// Engine-side key tracker. The windowing backend reports events, scripts only ever see a
/// [`KeyMap`] copy taken at the start of a frame.
#[derive(Debug, Clone, Default)]
pub struct Input {
    keys: KeyMap,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ev: InputEvent) {
        match ev {
            InputEvent::Key { key, pressed: true } => self.press(key),
            InputEvent::Key { key, pressed: false } => self.release(key),
        }
    }

    pub fn press(&mut self, key: impl Into<KeyId>) {
        let state = self.keys.entry(key.into()).or_default();
        if !state.contains(KeyState::DOWN) {
            state.insert(KeyState::DOWN | KeyState::PRESSED);
        }
    }

    pub fn release(&mut self, key: impl Into<KeyId>) {
        let state = self.keys.entry(key.into()).or_default();
        if state.contains(KeyState::DOWN) {
            state.remove(KeyState::DOWN);
            state.insert(KeyState::RELEASED);
        }
    }

    /// Replaces the held set wholesale, deriving press/release edges against the previous frame.
    pub fn set_held<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyId>,
    {
        let held: Vec<KeyId> = keys.into_iter().map(Into::into).collect();
        let released: Vec<KeyId> = self
            .keys
            .iter()
            .filter(|(key, state)| state.contains(KeyState::DOWN) && !held.contains(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in released {
            self.release(key);
        }
        for key in held {
            self.press(key);
        }
    }

    pub fn clear_frame(&mut self) {
        self.keys.retain(|_, state| {
            state.remove(KeyState::PRESSED | KeyState::RELEASED);
            !state.is_empty()
        });
    }

    pub fn key_state(&self, key: &KeyId) -> KeyState {
        self.keys.get(key).copied().unwrap_or_default()
    }

    pub fn is_down(&self, key: impl Into<KeyId>) -> bool {
        self.key_state(&key.into()).contains(KeyState::DOWN)
    }

    pub fn snapshot(&self) -> KeyMap {
        self.keys.clone()
    }
}
