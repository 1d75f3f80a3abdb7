//! Input model handed in by the presentation layer.

/// A key press, after the presentation layer has resolved its bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    /// A letter (or one of `@[\]^_`) with Control held.
    Ctrl(char),
    Enter,
    Backspace,
    Tab,
    Esc,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
}

impl Key {
    /// The bytes a shell expects for this key in normal cursor mode.
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Key::Char(c) => {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf).as_bytes().to_vec()
            }
            Key::Ctrl(c) => match c.to_ascii_lowercase() {
                c @ ('a'..='z' | '@' | '[' | '\\' | ']' | '^' | '_') => vec![(c as u8) & 0x1f],
                '?' => vec![0x7f],
                _ => Vec::new(),
            },
            Key::Enter => vec![b'\r'],
            Key::Backspace => vec![0x7f],
            Key::Tab => vec![b'\t'],
            Key::Esc => vec![0x1b],
            Key::Up => b"\x1b[A".to_vec(),
            Key::Down => b"\x1b[B".to_vec(),
            Key::Right => b"\x1b[C".to_vec(),
            Key::Left => b"\x1b[D".to_vec(),
            Key::Home => b"\x1b[H".to_vec(),
            Key::End => b"\x1b[F".to_vec(),
            Key::PageUp => b"\x1b[5~".to_vec(),
            Key::PageDown => b"\x1b[6~".to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Key(Key),
    Paste,
    CopyAll,
    EnterSelection,
    OpenHistorySearch,
    NewTab,
    CloseTab,
    NextTab,
    PrevTab,
    RetryTab,
    RecallPrevious,
    RecallNext,
    ScrollUp,
    ScrollDown,
    Resize { rows: u16, cols: u16 },
    /// Periodic housekeeping: poll exit codes of finished sessions.
    Tick,
}
