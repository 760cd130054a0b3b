//! The host terminal as the serial console of the guest.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use riscy_core::resources::uart::Console;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// How long to wait for a key press before checking whether to stop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sets the terminal to raw mode on creation, and resets it back when dropped.
pub struct RawModeGuard {}

impl RawModeGuard {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self {})
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Resetting the terminal is on a best effort basis
        let _ = disable_raw_mode();
    }
}

/// Writes guest output to stdout and hands out the key presses collected by [`forward_keys`].
#[derive(Debug)]
pub struct TerminalConsole {
    input: UnboundedReceiver<u8>,
    /// In raw mode the terminal no longer turns `\n` into `\r\n` by itself.
    raw: bool,
}

impl TerminalConsole {
    pub fn new(input: UnboundedReceiver<u8>, raw: bool) -> Self {
        Self { input, raw }
    }
}

impl Console for TerminalConsole {
    fn write_byte(&mut self, byte: u8) {
        let mut stdout = io::stdout().lock();
        let bytes: &[u8] = match byte {
            b'\n' if self.raw => b"\r\n",
            _ => &[byte],
        };
        let _ = stdout.write_all(bytes).and_then(|()| stdout.flush());
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.input.try_recv().ok()
    }
}

/// Sends the bytes of every key press to `sender`, until `stop` is set.
///
/// Ctrl-C is not forwarded, it sets `stop` instead. Blocks, so run it on a blocking thread.
pub fn forward_keys(sender: UnboundedSender<u8>, stop: Arc<AtomicBool>) -> io::Result<()> {
    while !stop.load(Ordering::Relaxed) {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            stop.store(true, Ordering::Relaxed);
            break;
        }
        for byte in key_bytes(key) {
            if sender.send(byte).is_err() {
                // The console is gone, so is the engine
                return Ok(());
            }
        }
    }
    Ok(())
}

/// The bytes a VT100 terminal would send for `key`.
fn key_bytes(key: KeyEvent) -> Vec<u8> {
    match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            if c.is_ascii_alphabetic() {
                vec![c.to_ascii_lowercase() as u8 & 0x1F]
            } else {
                Vec::new()
            }
        }
        KeyCode::Char(c) => {
            let mut buf = [0; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7F],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::Esc => vec![0x1B],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_bytes() {
        assert_eq!(vec![b'a'], key_bytes(key(KeyCode::Char('a'), KeyModifiers::NONE)));
        assert_eq!(vec![b'A'], key_bytes(key(KeyCode::Char('A'), KeyModifiers::SHIFT)));
        assert_eq!(
            "é".as_bytes().to_vec(),
            key_bytes(key(KeyCode::Char('é'), KeyModifiers::NONE))
        );
        assert_eq!(vec![b'\r'], key_bytes(key(KeyCode::Enter, KeyModifiers::NONE)));
        assert_eq!(b"\x1b[D".to_vec(), key_bytes(key(KeyCode::Left, KeyModifiers::NONE)));
        assert!(key_bytes(key(KeyCode::F(1), KeyModifiers::NONE)).is_empty());
    }

    #[test]
    fn test_control_keys() {
        assert_eq!(vec![0x04], key_bytes(key(KeyCode::Char('d'), KeyModifiers::CONTROL)));
        assert_eq!(vec![0x01], key_bytes(key(KeyCode::Char('A'), KeyModifiers::CONTROL)));
        assert!(key_bytes(key(KeyCode::Char('1'), KeyModifiers::CONTROL)).is_empty());
    }

    #[test]
    fn test_console_reads_forwarded_bytes() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut console = TerminalConsole::new(receiver, false);
        assert_eq!(None, console.read_byte());
        sender.send(b'x').unwrap();
        sender.send(b'y').unwrap();
        assert_eq!(Some(b'x'), console.read_byte());
        assert_eq!(Some(b'y'), console.read_byte());
        drop(sender);
        assert_eq!(None, console.read_byte());
    }
}
