//! Periodic snapshots of the framebuffer, written out as binary PPM images.

use log::{debug, warn};
use riscy_core::resources::framebuffer::{Frame, FramebufferHandle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Encodes `frame` as a binary (P6) PPM image. The alpha channel is dropped.
pub fn encode_ppm(frame: &Frame) -> Vec<u8> {
    let header = format!("P6\n{} {}\n255\n", frame.width(), frame.height());
    let mut out = Vec::with_capacity(header.len() + frame.pixels().len() * 3);
    out.extend_from_slice(header.as_bytes());
    for pixel in frame.pixels() {
        let [_alpha, red, green, blue] = pixel.to_be_bytes();
        out.extend_from_slice(&[red, green, blue]);
    }
    out
}

/// Overwrites `path` with the current frame every `period`. Never returns.
///
/// The framebuffer lock is only held while copying the pixels, not while encoding or writing.
pub async fn dump_frames(handle: FramebufferHandle, path: PathBuf, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let frame = handle.snapshot();
        match tokio::fs::write(&path, encode_ppm(&frame)).await {
            Ok(()) => debug!("wrote frame to {}", path.display()),
            Err(error) => warn!("cannot write frame to {}: {error}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riscy_core::bus::Bus;
    use riscy_core::resources::framebuffer::Framebuffer;

    #[test]
    fn test_encode_ppm() {
        let mut framebuffer = Framebuffer::new(2, 1);
        Bus::write(&mut framebuffer, 4, &0xFF11_2233u32.to_le_bytes());
        let frame = framebuffer.handle().snapshot();

        let mut expected = b"P6\n2 1\n255\n".to_vec();
        expected.extend_from_slice(&[0, 0, 0, 0x11, 0x22, 0x33]);
        assert_eq!(expected, encode_ppm(&frame));
    }
}
