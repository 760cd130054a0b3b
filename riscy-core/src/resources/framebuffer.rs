//! Memory-mapped linear framebuffer shared with a presenter on another thread.

use crate::bus::Bus;
use log::warn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Bytes per pixel. Every pixel is one little-endian `0xAARRGGBB` word.
pub const BYTES_PER_PIXEL: usize = 4;

/// A copy of the framebuffer contents at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Frame {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The pixels in row-major order.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Returns `None` if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.len() * BYTES_PER_PIXEL
    }
}

/// Cloneable handle to the pixels of a [`Framebuffer`].
///
/// The engine writes through the [`Framebuffer`] while a presenter takes snapshots through this
/// handle. A poisoned lock is recovered rather than propagated, since the pixel data is valid at
/// every point in time.
#[derive(Debug, Clone)]
pub struct FramebufferHandle(Arc<Mutex<Frame>>);

impl FramebufferHandle {
    fn lock(&self) -> MutexGuard<'_, Frame> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies the current contents. The lock is released before this returns.
    pub fn snapshot(&self) -> Frame {
        self.lock().clone()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let frame = self.lock();
        (frame.width, frame.height)
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    handle: FramebufferHandle,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AccessError {
    #[error("access of {size} bytes at offset {offset:#x} is outside the framebuffer")]
    OutOfBounds { offset: u32, size: usize },
}

impl Framebuffer {
    /// Create a black framebuffer of `width` by `height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            handle: FramebufferHandle(Arc::new(Mutex::new(Frame::new(width, height)))),
        }
    }

    pub fn handle(&self) -> FramebufferHandle {
        self.handle.clone()
    }

    fn check_bounds(frame: &Frame, offset: u32, size: usize) -> Result<(), AccessError> {
        let end = (offset as usize).checked_add(size);
        match end {
            Some(end) if end <= frame.byte_len() => Ok(()),
            _ => Err(AccessError::OutOfBounds { offset, size }),
        }
    }

    /// Reads bytes of the pixel data, which may cover parts of several pixels.
    pub fn read(&self, buf: &mut [u8], offset: u32) -> Result<(), AccessError> {
        let frame = self.handle.lock();
        Self::check_bounds(&frame, offset, buf.len())?;
        for (i, byte) in buf.iter_mut().enumerate() {
            let position = offset as usize + i;
            let pixel = frame.pixels[position / BYTES_PER_PIXEL];
            *byte = pixel.to_le_bytes()[position % BYTES_PER_PIXEL];
        }
        Ok(())
    }

    /// Writes bytes of the pixel data, which may cover parts of several pixels.
    pub fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), AccessError> {
        let mut frame = self.handle.lock();
        Self::check_bounds(&frame, offset, buf.len())?;
        for (i, &byte) in buf.iter().enumerate() {
            let position = offset as usize + i;
            let pixel = &mut frame.pixels[position / BYTES_PER_PIXEL];
            let mut bytes = pixel.to_le_bytes();
            bytes[position % BYTES_PER_PIXEL] = byte;
            *pixel = u32::from_le_bytes(bytes);
        }
        Ok(())
    }
}

impl Bus for Framebuffer {
    fn read(&mut self, buf: &mut [u8], address: u32) {
        if let Err(error) = Framebuffer::read(self, buf, address) {
            warn!("framebuffer: read: {error}");
            buf.fill(0);
        }
    }

    fn write(&mut self, address: u32, buf: &[u8]) {
        if let Err(error) = Framebuffer::write(self, address, buf) {
            warn!("framebuffer: write: {error}");
        }
    }
}
