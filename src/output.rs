//! # output
//! Report text goes straight to fd 2 with nothing but `write(2)`, so the same
//! path works from signal handlers. Formatting happens into a fixed stack
//! buffer, mirroring the `vsnprintf`-into-4K-buffer scheme of classic
//! sanitizer runtimes.
use core::fmt::{self, Write};

const BUFFER_SIZE: usize = 4096;

pub fn write_stderr(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let rc = unsafe { libc::write(2, bytes.as_ptr() as *const libc::c_void, bytes.len()) };
        if rc <= 0 {
            return;
        }
        bytes = &bytes[rc as usize..];
    }
}

pub fn pid() -> u32 {
    unsafe { libc::getpid() as u32 }
}

/// Stack-allocated formatting buffer; overlong output is truncated rather
/// than failed.
pub struct LineBuffer {
    buf: [u8; BUFFER_SIZE],
    len: usize,
}

impl LineBuffer {
    pub const fn new() -> Self {
        LineBuffer {
            buf: [0; BUFFER_SIZE],
            len: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn flush(&mut self) {
        write_stderr(&self.buf[..self.len]);
        self.len = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = BUFFER_SIZE - self.len;
        let take = s.len().min(avail);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Format and write one chunk of report text to stderr.
#[macro_export]
macro_rules! asan_printf {
    ($($arg:tt)*) => {{
        use ::core::fmt::Write as _;
        let mut buf = $crate::output::LineBuffer::new();
        let _ = ::core::write!(buf, $($arg)*);
        buf.flush();
    }};
}
