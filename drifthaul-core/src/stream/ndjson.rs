//! Newline-delimited JSON records re-bracketed as one JSON array.

use std::io::{self, Read};

const CHUNK: usize = 8 * 1024;

/// Streams `[rec1,rec2,...]` out of `rec1\nrec2\n...` with a fixed-size buffer.
///
/// Record-separating newlines become commas; blank lines and the trailing
/// newline are dropped.
pub struct NdjsonArrayReader<R> {
    inner: R,
    chunk: Box<[u8]>,
    out: Vec<u8>,
    out_pos: usize,
    started: bool,
    finished: bool,
    any_record: bool,
    at_separator: bool,
}

impl<R: Read> NdjsonArrayReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            chunk: vec![0u8; CHUNK].into_boxed_slice(),
            out: Vec::with_capacity(CHUNK + 2),
            out_pos: 0,
            started: false,
            finished: false,
            any_record: false,
            at_separator: false,
        }
    }
}

impl<R: Read> Read for NdjsonArrayReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.out_pos < self.out.len() {
                let n = (self.out.len() - self.out_pos).min(buf.len());
                buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                return Ok(n);
            }
            self.out.clear();
            self.out_pos = 0;
            if self.finished {
                return Ok(0);
            }
            if !self.started {
                self.started = true;
                self.out.push(b'[');
                continue;
            }
            let n = self.inner.read(&mut self.chunk)?;
            if n == 0 {
                self.out.push(b']');
                self.finished = true;
                continue;
            }
            for &byte in &self.chunk[..n] {
                match byte {
                    b'\n' | b'\r' => self.at_separator = self.any_record,
                    _ => {
                        if self.at_separator {
                            self.out.push(b',');
                            self.at_separator = false;
                        }
                        self.any_record = true;
                        self.out.push(byte);
                    }
                }
            }
        }
    }
}
