// SPDX-License-Identifier: GPL-3.0-only

//! Line assembly with terminal semantics
//!
//! ddrescue redraws its status block in place: it returns the cursor with
//! `\r`, moves it up with `ESC [ A`, and overwrites. Raw chunks can split a
//! line, a CRLF pair, or an escape sequence anywhere.

const ESC: u8 = 0x1b;

#[derive(Debug, Default)]
pub(crate) struct LineAssembler {
    current: Vec<u8>,
    pending_cr: bool,
}

impl LineAssembler {
    /// Consume a chunk and return the lines it completed, control
    /// sequences stripped. Lines that held only cursor movement are dropped.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut completed = Vec::new();

        for &byte in chunk {
            if self.pending_cr {
                match byte {
                    b'\r' => continue,
                    b'\n' => {
                        self.pending_cr = false;
                        self.complete(&mut completed);
                        continue;
                    }
                    ESC => {
                        self.pending_cr = false;
                        self.complete(&mut completed);
                    }
                    _ => {
                        // Carriage return followed by text rewrites the line.
                        self.pending_cr = false;
                        self.current.clear();
                    }
                }
            }

            match byte {
                b'\r' => self.pending_cr = true,
                b'\n' => self.complete(&mut completed),
                _ => self.current.push(byte),
            }
        }

        completed
    }

    /// Flush whatever is buffered at end of stream.
    pub(crate) fn finish(&mut self) -> Option<String> {
        self.pending_cr = false;
        let mut completed = Vec::new();
        self.complete(&mut completed);
        completed.pop()
    }

    fn complete(&mut self, completed: &mut Vec<String>) {
        let raw = std::mem::take(&mut self.current);
        let line = strip_control(&raw);
        if !line.trim().is_empty() {
            completed.push(line);
        }
    }
}

/// Remove CSI sequences, two-byte escapes and other control characters.
pub(crate) fn strip_control(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut index = 0;

    while index < raw.len() {
        let byte = raw[index];
        if byte == ESC {
            index += 1;
            if raw.get(index) == Some(&b'[') {
                index += 1;
                // Parameters and intermediates run until a final byte in 0x40..=0x7e.
                while index < raw.len() && !(0x40..=0x7e).contains(&raw[index]) {
                    index += 1;
                }
            }
            index += 1;
            continue;
        }
        if byte == b'\t' || byte >= 0x20 {
            out.push(byte);
        }
        index += 1;
    }

    String::from_utf8_lossy(&out).trim_end().to_string()
}
