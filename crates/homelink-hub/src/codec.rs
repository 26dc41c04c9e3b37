//! Byte-stuffed record framing for the hub wire.
//!
//! A frame is `START .. payload .. END` where payload occurrences of the
//! sentinel bytes are escaped as `ESC` followed by the sentinel with bit 5
//! set (0x42/0x43/0x44 → 0x62/0x63/0x64). Decoding clears bit 5 again.

/// Frame start sentinel.
pub const START: u8 = 0x42;
/// Frame end sentinel.
pub const END: u8 = 0x43;
/// Escape byte.
pub const ESC: u8 = 0x44;

/// Wrap `payload` into a single wire frame.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 2);
    packet.push(START);

    for &byte in payload {
        match byte {
            START | END | ESC => {
                packet.push(ESC);
                packet.push(byte | 0x20);
            }
            _ => packet.push(byte),
        }
    }

    packet.push(END);
    packet
}

/// Reassembles frames from a TCP stream.
///
/// Tolerates multiple frames per read and frames split across reads. A fresh
/// `START` mid-record drops the partial frame accumulated so far.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.iter().position(|&b| b == END)?;
        let mut frame = Vec::with_capacity(end);
        let mut i = 0;

        while i < end {
            match self.buffer[i] {
                START => frame.clear(),
                ESC => {
                    i += 1;
                    if i < end {
                        frame.push(self.buffer[i] & 0xDF);
                    }
                }
                byte => frame.push(byte),
            }

            i += 1;
        }

        self.buffer.drain(..=end);
        Some(frame)
    }
}
