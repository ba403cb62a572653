use std::collections::VecDeque;
use std::fmt::Write as _;

use uartbench_decode::Ticks;

use crate::TextEncoding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEntry {
    /// Simulated tick of the frame's start edge (Tx) or of its stop sample (Rx).
    pub timestamp: Ticks,
    pub direction: Direction,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Decoded by the receiver.
    Rx,
    /// Driven onto the line by the stimulus.
    Tx,
}

impl Direction {
    fn prefix(self) -> &'static str {
        match self {
            Direction::Rx => "RX: ",
            Direction::Tx => "TX: ",
        }
    }
}

/// Bounded record of traffic seen during a harness run. The oldest entries
/// are dropped first.
#[derive(Debug)]
pub struct CaptureLog {
    entries: VecDeque<CaptureEntry>,
    max_entries: usize,
    show_rx: bool,
    show_tx: bool,
}

impl CaptureLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            show_rx: true,
            show_tx: true,
        }
    }

    pub fn set_filter(&mut self, show_rx: bool, show_tx: bool) {
        self.show_rx = show_rx;
        self.show_tx = show_tx;
    }

    pub fn push(&mut self, timestamp: Ticks, direction: Direction, data: Vec<u8>) {
        self.entries.push_back(CaptureEntry {
            timestamp,
            direction,
            data,
        });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CaptureEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All bytes recorded in one direction, in order.
    pub fn bytes(&self, direction: Direction) -> Vec<u8> {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .flat_map(|e| e.data.iter().copied())
            .collect()
    }

    pub fn to_text(&self, show_timestamp: bool, show_hex: bool) -> String {
        self.to_text_with_encoding(show_timestamp, show_hex, TextEncoding::Auto)
    }

    /// Renders visible entries. Hex mode prints one line per entry; text
    /// mode joins consecutive same-direction bytes and breaks lines on `\n`.
    pub fn to_text_with_encoding(
        &self,
        show_timestamp: bool,
        show_hex: bool,
        encoding: TextEncoding,
    ) -> String {
        let mut out = String::new();
        let visible = self.entries.iter().filter(|e| self.is_visible(e.direction));

        if show_hex {
            for entry in visible {
                push_prefix(&mut out, entry.timestamp, entry.direction, show_timestamp);
                for byte in &entry.data {
                    let _ = write!(out, "{byte:02X} ");
                }
                out.push('\n');
            }
            return out;
        }

        let mut pending: Option<CaptureEntry> = None;
        for entry in visible {
            for &byte in &entry.data {
                let continues = pending
                    .as_ref()
                    .is_some_and(|line| line.direction == entry.direction);
                if !continues {
                    if let Some(line) = pending.take() {
                        push_line(&mut out, &line, show_timestamp, encoding);
                    }
                    pending = Some(CaptureEntry {
                        timestamp: entry.timestamp,
                        direction: entry.direction,
                        data: Vec::new(),
                    });
                }
                if let Some(line) = pending.as_mut() {
                    line.data.push(byte);
                }
                if byte == b'\n' {
                    if let Some(line) = pending.take() {
                        push_line(&mut out, &line, show_timestamp, encoding);
                    }
                }
            }
        }
        if let Some(line) = pending {
            push_line(&mut out, &line, show_timestamp, encoding);
        }
        out
    }

    fn is_visible(&self, direction: Direction) -> bool {
        match direction {
            Direction::Rx => self.show_rx,
            Direction::Tx => self.show_tx,
        }
    }
}

fn push_prefix(out: &mut String, timestamp: Ticks, direction: Direction, show_timestamp: bool) {
    if show_timestamp {
        let _ = write!(out, "[{timestamp:>14}] ");
    }
    out.push_str(direction.prefix());
}

fn push_line(out: &mut String, line: &CaptureEntry, show_timestamp: bool, encoding: TextEncoding) {
    let text = encoding.decode(&line.data);
    if text.trim().is_empty() {
        return;
    }
    push_prefix(out, line.timestamp, line.direction, show_timestamp);
    out.push_str(&text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
}
