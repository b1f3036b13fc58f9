use chrono::{DateTime, Local};

use crate::api::models::DocumentData;

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const LF: u8 = 0x0a;

/// Characters per line in font A on 80mm paper
pub const LINE_WIDTH: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// Accumulates raw printer commands
#[derive(Debug)]
pub struct EscPos {
    buf: Vec<u8>,
}

impl Default for EscPos {
    fn default() -> Self {
        Self::new()
    }
}

impl EscPos {
    /// Starts with `ESC @` so leftover state from a previous job is reset
    pub fn new() -> Self {
        Self {
            buf: vec![ESC, b'@'],
        }
    }

    pub fn align(&mut self, align: Align) -> &mut Self {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        self.buf.extend_from_slice(&[ESC, b'a', n]);
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'E', u8::from(on)]);
        self
    }

    /// Character magnification, 1..=8 in each direction
    pub fn size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buf.extend_from_slice(&[GS, b'!', (w << 4) | h]);
        self
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.buf.extend(encode(text));
        self
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.text(text);
        self.buf.push(LF);
        self
    }

    pub fn divider(&mut self) -> &mut Self {
        self.line(&"-".repeat(LINE_WIDTH))
    }

    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'd', lines]);
        self
    }

    /// Feed past the cutter and do a full cut
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, b'V', 65, 3]);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Printers run in a single-byte code page; anything outside ASCII prints as `?`
fn encode(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.chars().map(|c| match c {
        '\n' | '\r' | '\t' => b' ',
        c if c.is_ascii() && !c.is_ascii_control() => c as u8,
        _ => b'?',
    })
}

fn format_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Render one kitchen ticket
pub fn render_ticket(ticket: &DocumentData, printed_at: DateTime<Local>) -> Vec<u8> {
    let mut doc = EscPos::new();

    doc.align(Align::Center)
        .bold(true)
        .size(2, 2)
        .line("KITCHEN TICKET")
        .size(1, 1)
        .bold(false)
        .feed(1);

    doc.align(Align::Left)
        .line(&format!("Order #{}", ticket.order_number));
    if let Some(table) = ticket.table_name.as_deref().filter(|t| !t.is_empty()) {
        doc.line(&format!("Table: {}", table));
    }
    let time = match ticket.timestamp.as_deref() {
        Some(raw) if !raw.is_empty() => format_timestamp(raw),
        _ => printed_at.format("%Y-%m-%d %H:%M").to_string(),
    };
    doc.line(&format!("Time: {}", time));
    doc.divider();

    for item in &ticket.items {
        doc.bold(true)
            .line(&format!("{}x {}", item.quantity, item.name))
            .bold(false);
        for modifier in &item.modifiers {
            doc.line(&format!("  + {}", modifier));
        }
        if let Some(notes) = item.notes.as_deref().filter(|n| !n.is_empty()) {
            doc.line(&format!("  Note: {}", notes));
        }
        doc.line("");
    }

    doc.divider().align(Align::Center);
    if let Some(waiter) = ticket.waiter_name.as_deref().filter(|w| !w.is_empty()) {
        doc.line(&format!("Waiter: {}", waiter));
    }
    doc.line(&format!(
        "Printed: {}",
        printed_at.format("%Y-%m-%d %H:%M:%S")
    ));
    doc.feed(3).cut();

    doc.into_bytes()
}
