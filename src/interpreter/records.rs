//! Record-level input: splitting byte streams into records by RS, including
//! paragraph mode, plus the per-source plumbing the ARGV loop drives.

use std::fs::File;
use std::io::{self, BufRead, BufReader};

/// Record separation policy derived from RS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSep {
    /// RS == "": records are runs of non-blank lines separated by blank lines
    Paragraph,
    /// Records end at this byte (the first byte of RS)
    Byte(u8),
}

pub fn separator_for(rs: &str) -> RecordSep {
    match rs.as_bytes().first() {
        None => RecordSep::Paragraph,
        Some(&b) => RecordSep::Byte(b),
    }
}

/// Read one record. Returns None at end of input.
pub fn read_record<R: BufRead + ?Sized>(
    reader: &mut R,
    sep: RecordSep,
) -> io::Result<Option<String>> {
    match sep {
        RecordSep::Byte(b) => read_until_byte(reader, b),
        RecordSep::Paragraph => read_paragraph(reader),
    }
}

fn read_until_byte<R: BufRead + ?Sized>(reader: &mut R, sep: u8) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader.read_until(sep, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&sep) {
        buf.pop();
        // Tolerate CRLF input when splitting on newline
        if sep == b'\n' && buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(into_text(buf)))
}

/// Paragraph mode: skip leading blank lines, then collect lines until a
/// blank line or end of input. The record keeps interior newlines.
fn read_paragraph<R: BufRead + ?Sized>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if !is_blank(&line) {
            break;
        }
    }

    let mut record = strip_newline(&line);
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 || is_blank(&line) {
            break;
        }
        record.push('\n');
        record.push_str(&strip_newline(&line));
    }

    Ok(Some(record))
}

fn is_blank(line: &[u8]) -> bool {
    matches!(line, [] | [b'\n'] | [b'\r', b'\n'])
}

fn strip_newline(line: &[u8]) -> String {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
    }
    into_text(line[..end].to_vec())
}

fn into_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// One open main-loop input: stdin or an ARGV file
pub enum InputSource<'a> {
    Stdin(Box<dyn BufRead + 'a>),
    File(BufReader<File>),
}

impl InputSource<'_> {
    pub fn reader(&mut self) -> &mut dyn BufRead {
        match self {
            InputSource::Stdin(r) => r,
            InputSource::File(r) => r,
        }
    }
}

/// Split a command-line operand of the form `name=value`; the name must be a
/// valid identifier
pub fn parse_assignment(arg: &str) -> Option<(&str, &str)> {
    let (name, value) = arg.split_once('=')?;
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, value))
}
