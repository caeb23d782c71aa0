//! C-style format string engine backing `printf`, `sprintf`, and the
//! CONVFMT/OFMT number coercions.
//!
//! Format strings are parsed once into a list of typed segments and cached,
//! so tight printf loops pay the parse cost only on the first record.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Default CONVFMT/OFMT value
pub const DEFAULT_CONVFMT: &str = "%.6g";

/// Number of distinct format strings kept in a cache
const MAX_CACHED_FORMATS: usize = 100;

/// Conversion flags: `- + space # 0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub minus: bool,
    pub plus: bool,
    pub space: bool,
    pub hash: bool,
    pub zero: bool,
}

/// A width or precision: absent, a literal count, or `*` (taken from the args)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    None,
    Fixed(usize),
    Star,
}

/// Conversion specifier character classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conv {
    /// `d`, `i`
    Dec,
    /// `o`
    Oct,
    /// `u`
    Uns,
    /// `x`, `X`
    Hex(bool),
    /// `a`, `A`
    HexFloat(bool),
    /// `f`, `F`
    Flt,
    /// `e`, `E`
    Sci(bool),
    /// `g`, `G`
    Gen(bool),
    /// `c`
    Char,
    /// `s`
    Str,
}

/// One parsed directive
#[derive(Debug, Clone)]
pub struct ConvSpec {
    pub flags: Flags,
    pub width: Amount,
    pub precision: Amount,
    pub conv: Conv,
}

/// A parsed format string segment
#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Conv(ConvSpec),
}

/// A fully parsed format string
#[derive(Debug, Clone)]
pub struct Format {
    pub segments: Vec<Segment>,
    /// Arguments consumed by a full render, counting `*` widths/precisions
    pub args_needed: usize,
}

/// Parse a printf-style format string into typed segments
pub fn parse_format(fmt: &str) -> Result<Format> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut args_needed = 0;
    let mut chars = fmt.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            literal.push(ch);
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            literal.push('%');
            continue;
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut flags = Flags::default();
        while let Some(&c) = chars.peek() {
            match c {
                '-' => flags.minus = true,
                '+' => flags.plus = true,
                ' ' => flags.space = true,
                '#' => flags.hash = true,
                '0' => flags.zero = true,
                _ => break,
            }
            chars.next();
        }

        let width = parse_amount(&mut chars);
        let precision = if chars.peek() == Some(&'.') {
            chars.next();
            match parse_amount(&mut chars) {
                Amount::None => Amount::Fixed(0),
                other => other,
            }
        } else {
            Amount::None
        };

        let conv = match chars.next() {
            Some('d') | Some('i') => Conv::Dec,
            Some('o') => Conv::Oct,
            Some('u') => Conv::Uns,
            Some('x') => Conv::Hex(false),
            Some('X') => Conv::Hex(true),
            Some('a') => Conv::HexFloat(false),
            Some('A') => Conv::HexFloat(true),
            Some('f') | Some('F') => Conv::Flt,
            Some('e') => Conv::Sci(false),
            Some('E') => Conv::Sci(true),
            Some('g') => Conv::Gen(false),
            Some('G') => Conv::Gen(true),
            Some('c') => Conv::Char,
            Some('s') => Conv::Str,
            Some(other) => {
                return Err(Error::runtime(format!(
                    "invalid conversion '%{}' in format string",
                    other
                )));
            }
            None => {
                return Err(Error::runtime(
                    "format string ends in an incomplete conversion",
                ));
            }
        };

        args_needed += 1;
        if width == Amount::Star {
            args_needed += 1;
        }
        if precision == Amount::Star {
            args_needed += 1;
        }

        segments.push(Segment::Conv(ConvSpec {
            flags,
            width,
            precision,
            conv,
        }));
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(Format {
        segments,
        args_needed,
    })
}

fn parse_amount(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Amount {
    if chars.peek() == Some(&'*') {
        chars.next();
        return Amount::Star;
    }
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if digits.is_empty() {
        Amount::None
    } else {
        Amount::Fixed(digits.parse().unwrap_or(0))
    }
}

/// Render a parsed format against an argument list.
///
/// Fails when the directives outnumber the arguments; extra arguments are
/// silently ignored, as POSIX requires.
pub fn render(format: &Format, args: &[Value], convfmt: &str) -> Result<String> {
    if format.args_needed > args.len() {
        return Err(Error::runtime(format!(
            "format string needs {} argument(s) but {} given",
            format.args_needed,
            args.len()
        )));
    }

    let mut out = String::new();
    let mut next = 0;

    for segment in &format.segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Conv(spec) => {
                let mut flags = spec.flags;

                let width = match spec.width {
                    Amount::None => None,
                    Amount::Fixed(w) => Some(w),
                    Amount::Star => {
                        let w = args[next].to_num() as i64;
                        next += 1;
                        // A negative * width behaves as the '-' flag
                        if w < 0 {
                            flags.minus = true;
                        }
                        Some(w.unsigned_abs() as usize)
                    }
                };

                let precision = match spec.precision {
                    Amount::None => None,
                    Amount::Fixed(p) => Some(p),
                    Amount::Star => {
                        let p = args[next].to_num() as i64;
                        next += 1;
                        // A negative * precision is taken as omitted
                        if p < 0 { None } else { Some(p as usize) }
                    }
                };

                let arg = &args[next];
                next += 1;
                out.push_str(&render_conv(spec.conv, flags, width, precision, arg, convfmt));
            }
        }
    }

    Ok(out)
}

/// Bounded cache of parsed format strings
#[derive(Default)]
pub struct FormatCache {
    map: HashMap<String, Rc<Format>>,
}

impl FormatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or parse a format string. Once the cache is full, fresh
    /// variable formats are parsed without being retained.
    pub fn get(&mut self, fmt: &str) -> Result<Rc<Format>> {
        if let Some(parsed) = self.map.get(fmt) {
            return Ok(Rc::clone(parsed));
        }
        let parsed = Rc::new(parse_format(fmt)?);
        if self.map.len() < MAX_CACHED_FORMATS {
            self.map.insert(fmt.to_string(), Rc::clone(&parsed));
        }
        Ok(parsed)
    }
}

/// Format a number with a conversion format string (CONVFMT/OFMT semantics):
/// values equal to their truncation print in `%d` form, everything else goes
/// through the format string's first conversion.
pub fn format_num(fmt: &str, n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e18 {
        return (n as i64).to_string();
    }
    if fmt == DEFAULT_CONVFMT {
        return format_general(n, 6, Flags::default(), false);
    }
    match parse_format(fmt) {
        Ok(parsed) => {
            for segment in &parsed.segments {
                if let Segment::Conv(spec) = segment {
                    let width = match spec.width {
                        Amount::Fixed(w) => Some(w),
                        _ => None,
                    };
                    let precision = match spec.precision {
                        Amount::Fixed(p) => Some(p),
                        _ => None,
                    };
                    return render_conv(
                        spec.conv,
                        spec.flags,
                        width,
                        precision,
                        &Value::Num(n),
                        DEFAULT_CONVFMT,
                    );
                }
            }
            n.to_string()
        }
        Err(_) => n.to_string(),
    }
}

fn render_conv(
    conv: Conv,
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    arg: &Value,
    convfmt: &str,
) -> String {
    let body = match conv {
        Conv::Dec => format_signed(arg.to_num(), precision, flags),
        Conv::Oct | Conv::Uns | Conv::Hex(_) => format_unsigned(conv, arg.to_num(), precision, flags),
        Conv::Flt => format_fixed(arg.to_num(), precision.unwrap_or(6), flags),
        Conv::Sci(upper) => format_scientific(arg.to_num(), precision.unwrap_or(6), flags, upper),
        Conv::Gen(upper) => {
            let p = precision.unwrap_or(6).max(1);
            format_general(arg.to_num(), p, flags, upper)
        }
        Conv::HexFloat(upper) => format_hex_float(arg.to_num(), precision, flags, upper),
        Conv::Char => format_char(arg),
        Conv::Str => {
            let s = arg.to_str(convfmt);
            match precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
    };

    pad_to_width(body, width, flags, conv, precision)
}

fn format_char(arg: &Value) -> String {
    match arg {
        Value::Num(n) => char::from_u32(*n as u32)
            .map(|c| c.to_string())
            .unwrap_or_default(),
        other => other
            .as_str()
            .chars()
            .next()
            .map(|c| c.to_string())
            .unwrap_or_default(),
    }
}

fn format_signed(n: f64, precision: Option<usize>, flags: Flags) -> String {
    let v = n as i64;
    let mut digits = v.unsigned_abs().to_string();
    if let Some(p) = precision {
        if p == 0 && v == 0 {
            digits.clear();
        } else if digits.len() < p {
            digits = "0".repeat(p - digits.len()) + &digits;
        }
    }
    let sign = if v < 0 {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    };
    format!("{}{}", sign, digits)
}

fn format_unsigned(conv: Conv, n: f64, precision: Option<usize>, flags: Flags) -> String {
    let v = n as i64 as u64;
    let mut digits = match conv {
        Conv::Oct => format!("{:o}", v),
        Conv::Uns => v.to_string(),
        Conv::Hex(true) => format!("{:X}", v),
        Conv::Hex(false) => format!("{:x}", v),
        _ => unreachable!(),
    };
    if let Some(p) = precision {
        if p == 0 && v == 0 {
            digits.clear();
        } else if digits.len() < p {
            digits = "0".repeat(p - digits.len()) + &digits;
        }
    }
    match conv {
        Conv::Oct if flags.hash && !digits.starts_with('0') => format!("0{}", digits),
        Conv::Hex(true) if flags.hash && v != 0 => format!("0X{}", digits),
        Conv::Hex(false) if flags.hash && v != 0 => format!("0x{}", digits),
        _ => digits,
    }
}

fn sign_prefix(negative: bool, flags: Flags) -> &'static str {
    if negative {
        "-"
    } else if flags.plus {
        "+"
    } else if flags.space {
        " "
    } else {
        ""
    }
}

fn nonfinite_body(n: f64, flags: Flags) -> String {
    let name = if n.is_nan() { "nan" } else { "inf" };
    format!("{}{}", sign_prefix(n.is_sign_negative() && !n.is_nan(), flags), name)
}

fn format_fixed(n: f64, precision: usize, flags: Flags) -> String {
    if !n.is_finite() {
        return nonfinite_body(n, flags);
    }
    let mut body = format!("{:.*}", precision, n.abs());
    if flags.hash && precision == 0 {
        body.push('.');
    }
    format!("{}{}", sign_prefix(n < 0.0, flags), body)
}

fn format_scientific(n: f64, precision: usize, flags: Flags, upper: bool) -> String {
    if !n.is_finite() {
        return nonfinite_body(n, flags);
    }
    let raw = format!("{:.*e}", precision, n.abs());
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    let mut mantissa = mantissa.to_string();
    if flags.hash && precision == 0 {
        mantissa.push('.');
    }
    let e = if upper { 'E' } else { 'e' };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!(
        "{}{}{}{}{:02}",
        sign_prefix(n < 0.0, flags),
        mantissa,
        e,
        exp_sign,
        exp.abs()
    )
}

fn format_general(n: f64, precision: usize, flags: Flags, upper: bool) -> String {
    if !n.is_finite() {
        return nonfinite_body(n, flags);
    }
    let p = precision.max(1);
    let exp = if n == 0.0 {
        0
    } else {
        let probe = format!("{:.*e}", p - 1, n.abs());
        probe
            .split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };

    let mut body = if exp >= -4 && exp < p as i32 {
        let frac = (p as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", frac, n.abs())
    } else {
        format_scientific(n.abs(), p - 1, Flags::default(), upper)
    };

    if !flags.hash {
        body = trim_general_zeros(body);
    }

    format!("{}{}", sign_prefix(n < 0.0, flags), body)
}

/// Drop trailing fraction zeros (and a bare trailing point) from a %g body,
/// leaving any exponent suffix intact.
fn trim_general_zeros(body: String) -> String {
    let split = body.find(['e', 'E']).unwrap_or(body.len());
    if !body[..split].contains('.') {
        return body;
    }
    let mantissa = body[..split].trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", mantissa, &body[split..])
}

fn format_hex_float(n: f64, precision: Option<usize>, flags: Flags, upper: bool) -> String {
    if !n.is_finite() {
        return nonfinite_body(n, flags);
    }

    let bits = n.abs().to_bits();
    let exp_bits = ((bits >> 52) & 0x7ff) as i64;
    let frac = bits & 0x000f_ffff_ffff_ffff;

    let (mut lead, mut frac, mut exp) = if n == 0.0 {
        (0u64, 0u64, 0i64)
    } else if exp_bits == 0 {
        // Subnormal: leading digit 0, fixed exponent
        (0, frac, -1022)
    } else {
        (1, frac, exp_bits - 1023)
    };

    if let Some(p) = precision {
        // Round the 13-nibble fraction to p nibbles, carrying into the lead
        if p < 13 {
            let shift = 52 - 4 * p as u32;
            let half = 1u64 << (shift - 1);
            let rounded = frac + half;
            if rounded >> 52 != 0 {
                lead += 1;
            }
            frac = (rounded & 0x000f_ffff_ffff_ffff) >> shift << shift;
            if lead > 1 {
                // Carry out of the leading digit bumps the exponent
                lead = 1;
                frac = 0;
                exp += 1;
            }
        }
    }

    let mut nibbles = String::new();
    let digit_count = precision.unwrap_or(13);
    for i in 0..13.min(digit_count) {
        let nib = (frac >> (48 - 4 * i)) & 0xf;
        nibbles.push(char::from_digit(nib as u32, 16).unwrap());
    }
    for _ in 13..digit_count {
        nibbles.push('0');
    }
    if precision.is_none() {
        while nibbles.ends_with('0') {
            nibbles.pop();
        }
    }

    let mut body = if nibbles.is_empty() && !flags.hash {
        format!("0x{}p{}{}", lead, if exp < 0 { '-' } else { '+' }, exp.abs())
    } else {
        format!(
            "0x{}.{}p{}{}",
            lead,
            nibbles,
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    };
    if upper {
        body = body.to_uppercase();
    }
    format!("{}{}", sign_prefix(n < 0.0, flags), body)
}

fn pad_to_width(
    body: String,
    width: Option<usize>,
    flags: Flags,
    conv: Conv,
    precision: Option<usize>,
) -> String {
    let Some(w) = width else {
        return body;
    };
    let len = body.chars().count();
    if len >= w {
        return body;
    }
    let fill = w - len;

    if flags.minus {
        return format!("{}{}", body, " ".repeat(fill));
    }

    // Zero padding applies to numeric conversions, goes after any sign or
    // radix prefix, and is suppressed for integers with explicit precision
    let zero_ok = flags.zero
        && !matches!(conv, Conv::Str | Conv::Char)
        && !(matches!(conv, Conv::Dec | Conv::Oct | Conv::Uns | Conv::Hex(_)) && precision.is_some());

    if zero_ok && !body.ends_with("inf") && !body.ends_with("nan") {
        let mut prefix_len = 0;
        if body.starts_with(['-', '+', ' ']) {
            prefix_len = 1;
        }
        let after_sign = &body[prefix_len..];
        if after_sign.starts_with("0x") || after_sign.starts_with("0X") {
            prefix_len += 2;
        }
        let (prefix, rest) = body.split_at(prefix_len);
        return format!("{}{}{}", prefix, "0".repeat(fill), rest);
    }

    format!("{}{}", " ".repeat(fill), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt1(fmt: &str, arg: Value) -> String {
        let parsed = parse_format(fmt).unwrap();
        render(&parsed, &[arg], DEFAULT_CONVFMT).unwrap()
    }

    #[test]
    fn test_plain_literal() {
        let parsed = parse_format("hello %% world").unwrap();
        assert_eq!(render(&parsed, &[], DEFAULT_CONVFMT).unwrap(), "hello % world");
    }

    #[test]
    fn test_decimal() {
        assert_eq!(fmt1("%d", Value::Num(42.0)), "42");
        assert_eq!(fmt1("%d", Value::Num(-42.9)), "-42");
        assert_eq!(fmt1("%5d", Value::Num(42.0)), "   42");
        assert_eq!(fmt1("%-5d|", Value::Num(42.0)), "42   |");
        assert_eq!(fmt1("%05d", Value::Num(-42.0)), "-0042");
        assert_eq!(fmt1("%+d", Value::Num(42.0)), "+42");
        assert_eq!(fmt1("% d", Value::Num(42.0)), " 42");
        assert_eq!(fmt1("%.4d", Value::Num(42.0)), "0042");
    }

    #[test]
    fn test_radix() {
        assert_eq!(fmt1("%o", Value::Num(8.0)), "10");
        assert_eq!(fmt1("%#o", Value::Num(8.0)), "010");
        assert_eq!(fmt1("%x", Value::Num(255.0)), "ff");
        assert_eq!(fmt1("%X", Value::Num(255.0)), "FF");
        assert_eq!(fmt1("%#x", Value::Num(255.0)), "0xff");
        assert_eq!(fmt1("%u", Value::Num(7.0)), "7");
    }

    #[test]
    fn test_float() {
        assert_eq!(fmt1("%f", Value::Num(3.5)), "3.500000");
        assert_eq!(fmt1("%.2f", Value::Num(3.14159)), "3.14");
        assert_eq!(fmt1("%8.2f", Value::Num(3.14159)), "    3.14");
        assert_eq!(fmt1("%-8.2f|", Value::Num(3.14159)), "3.14    |");
        assert_eq!(fmt1("%08.2f", Value::Num(-3.14159)), "-0003.14");
    }

    #[test]
    fn test_scientific() {
        assert_eq!(fmt1("%e", Value::Num(1234.5)), "1.234500e+03");
        assert_eq!(fmt1("%.2e", Value::Num(1234.5)), "1.23e+03");
        assert_eq!(fmt1("%.2E", Value::Num(0.00125)), "1.25E-03");
    }

    #[test]
    fn test_general() {
        assert_eq!(fmt1("%g", Value::Num(0.0001)), "0.0001");
        assert_eq!(fmt1("%g", Value::Num(0.00001)), "1e-05");
        assert_eq!(fmt1("%g", Value::Num(123456.0)), "123456");
        assert_eq!(fmt1("%g", Value::Num(1234567.0)), "1.23457e+06");
        assert_eq!(fmt1("%.3g", Value::Num(3.14159)), "3.14");
        assert_eq!(fmt1("%g", Value::Num(0.5)), "0.5");
    }

    #[test]
    fn test_char_and_string() {
        assert_eq!(fmt1("%c", Value::Num(65.0)), "A");
        assert_eq!(fmt1("%c", Value::from_string("hello".into())), "h");
        assert_eq!(fmt1("%s", Value::from_string("abc".into())), "abc");
        assert_eq!(fmt1("%.2s", Value::from_string("abc".into())), "ab");
        assert_eq!(fmt1("%5s", Value::from_string("ab".into())), "   ab");
        assert_eq!(fmt1("%-5s|", Value::from_string("ab".into())), "ab   |");
    }

    #[test]
    fn test_star_width() {
        let parsed = parse_format("%*d").unwrap();
        let out = render(
            &parsed,
            &[Value::Num(5.0), Value::Num(42.0)],
            DEFAULT_CONVFMT,
        )
        .unwrap();
        assert_eq!(out, "   42");

        let parsed = parse_format("%.*f").unwrap();
        let out = render(
            &parsed,
            &[Value::Num(2.0), Value::Num(3.14159)],
            DEFAULT_CONVFMT,
        )
        .unwrap();
        assert_eq!(out, "3.14");
    }

    #[test]
    fn test_too_few_args() {
        let parsed = parse_format("%d %d").unwrap();
        assert!(render(&parsed, &[Value::Num(1.0)], DEFAULT_CONVFMT).is_err());
    }

    #[test]
    fn test_extra_args_ignored() {
        let parsed = parse_format("%d").unwrap();
        let out = render(
            &parsed,
            &[Value::Num(1.0), Value::Num(2.0)],
            DEFAULT_CONVFMT,
        )
        .unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn test_invalid_conversion() {
        assert!(parse_format("%q").is_err());
        assert!(parse_format("abc%").is_err());
    }

    #[test]
    fn test_format_num() {
        assert_eq!(format_num("%.6g", 42.0), "42");
        assert_eq!(format_num("%.6g", 0.5), "0.5");
        assert_eq!(format_num("%.6g", 3.14159), "3.14159");
        assert_eq!(format_num("%.6g", 1e20), "1e+20");
        assert_eq!(format_num("%.2f", 3.14159), "3.14");
        assert_eq!(format_num("%.2f", 3.0), "3");
    }

    #[test]
    fn test_hex_float() {
        assert_eq!(fmt1("%a", Value::Num(1.0)), "0x1p+0");
        assert_eq!(fmt1("%a", Value::Num(2.0)), "0x1p+1");
        assert_eq!(fmt1("%a", Value::Num(0.0)), "0x0p+0");
        assert_eq!(fmt1("%a", Value::Num(1.5)), "0x1.8p+0");
        assert_eq!(fmt1("%a", Value::Num(-1.5)), "-0x1.8p+0");
    }

    #[test]
    fn test_cache_reuse() {
        let mut cache = FormatCache::new();
        let a = cache.get("%d\n").unwrap();
        let b = cache.get("%d\n").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
    }
}
