//! Markup-safe formatting for outgoing payloads
//!
//! Substituted values must not be able to inject structure into an XML-like
//! payload. [`escape_markup`] replaces the five significant characters with
//! entities and turns control characters (except tab, newline and carriage
//! return) into numeric character references. [`Escaped`] applies the same
//! rules while formatting, which is what [`sendf_markup!`](crate::sendf_markup)
//! wraps every argument in.

use std::borrow::Cow;
use std::fmt::{self, Write};

fn entity(c: char) -> Option<&'static str> {
    match c {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '\'' => Some("&apos;"),
        '"' => Some("&quot;"),
        _ => None,
    }
}

fn is_restricted(c: char) -> bool {
    matches!(
        c,
        '\u{1}'..='\u{8}'
            | '\u{b}'
            | '\u{c}'
            | '\u{e}'..='\u{1f}'
            | '\u{7f}'..='\u{84}'
            | '\u{86}'..='\u{9f}'
    )
}

fn needs_escape(c: char) -> bool {
    entity(c).is_some() || is_restricted(c)
}

fn write_escaped<W: Write>(out: &mut W, text: &str) -> fmt::Result {
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if !needs_escape(c) {
            continue;
        }
        out.write_str(&text[start..i])?;
        match entity(c) {
            Some(e) => out.write_str(e)?,
            None => write!(out, "&#x{:x};", c as u32)?,
        }
        start = i + c.len_utf8();
    }
    out.write_str(&text[start..])
}

/// Escape `text` for inclusion in markup; borrows when nothing changes.
pub fn escape_markup(text: &str) -> Cow<'_, str> {
    if !text.chars().any(needs_escape) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    // Writing to a String cannot fail.
    let _ = write_escaped(&mut out, text);
    Cow::Owned(out)
}

/// Formats the wrapped value with markup escaping applied.
///
/// Format options (width, precision, fill, alignment, sign, `#`, `0`) apply
/// to the value exactly as without the wrapper; the padded text is escaped
/// afterwards.
#[derive(Debug, Clone, Copy)]
pub struct Escaped<T>(pub T);

impl<T: fmt::Display> fmt::Display for Escaped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if has_no_options(f) {
            return write!(EscapingWriter { inner: f }, "{}", self.0);
        }
        let rendered = render(&self.0, f);
        write_escaped(f, &rendered)
    }
}

fn has_no_options(f: &fmt::Formatter<'_>) -> bool {
    f.width().is_none()
        && f.precision().is_none()
        && !f.sign_plus()
        && !f.sign_minus()
        && !f.alternate()
        && !f.sign_aware_zero_pad()
}

/// Format `value` with the options carried by `f`.
///
/// Fill and explicit alignment cannot be passed to `format!` at runtime, so
/// padding with them is applied here; everything else is delegated. Without
/// an explicit alignment the fill is a space and the value's own default
/// alignment is kept.
fn render<T: fmt::Display>(value: &T, f: &fmt::Formatter<'_>) -> String {
    let width = f.width().unwrap_or(0);
    match f.align() {
        Some(align) if !f.sign_aware_zero_pad() => {
            let body = render_flags(value, f, 0);
            pad(body, width, f.fill(), align)
        }
        _ => render_flags(value, f, width),
    }
}

fn render_flags<T: fmt::Display>(value: &T, f: &fmt::Formatter<'_>, width: usize) -> String {
    macro_rules! spec {
        ($plain:literal, $precise:literal) => {
            match f.precision() {
                None => format!($plain, value, width = width),
                Some(precision) => format!($precise, value, width = width, precision = precision),
            }
        };
    }

    match (f.sign_plus(), f.alternate(), f.sign_aware_zero_pad()) {
        (false, false, false) => spec!("{:width$}", "{:width$.precision$}"),
        (true, false, false) => spec!("{:+width$}", "{:+width$.precision$}"),
        (false, true, false) => spec!("{:#width$}", "{:#width$.precision$}"),
        (true, true, false) => spec!("{:+#width$}", "{:+#width$.precision$}"),
        (false, false, true) => spec!("{:0width$}", "{:0width$.precision$}"),
        (true, false, true) => spec!("{:+0width$}", "{:+0width$.precision$}"),
        (false, true, true) => spec!("{:#0width$}", "{:#0width$.precision$}"),
        (true, true, true) => spec!("{:+#0width$}", "{:+#0width$.precision$}"),
    }
}

fn pad(body: String, width: usize, fill: char, align: fmt::Alignment) -> String {
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let gap = width - len;
    let (before, after) = match align {
        fmt::Alignment::Left => (0, gap),
        fmt::Alignment::Right => (gap, 0),
        fmt::Alignment::Center => (gap / 2, gap - gap / 2),
    };

    let mut out = String::with_capacity(body.len() + gap * fill.len_utf8());
    out.extend(std::iter::repeat(fill).take(before));
    out.push_str(&body);
    out.extend(std::iter::repeat(fill).take(after));
    out
}

struct EscapingWriter<'a, 'b> {
    inner: &'a mut fmt::Formatter<'b>,
}

impl Write for EscapingWriter<'_, '_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_escaped(&mut *self.inner, s)
    }
}

/// Whether every placeholder in `template` refers to an explicit argument.
///
/// Positional placeholders (`{}`, `{0}`) always do. A named placeholder is
/// accepted only if its name is listed in `names`; anything else would be an
/// inline capture that bypasses escaping. Debug placeholders (`{:?}`) are
/// refused too. Width and precision references after `:` are not substituted
/// text and are not checked.
#[doc(hidden)]
pub const fn template_is_escapable(template: &str, names: &[&str]) -> bool {
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            i += 2;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end] != b'}' && bytes[end] != b':' {
            end += 1;
        }
        if !is_explicit_argument(bytes, start, end, names) {
            return false;
        }

        while end < bytes.len() && bytes[end] != b'}' {
            end += 1;
        }
        // Debug output of the wrapper is not escaped
        if end > start && bytes[end - 1] == b'?' {
            return false;
        }
        i = end + 1;
    }
    true
}

const fn is_explicit_argument(bytes: &[u8], start: usize, end: usize, names: &[&str]) -> bool {
    let mut all_digits = true;
    let mut k = start;
    while k < end {
        if !bytes[k].is_ascii_digit() && bytes[k] != b' ' {
            all_digits = false;
        }
        k += 1;
    }
    if all_digits {
        return true;
    }

    let mut n = 0;
    while n < names.len() {
        let name = names[n].as_bytes();
        if name.len() == end - start {
            let mut same = true;
            let mut k = 0;
            while k < name.len() {
                if name[k] != bytes[start + k] {
                    same = false;
                }
                k += 1;
            }
            if same {
                return true;
            }
        }
        n += 1;
    }
    false
}

/// Format a payload and send it over a [`Connection`](crate::Connection).
///
/// Expands to `conn.send_fmt(format_args!(...))` and evaluates to
/// `Result<SendOutcome>`.
#[macro_export]
macro_rules! sendf {
    ($conn:expr, $($arg:tt)*) => {
        $conn.send_fmt(::std::format_args!($($arg)*))
    };
}

/// Like [`sendf!`], with every substituted argument markup-escaped.
///
/// The template itself is sent as written. Arguments are either all
/// positional or all named (`name = expr`). Inline captures such as
/// `"{name}"` without a matching named argument would not be escaped and are
/// rejected at compile time, as are Debug placeholders.
///
/// ```no_run
/// # fn example(conn: &mut secure_channel::Connection) -> secure_channel::Result<()> {
/// let name = "<script>";
/// // sends <create_task name="&lt;script&gt;"/>
/// let _ = secure_channel::sendf_markup!(conn, "<create_task name=\"{}\"/>", name)?;
/// let _ = secure_channel::sendf_markup!(conn, "<get_tasks filter=\"{f}\"/>", f = name)?;
/// # Ok(())
/// # }
/// ```
///
/// ```compile_fail
/// # fn example(conn: &mut secure_channel::Connection) -> secure_channel::Result<()> {
/// let name = "<script>";
/// let _ = secure_channel::sendf_markup!(conn, "<create_task name=\"{name}\"/>")?;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! sendf_markup {
    ($conn:expr, $fmt:literal $(, $name:ident = $arg:expr)+ $(,)?) => {{
        const _: () = ::std::assert!(
            $crate::markup::template_is_escapable($fmt, &[$(::std::stringify!($name)),+]),
            "sendf_markup! templates may only reference explicit arguments"
        );
        $conn.send_fmt(::std::format_args!(
            $fmt $(, $name = $crate::markup::Escaped(&$arg))+
        ))
    }};
    ($conn:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        const _: () = ::std::assert!(
            $crate::markup::template_is_escapable($fmt, &[]),
            "sendf_markup! templates may only reference explicit arguments"
        );
        $conn.send_fmt(::std::format_args!($fmt $(, $crate::markup::Escaped(&$arg))*))
    }};
}
