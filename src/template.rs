//! Rendering of message-table templates (`FormatMessage` style escapes).
//!
//! | Escape            | Output                                             |
//! |-------------------|----------------------------------------------------|
//! | `%0`              | end of message, nothing after it is rendered       |
//! | `%r`              | nothing                                            |
//! | `%n`              | newline, unless the previous character was one     |
//! | `%b` / `%t`       | space / tab                                        |
//! | `% ` `%!` `%%` `%.` | the character after `%`                          |
//! | `%1`..`%99`       | record string, optionally followed by `!s!`        |
//!
//! Any other escape is an error. Literal `\r` characters are dropped and consecutive newlines are
//! collapsed.

use crate::err::{Error, Result};

use std::fmt;

/// The ordered substitution strings of an event record.
///
/// `%1` refers to index `0`.
pub trait RecordStrings {
    fn number_of_strings(&self) -> usize;

    fn string(&self, index: usize) -> Option<&str>;
}

impl<S: AsRef<str>> RecordStrings for [S] {
    fn number_of_strings(&self) -> usize {
        self.len()
    }

    fn string(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }
}

impl<S: AsRef<str>> RecordStrings for Vec<S> {
    fn number_of_strings(&self) -> usize {
        self.len()
    }

    fn string(&self, index: usize) -> Option<&str> {
        self.get(index).map(AsRef::as_ref)
    }
}

/// Template text of a single message, borrowed from the message table that holds it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MessageTemplate<'a>(&'a str);

impl<'a> MessageTemplate<'a> {
    pub fn new(text: &'a str) -> Self {
        MessageTemplate(text)
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }

    pub fn format_to<R, W>(&self, strings: &R, sink: &mut W) -> Result<()>
    where
        R: RecordStrings + ?Sized,
        W: fmt::Write + ?Sized,
    {
        format_message(self.0, strings, sink)
    }

    pub fn format<R: RecordStrings + ?Sized>(&self, strings: &R) -> Result<String> {
        let mut rendered = String::with_capacity(self.0.len());
        self.format_to(strings, &mut rendered)?;
        Ok(rendered)
    }
}

impl fmt::Display for MessageTemplate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

struct Emitter<'w, W: ?Sized> {
    sink: &'w mut W,
    last: Option<char>,
}

impl<W: fmt::Write + ?Sized> Emitter<'_, W> {
    fn char(&mut self, c: char) -> fmt::Result {
        self.sink.write_char(c)?;
        self.last = Some(c);
        Ok(())
    }

    fn newline(&mut self) -> fmt::Result {
        if self.last == Some('\n') {
            return Ok(());
        }
        self.char('\n')
    }

    /// Template text between escapes.
    fn literal(&mut self, text: &str) -> fmt::Result {
        for c in text.chars() {
            match c {
                '\r' => {}
                '\n' => self.newline()?,
                c => self.char(c)?,
            }
        }
        Ok(())
    }

    /// Text written as is: substituted values and unresolved escapes.
    fn verbatim(&mut self, text: &str) -> fmt::Result {
        if let Some(last) = text.chars().next_back() {
            self.sink.write_str(text)?;
            self.last = Some(last);
        }
        Ok(())
    }
}

/// Render `template` into `sink`, substituting positional escapes with `strings`.
///
/// On error `sink` may hold a partial rendering.
pub fn format_message<R, W>(template: &str, strings: &R, sink: &mut W) -> Result<()>
where
    R: RecordStrings + ?Sized,
    W: fmt::Write + ?Sized,
{
    let bytes = template.as_bytes();
    let mut out = Emitter { sink, last: None };

    let mut offset = 0;
    let mut literal_start = 0;

    // Escapes are ASCII, so every offset we slice at is a char boundary.
    while offset < bytes.len() {
        if bytes[offset] != b'%' || offset + 1 >= bytes.len() {
            offset += 1;
            continue;
        }

        out.literal(&template[literal_start..offset])?;

        let specifier = bytes[offset + 1];
        offset = match specifier {
            b'0' => return Ok(()),
            b'r' => offset + 2,
            b' ' | b'!' | b'%' | b'.' => {
                out.char(char::from(specifier))?;
                offset + 2
            }
            b'b' => {
                out.char(' ')?;
                offset + 2
            }
            b't' => {
                out.char('\t')?;
                offset + 2
            }
            b'n' => {
                out.newline()?;
                offset + 2
            }
            b'1'..=b'9' => insert_string(template, offset, strings, &mut out)?,
            _ => {
                return Err(Error::UnsupportedConversionSpecifier {
                    specifier: template[offset..].chars().take(2).collect(),
                    offset,
                });
            }
        };
        literal_start = offset;
    }

    out.literal(&template[literal_start..])?;
    Ok(())
}

/// Handle `%<d>[<d>][!s!]` at `offset`, returning the offset after the escape.
fn insert_string<R, W>(
    template: &str,
    offset: usize,
    strings: &R,
    out: &mut Emitter<'_, W>,
) -> Result<usize>
where
    R: RecordStrings + ?Sized,
    W: fmt::Write + ?Sized,
{
    let bytes = template.as_bytes();

    let mut end = offset + 2;
    let mut number = usize::from(bytes[offset + 1] - b'0');
    if let Some(digit @ b'0'..=b'9') = bytes.get(end).copied() {
        number = number * 10 + usize::from(digit - b'0');
        end += 1;
    }

    if bytes.get(end) == Some(&b'!') {
        let mut qualifier = template[end + 1..].chars();
        match (qualifier.next(), qualifier.next()) {
            (Some('s'), Some('!')) => end += 3,
            (Some(_), Some(_)) => {
                return Err(Error::MalformedQualifier {
                    qualifier: template[end..].chars().take(3).collect(),
                    offset: end,
                });
            }
            // Too short to be a qualifier, the `!` is literal text.
            _ => {}
        }
    }

    match strings.string(number - 1) {
        Some(value) => out.verbatim(value)?,
        None => out.verbatim(&template[offset..end])?,
    }

    Ok(end)
}
