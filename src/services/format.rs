//! printf-style formatting of plugin output.
//!
//! Supports `%s %c %d %i %u %x %X %p %%` with the `-` and `0` flags, a
//! field width and the `h`, `l`, `ll` and `z` length modifiers. Arguments
//! are machine words pulled from an [`ArgSource`].

use std::ffi::{c_char, c_void, CStr};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("format consumes more arguments than were passed")]
    MissingArgument,

    #[error("unsupported conversion '%{0}'")]
    Unsupported(char),

    #[error("format string ends inside a conversion")]
    Truncated,

    #[error("field width exceeds {}", MAX_WIDTH)]
    WidthTooLarge,
}

/// Widest field a conversion may pad to
pub const MAX_WIDTH: usize = 4096;

/// Supplies variadic arguments one word at a time
pub trait ArgSource {
    fn next_word(&mut self) -> Option<u64>;
}

/// A fixed list of words, e.g. the argument registers of a variadic call
pub struct WordArgs<'a> {
    words: std::slice::Iter<'a, u64>,
}

impl<'a> WordArgs<'a> {
    pub fn new(words: &'a [u64]) -> Self {
        Self {
            words: words.iter(),
        }
    }
}

impl ArgSource for WordArgs<'_> {
    fn next_word(&mut self) -> Option<u64> {
        self.words.next().copied()
    }
}

/// System V x86-64 `va_list` element
#[repr(C)]
#[derive(Debug)]
pub struct VaListTag {
    pub gp_offset: u32,
    pub fp_offset: u32,
    pub overflow_arg_area: *mut c_void,
    pub reg_save_area: *mut c_void,
}

/// Size of the general-purpose part of the register save area
const GP_SAVE_AREA: u32 = 6 * 8;

/// Integer arguments of a `va_list`, read without consuming the caller's copy
pub struct VaListArgs {
    gp_offset: u32,
    overflow_arg_area: *const u64,
    reg_save_area: *const u8,
}

impl VaListArgs {
    /// # Safety
    /// `tag` must point to a live `va_list` initialized by `va_start`.
    pub unsafe fn new(tag: *const VaListTag) -> Self {
        let tag = unsafe { &*tag };
        Self {
            gp_offset: tag.gp_offset,
            overflow_arg_area: tag.overflow_arg_area as *const u64,
            reg_save_area: tag.reg_save_area as *const u8,
        }
    }
}

impl ArgSource for VaListArgs {
    fn next_word(&mut self) -> Option<u64> {
        // SAFETY: offsets follow the System V va_arg algorithm for INTEGER class
        unsafe {
            if self.gp_offset < GP_SAVE_AREA {
                let slot = self.reg_save_area.add(self.gp_offset as usize) as *const u64;
                self.gp_offset += 8;
                Some(slot.read_unaligned())
            } else {
                if self.overflow_arg_area.is_null() {
                    return None;
                }
                let value = self.overflow_arg_area.read_unaligned();
                self.overflow_arg_area = self.overflow_arg_area.add(1);
                Some(value)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Short,
    Int,
    Long,
}

/// Format `format` with arguments from `args`.
///
/// # Safety
/// Every `%s` argument must be null or point to a NUL-terminated string.
pub unsafe fn format(format: &[u8], args: &mut dyn ArgSource) -> Result<String, FormatError> {
    let mut out = String::with_capacity(format.len());
    let mut bytes = format.iter().copied().peekable();
    let mut literal: Vec<u8> = Vec::new();

    while let Some(b) = bytes.next() {
        if b != b'%' {
            literal.push(b);
            continue;
        }
        out.push_str(&String::from_utf8_lossy(&literal));
        literal.clear();

        let mut left = false;
        let mut zero = false;
        while let Some(&flag) = bytes.peek() {
            match flag {
                b'-' => left = true,
                b'0' => zero = true,
                _ => break,
            }
            bytes.next();
        }

        let mut width = 0usize;
        while let Some(&digit) = bytes.peek().filter(|d| d.is_ascii_digit()) {
            width = width
                .checked_mul(10)
                .and_then(|w| w.checked_add((digit - b'0') as usize))
                .filter(|&w| w <= MAX_WIDTH)
                .ok_or(FormatError::WidthTooLarge)?;
            bytes.next();
        }

        let mut length = Length::Int;
        while let Some(&modifier) = bytes.peek() {
            match modifier {
                b'h' => length = Length::Short,
                b'l' | b'z' => length = Length::Long,
                _ => break,
            }
            bytes.next();
        }

        let conversion = bytes.next().ok_or(FormatError::Truncated)?;
        let mut next = || args.next_word().ok_or(FormatError::MissingArgument);

        let body = match conversion {
            b'%' => "%".to_string(),
            b'd' | b'i' => {
                let word = next()?;
                match length {
                    Length::Short => (word as i16).to_string(),
                    Length::Int => (word as i32).to_string(),
                    Length::Long => (word as i64).to_string(),
                }
            }
            b'u' => truncate(next()?, length).to_string(),
            b'x' => format!("{:x}", truncate(next()?, length)),
            b'X' => format!("{:X}", truncate(next()?, length)),
            b'p' => format!("{:#x}", next()?),
            b'c' => char::from(next()? as u8).to_string(),
            b's' => {
                let ptr = next()? as usize as *const c_char;
                if ptr.is_null() {
                    "(null)".to_string()
                } else {
                    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
                }
            }
            other => return Err(FormatError::Unsupported(char::from(other))),
        };

        let numeric = matches!(conversion, b'd' | b'i' | b'u' | b'x' | b'X');
        pad(&mut out, &body, width, left, zero && numeric && !left);
    }

    out.push_str(&String::from_utf8_lossy(&literal));
    Ok(out)
}

/// Format, falling back to the raw format string on any failure
///
/// # Safety
/// As for [`format`].
pub unsafe fn format_or_raw(format: &CStr, args: &mut dyn ArgSource) -> String {
    match unsafe { self::format(format.to_bytes(), args) } {
        Ok(text) => text,
        Err(e) => {
            log::debug!("Output format {:?} not expanded: {}", format, e);
            format.to_string_lossy().into_owned()
        }
    }
}

fn truncate(word: u64, length: Length) -> u64 {
    match length {
        Length::Short => word as u16 as u64,
        Length::Int => word as u32 as u64,
        Length::Long => word,
    }
}

fn pad(out: &mut String, body: &str, width: usize, left: bool, zero: bool) {
    let fill = width.saturating_sub(body.chars().count());
    if fill == 0 {
        out.push_str(body);
    } else if left {
        out.push_str(body);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if zero {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(digits) => ("-", digits),
            None => ("", body),
        };
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(body);
    }
}
