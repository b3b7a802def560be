//! Script-to-expression compiler
//!
//! Cloud-config scripts are embedded in the deployment template as a single
//! `[base64(concat('...'))]` expression. Placeholders in the script break out
//! of the string literal into a template function call:
//!
//! - `[[[Name]]]` becomes `', variables('Name'), '`
//! - `{{{Name}}}` becomes `', parameters('Name'), '`
//!
//! The script is escaped for a JSON string literal first. A single quote would
//! end the `concat` literal and cannot be escaped in the expression language,
//! so any script containing one is rejected outright.

use std::fmt::Write;
use std::path::Path;

use super::error::TemplateError;

/// One placeholder syntax and the template function it compiles to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceholderRule {
    open: &'static str,
    close: &'static str,
    function: &'static str,
}

impl PlaceholderRule {
    /// Rule for `open Name close`, where `Name` is one or more ASCII letters
    pub const fn new(open: &'static str, close: &'static str, function: &'static str) -> Self {
        Self {
            open,
            close,
            function,
        }
    }

    /// `[[[Name]]]` to `variables('Name')`
    pub const fn variable() -> Self {
        Self::new("[[[", "]]]", "variables")
    }

    /// `{{{Name}}}` to `parameters('Name')`
    pub const fn parameter() -> Self {
        Self::new("{{{", "}}}", "parameters")
    }

    /// Rewrite every non-overlapping match, scanning left to right
    fn rewrite(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find(self.open) {
            let after_open = &rest[start + self.open.len()..];
            let name_len = after_open
                .bytes()
                .take_while(u8::is_ascii_alphabetic)
                .count();

            if name_len > 0 && after_open[name_len..].starts_with(self.close) {
                out.push_str(&rest[..start]);
                let _ = write!(
                    out,
                    "', {}('{}'), '",
                    self.function,
                    &after_open[..name_len]
                );
                rest = &after_open[name_len + self.close.len()..];
            } else {
                // open markers are ASCII, so this is a char boundary
                out.push_str(&rest[..start + 1]);
                rest = &rest[start + 1..];
            }
        }

        out.push_str(rest);
        out
    }
}

/// Compiles raw scripts into template expressions
#[derive(Clone, Debug)]
pub struct ExpressionCompiler {
    rules: Vec<PlaceholderRule>,
}

impl Default for ExpressionCompiler {
    fn default() -> Self {
        Self::new(vec![PlaceholderRule::variable(), PlaceholderRule::parameter()])
    }
}

impl ExpressionCompiler {
    /// Create a compiler applying `rules` in order
    pub fn new(rules: Vec<PlaceholderRule>) -> Self {
        Self { rules }
    }

    /// Compile `script`; `origin` names it in errors.
    ///
    /// Fails without producing output if the script contains `'`.
    pub fn compile(&self, origin: &str, script: &str) -> Result<String, TemplateError> {
        if script.contains('\'') {
            return Err(TemplateError::SingleQuote {
                path: origin.to_string(),
            });
        }

        let escaped = js_escape(script);
        let rewritten = self
            .rules
            .iter()
            .fold(escaped, |acc, rule| rule.rewrite(&acc));

        Ok(format!("[base64(concat('{}'))]", rewritten))
    }

    /// Read and compile the script at `path`
    pub fn compile_file(&self, path: &Path) -> Result<String, TemplateError> {
        let origin = path.display().to_string();
        let script =
            std::fs::read_to_string(path).map_err(|source| TemplateError::TemplateNotFound {
                path: origin.clone(),
                source,
            })?;
        self.compile(&origin, &script)
    }
}

/// Escape text for a string literal in JSON or JavaScript.
///
/// Quotes and backslashes get a backslash; `<`, `>`, `&` and `=` and control
/// characters become `\uXXXX`; non-printable non-ASCII characters too.
pub fn js_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '<' | '>' | '&' | '=' => push_unicode_escape(&mut out, c),
            c if (c as u32) < 0x20 => push_unicode_escape(&mut out, c),
            c if !c.is_ascii() && !is_printable(c) => push_unicode_escape(&mut out, c),
            c => out.push(c),
        }
    }
    out
}

fn push_unicode_escape(out: &mut String, c: char) {
    let mut units = [0u16; 2];
    for unit in c.encode_utf16(&mut units) {
        let _ = write!(out, "\\u{:04X}", unit);
    }
}

/// Visible characters: no controls, no separators other than ASCII space,
/// no invisible formatting characters, no private-use or noncharacter code
/// points. Unassigned code points are not tracked and count as printable.
fn is_printable(c: char) -> bool {
    !(c.is_control()
        || c.is_whitespace()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{0600}'..='\u{0605}'
                | '\u{061C}'
                | '\u{06DD}'
                | '\u{070F}'
                | '\u{180E}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{2066}'..='\u{206F}'
                | '\u{E000}'..='\u{F8FF}'
                | '\u{FDD0}'..='\u{FDEF}'
                | '\u{FEFF}'
                | '\u{FFF9}'..='\u{FFFB}'
                | '\u{110BD}'
                | '\u{1D173}'..='\u{1D17A}'
                | '\u{E0001}'
                | '\u{E0020}'..='\u{E007F}'
                | '\u{F0000}'..='\u{10FFFF}'
        )
        || (c as u32) & 0xFFFE == 0xFFFE)
}
