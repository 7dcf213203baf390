//! JavaScript minifier.
//!
//! # Background
//!
//! This is a port of Douglas Crockford's `jsmin`: a single-pass filter that
//! deletes comments and collapses insignificant whitespace while leaving the
//! program's semantics alone.  It is deliberately conservative — spaces and
//! newlines survive wherever removing them could join two tokens (`var x`,
//! `a+ ++b`), and string, template and regular-expression literals are copied
//! verbatim.
//!
//! # Why we need this
//!
//! Web assets packed into a firmware image are served straight from flash,
//! so every byte saved at build time is a byte saved on the device.  `.js`
//! sources run through here before compression; the same pass also strips
//! comments from `.jsonc` files and from the build configuration itself.
//!
//! # Scope
//!
//! Whitespace and comment removal only.  No renaming, no dead-code removal,
//! no syntax checking beyond what is needed to find the end of a literal.
//!
//! # References
//!
//! - <https://www.crockford.com/jsmin.html>

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JsminError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unterminated comment")]
    UnterminatedComment,
    #[error("unterminated regular expression literal")]
    UnterminatedRegex,
}

/// Sentinel for end of input.  Safe because [`Minifier::get`] maps every
/// control character other than `\n` to a space, so a real NUL can never
/// reach the state machine.
const EOF: u8 = 0;

/// Minify a JavaScript source.
///
/// The output is the input with comments removed and whitespace reduced to
/// the minimum that keeps tokens apart.  Minification is idempotent:
/// `jsmin(jsmin(x)) == jsmin(x)`.
pub fn jsmin(input: &[u8]) -> Result<Vec<u8>, JsminError> {
    let mut minifier = Minifier {
        input,
        pos: 0,
        out: Vec::with_capacity(input.len()),
        look_ahead: EOF,
        the_a: EOF,
        the_b: EOF,
        the_x: EOF,
        the_y: EOF,
    };
    minifier.run()?;

    // The state machine writes a leading newline; trim it (and any trailing
    // whitespace) so the result embeds cleanly.
    let mut out = minifier.out;
    while matches!(out.last(), Some(&b' ') | Some(&b'\n')) {
        out.pop();
    }
    let start = out
        .iter()
        .position(|&c| c != b' ' && c != b'\n')
        .unwrap_or(out.len());
    out.drain(..start);
    Ok(out)
}

fn is_alphanum(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c == b'\\' || c >= 128
}

/// The jsmin state machine: `the_a` and `the_b` are the two-character
/// window, `the_x`/`the_y` remember the characters most recently returned
/// by [`Minifier::next`] (used to keep `+ +` and friends apart).
struct Minifier<'a> {
    input: &'a [u8],
    pos: usize,
    out: Vec<u8>,
    look_ahead: u8,
    the_a: u8,
    the_b: u8,
    the_x: u8,
    the_y: u8,
}

impl Minifier<'_> {
    fn run(&mut self) -> Result<(), JsminError> {
        // Skip a UTF-8 byte order mark.
        if self.peek() == 0xEF {
            self.get();
            self.get();
            self.get();
        }
        self.the_a = b'\n';
        self.action(3)?;
        while self.the_a != EOF {
            match self.the_a {
                b' ' => {
                    if is_alphanum(self.the_b) {
                        self.action(1)?;
                    } else {
                        self.action(2)?;
                    }
                }
                b'\n' => match self.the_b {
                    b'{' | b'[' | b'(' | b'+' | b'-' | b'!' | b'~' => self.action(1)?,
                    b' ' => self.action(3)?,
                    _ => {
                        if is_alphanum(self.the_b) {
                            self.action(1)?;
                        } else {
                            self.action(2)?;
                        }
                    }
                },
                _ => match self.the_b {
                    b' ' => {
                        if is_alphanum(self.the_a) {
                            self.action(1)?;
                        } else {
                            self.action(3)?;
                        }
                    }
                    b'\n' => match self.the_a {
                        b'}' | b']' | b')' | b'+' | b'-' | b'"' | b'\'' | b'`' => self.action(1)?,
                        _ => {
                            if is_alphanum(self.the_a) {
                                self.action(1)?;
                            } else {
                                self.action(3)?;
                            }
                        }
                    },
                    _ => self.action(1)?,
                },
            }
        }
        Ok(())
    }

    /// Do something.  What to do is determined by the argument:
    /// 1 — output `the_a`, then shift; 2 — copy `the_b` to `the_a`
    /// (stepping over a string literal), then advance; 3 — advance `the_b`
    /// (stepping over a regular-expression literal).
    fn action(&mut self, determined: u8) -> Result<(), JsminError> {
        if determined <= 1 {
            self.out.push(self.the_a);
            if (self.the_y == b'\n' || self.the_y == b' ')
                && matches!(self.the_a, b'+' | b'-' | b'*' | b'/')
                && matches!(self.the_b, b'+' | b'-' | b'*' | b'/')
            {
                self.out.push(self.the_y);
            }
        }
        if determined <= 2 {
            self.the_a = self.the_b;
            if self.the_a == b'\'' || self.the_a == b'"' || self.the_a == b'`' {
                loop {
                    self.out.push(self.the_a);
                    self.the_a = self.get();
                    if self.the_a == self.the_b {
                        break;
                    }
                    if self.the_a == b'\\' {
                        self.out.push(self.the_a);
                        self.the_a = self.get();
                    }
                    if self.the_a == EOF {
                        return Err(JsminError::UnterminatedString);
                    }
                }
            }
        }
        // determined <= 3
        self.the_b = self.next()?;
        if self.the_b == b'/'
            && matches!(
                self.the_a,
                b'(' | b','
                    | b'='
                    | b':'
                    | b'['
                    | b'!'
                    | b'&'
                    | b'|'
                    | b'?'
                    | b'+'
                    | b'-'
                    | b'~'
                    | b'*'
                    | b'/'
                    | b'{'
                    | b'}'
                    | b';'
                    | b'\n'
            )
        {
            self.out.push(self.the_a);
            if self.the_a == b'/' || self.the_a == b'*' {
                self.out.push(b' ');
            }
            self.out.push(self.the_b);
            loop {
                self.the_a = self.get();
                if self.the_a == b'[' {
                    // Character class: `/` loses its meaning inside.
                    loop {
                        self.out.push(self.the_a);
                        self.the_a = self.get();
                        if self.the_a == b']' {
                            break;
                        }
                        if self.the_a == b'\\' {
                            self.out.push(self.the_a);
                            self.the_a = self.get();
                        }
                        if self.the_a == EOF {
                            return Err(JsminError::UnterminatedRegex);
                        }
                    }
                } else if self.the_a == b'/' {
                    if self.peek() == b'/' || self.peek() == b'*' {
                        return Err(JsminError::UnterminatedRegex);
                    }
                    break;
                } else if self.the_a == b'\\' {
                    self.out.push(self.the_a);
                    self.the_a = self.get();
                }
                if self.the_a == EOF {
                    return Err(JsminError::UnterminatedRegex);
                }
                self.out.push(self.the_a);
            }
            self.the_b = self.next()?;
        }
        Ok(())
    }

    /// Next significant character: comments collapse to a newline (`//`) or
    /// a space (`/* */`).
    fn next(&mut self) -> Result<u8, JsminError> {
        let mut codeunit = self.get();
        if codeunit == b'/' {
            match self.peek() {
                b'/' => loop {
                    codeunit = self.get();
                    if codeunit <= b'\n' {
                        break;
                    }
                },
                b'*' => {
                    self.get();
                    while codeunit != b' ' {
                        match self.get() {
                            b'*' => {
                                if self.peek() == b'/' {
                                    self.get();
                                    codeunit = b' ';
                                }
                            }
                            EOF => return Err(JsminError::UnterminatedComment),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        self.the_y = self.the_x;
        self.the_x = codeunit;
        Ok(codeunit)
    }

    /// Next character, with carriage returns folded to newlines and all
    /// other control characters to spaces.  Returns [`EOF`] at end of input.
    fn get(&mut self) -> u8 {
        let c = if self.look_ahead != EOF {
            let c = self.look_ahead;
            self.look_ahead = EOF;
            c
        } else {
            match self.input.get(self.pos) {
                Some(&c) => {
                    self.pos += 1;
                    c
                }
                None => return EOF,
            }
        };
        if c >= b' ' || c == b'\n' {
            c
        } else if c == b'\r' {
            b'\n'
        } else {
            b' '
        }
    }

    fn peek(&mut self) -> u8 {
        self.look_ahead = self.get();
        self.look_ahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn min(src: &str) -> String {
        String::from_utf8(jsmin(src.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn strips_line_comments() {
        // The linefeed left by the comment is itself dropped after `;`.
        assert_eq!(min("var a = 1; // the answer\nvar b = 2;"), "var a=1;var b=2;");
    }

    #[test]
    fn strips_block_comments() {
        assert_eq!(min("var a = /* inline */ 1;"), "var a=1;");
        assert_eq!(min("/* leading\n   banner */\nvar a = 1;"), "var a=1;");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(min("var   x\t =    1 ;"), "var x=1;");
        assert_eq!(min("a = b\n\n\n+ c;"), "a=b\n+c;");
    }

    #[test]
    fn keeps_space_between_words() {
        assert_eq!(min("return typeof x;"), "return typeof x;");
        assert_eq!(min("var x = new Thing();"), "var x=new Thing();");
    }

    #[test]
    fn strings_are_opaque() {
        assert_eq!(min("var u = \"http://a.b  // c\";"), "var u=\"http://a.b  // c\";");
        assert_eq!(min("var s = 'a  b';"), "var s='a  b';");
        assert_eq!(min("var e = 'it\\'s';"), "var e='it\\'s';");
    }

    #[test]
    fn regex_literals_are_opaque() {
        assert_eq!(min("var re = /a  b/;"), "var re=/a  b/;");
        assert_eq!(min("x = /[/ ]/ ;"), "x=/[/ ]/;");
    }

    #[test]
    fn plus_plus_stays_apart() {
        assert_eq!(min("a + ++b"), "a+ ++b");
        assert_eq!(min("a - --b"), "a- --b");
    }

    #[test]
    fn minify_is_idempotent() {
        let srcs = [
            "var a = 1; // comment\nfunction f(x) {\n  return x + 1;\n}\n",
            "a + ++b;\nvar re = /x y/; /* done */",
            "if (a) {\n  b();\n} else {\n  c();\n}",
        ];
        for src in srcs {
            let once = jsmin(src.as_bytes()).unwrap();
            let twice = jsmin(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {src:?}");
        }
    }

    #[test]
    fn empty_and_whitespace_only() {
        assert_eq!(min(""), "");
        assert_eq!(min("   \n\t\n  "), "");
    }

    #[test]
    fn unterminated_comment_is_an_error() {
        assert_eq!(
            jsmin(b"var a = 1; /* no end"),
            Err(JsminError::UnterminatedComment)
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert_eq!(jsmin(b"var s = 'oops"), Err(JsminError::UnterminatedString));
    }
}
