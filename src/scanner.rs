//! Lexical services over an in-memory schema buffer.
//!
//! The scanner exposes no token stream: the parser asks for the lexical
//! shape it needs next (a word, an integer, a quoted string, a single
//! character). Alongside the cursor it accumulates comment text into a
//! pending documentation buffer that the parser consumes at declaration
//! boundaries.

use crate::ParseError;

fn is_word(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.')
}

pub(crate) struct Scanner<'a> {
    file_name: &'a str,
    chars: Vec<char>,
    pos: usize,
    /// Documentation collected for the next declaration
    doc: String,
}

impl<'a> Scanner<'a> {
    pub fn new(file_name: &'a str, source: &str) -> Self {
        Scanner {
            file_name,
            chars: source.chars().collect(),
            pos: 0,
            doc: String::new(),
        }
    }

    /// Character under the cursor, without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Consumes `expected` or fails.
    pub fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    /// Consumes `c` if it is the next character.
    pub fn try_consume(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Advances past whitespace and comments. `//` bodies and `/** … */`
    /// blocks fold into the pending documentation; plain `/* … */` blocks
    /// are skipped.
    pub fn skip_whitespace(&mut self) -> Result<(), ParseError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => self.pos += 1,
                '/' if self.peek_at(1) == Some('/') => {
                    let body = self.read_line_comment();
                    self.append_doc(&body);
                }
                '/' if self.peek_at(1) == Some('*') => self.read_block_comment()?,
                _ => break,
            }
        }
        Ok(())
    }

    /// Consumes a `//` comment and returns its body. One leading space is
    /// dropped; the newline stays unconsumed.
    fn read_line_comment(&mut self) -> String {
        self.pos += 2;
        if self.peek() == Some(' ') {
            self.pos += 1;
        }
        let start = self.pos;
        while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
            self.pos += 1;
        }
        let body: String = self.chars[start..self.pos].iter().collect();
        body.trim_end().to_string()
    }

    fn read_block_comment(&mut self) -> Result<(), ParseError> {
        self.pos += 2;
        let content_start = self.pos;
        let mut end = None;
        let mut i = self.pos;
        while i + 1 < self.chars.len() {
            if self.chars[i] == '*' && self.chars[i + 1] == '/' {
                end = Some(i);
                break;
            }
            i += 1;
        }
        let end = match end {
            Some(end) => end,
            None => return Err(self.error("unterminated comment")),
        };
        self.pos = end + 2;
        let content: String = self.chars[content_start..end].iter().collect();
        // only `/**` blocks are documentation
        if let Some(body) = content.strip_prefix('*') {
            let cleaned = clean_doc_block(body);
            if !cleaned.is_empty() {
                self.append_doc(&cleaned);
            }
        }
        Ok(())
    }

    fn append_doc(&mut self, text: &str) {
        if self.doc.is_empty() {
            self.doc.push_str(text);
        } else {
            self.doc.push('\n');
            self.doc.push_str(text);
        }
    }

    /// Returns the accumulated documentation, clearing it for the next
    /// declaration.
    pub fn take_doc(&mut self) -> String {
        std::mem::replace(&mut self.doc, String::new())
    }

    /// Probes for a `// …` comment between the cursor and the end of the
    /// current line. Such a comment belongs to the declaration that just
    /// ended, so it bypasses the pending documentation buffer. The cursor
    /// does not move if no comment is found, and never crosses a newline.
    pub fn trailing_doc(&mut self) -> Option<String> {
        let mut ahead = self.pos;
        while let Some(&c) = self.chars.get(ahead) {
            match c {
                ' ' | '\t' => ahead += 1,
                '/' if self.chars.get(ahead + 1) == Some(&'/') => {
                    self.pos = ahead;
                    return Some(self.read_line_comment());
                }
                _ => break,
            }
        }
        None
    }

    /// Reads an identifier-like token: letters, digits, `_` and `.`.
    pub fn read_word(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while self.pos < self.chars.len() && is_word(self.chars[self.pos]) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a word"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// Reads an integer in decimal, hexadecimal (`0x…`) or octal
    /// (leading `0`) notation.
    pub fn read_int(&mut self) -> Result<i32, ParseError> {
        let word = self.read_word()?;
        self.parse_int(&word)
    }

    /// Parses an already-read word as an integer in any supported base.
    pub fn parse_int(&self, word: &str) -> Result<i32, ParseError> {
        let parsed = if word.starts_with("0x") || word.starts_with("0X") {
            i32::from_str_radix(&word[2..], 16)
        } else if word.starts_with('0') && word.len() > 1 {
            i32::from_str_radix(&word[1..], 8)
        } else {
            word.parse()
        };
        parsed.map_err(|_| self.error(format!("expected an integer but was {}", word)))
    }

    /// Reads a double-quoted string literal, decoding escapes. Adjacent
    /// literals separated only by whitespace concatenate into one value.
    pub fn read_quoted_string(&mut self) -> Result<String, ParseError> {
        let mut result = String::new();
        loop {
            self.expect('"')?;
            self.read_quoted_run(&mut result)?;
            let mut ahead = self.pos;
            while let Some(&c) = self.chars.get(ahead) {
                if matches!(c, ' ' | '\t' | '\r' | '\n') {
                    ahead += 1;
                } else {
                    break;
                }
            }
            if self.chars.get(ahead) == Some(&'"') {
                self.pos = ahead;
            } else {
                return Ok(result);
            }
        }
    }

    fn read_quoted_run(&mut self, out: &mut String) -> Result<(), ParseError> {
        loop {
            let c = match self.next_char() {
                Some('"') => return Ok(()),
                Some('\n') | None => return Err(self.error("unterminated string")),
                Some('\\') => self.read_escape()?,
                Some(c) => c,
            };
            out.push(c);
        }
    }

    fn read_escape(&mut self) -> Result<char, ParseError> {
        let c = match self.next_char() {
            Some(c) => c,
            None => return Err(self.error("unterminated string")),
        };
        let decoded = match c {
            'a' => '\u{7}',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{b}',
            'x' | 'X' => {
                let mut value = match self.peek().and_then(|d| d.to_digit(16)) {
                    Some(digit) => {
                        self.pos += 1;
                        digit
                    }
                    None => return Err(self.error("expected a digit after \\x or \\X")),
                };
                if let Some(digit) = self.peek().and_then(|d| d.to_digit(16)) {
                    self.pos += 1;
                    value = value * 16 + digit;
                }
                // two hex digits fit in a byte
                (value as u8) as char
            }
            '0'..='7' => {
                let mut value = c as u32 - '0' as u32;
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            self.pos += 1;
                            value = value * 8 + digit;
                        }
                        None => break,
                    }
                }
                match std::char::from_u32(value) {
                    Some(decoded) => decoded,
                    None => return Err(self.error(format!("invalid escape value {}", value))),
                }
            }
            // covers \\ \' \" and leaves unknown escapes as the character
            other => other,
        };
        Ok(decoded)
    }

    /// Line and column of the cursor, both 1-based.
    pub fn location(&self) -> (usize, usize) {
        let mut line = 1;
        let mut column = 1;
        for &c in &self.chars[..self.pos] {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        (line, column)
    }

    /// Builds a diagnostic at the cursor.
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self.location();
        ParseError {
            file_name: self.file_name.to_string(),
            line,
            column,
            message: message.into(),
        }
    }
}

/// Normalizes the interior of a `/** … */` documentation block: blank
/// lines hugging the delimiters go away, and if every non-blank line
/// carries a leading `*` that margin is stripped, keeping the indentation
/// of what follows it.
fn clean_doc_block(body: &str) -> String {
    let mut lines: Vec<&str> = body.lines().collect();
    while lines.first().map_or(false, |line| line.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().map_or(false, |line| line.trim().is_empty()) {
        lines.pop();
    }

    let starred = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .all(|line| line.trim_start().starts_with('*'));

    let mut cleaned = String::new();
    for (i, line) in lines.iter().enumerate() {
        let body = if starred {
            let trimmed = line.trim_start();
            if trimmed.is_empty() {
                ""
            } else {
                let rest = &trimmed[1..];
                rest.strip_prefix(' ').unwrap_or(rest)
            }
        } else {
            line.trim_start()
        };
        if i > 0 {
            cleaned.push('\n');
        }
        cleaned.push_str(body.trim_end());
    }
    cleaned
}
