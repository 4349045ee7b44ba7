//! Byte-oriented HTML tokenizer.
//!
//! Every delimiter the tokenizer slices on is ASCII, so all slice boundaries
//! fall on UTF-8 character boundaries.

use gk_dom::Attribute;
use gk_dom::DoctypeData;
use std::collections::VecDeque;

/// Elements whose content is passed through as text without markup.
pub(crate) const RAW_TEXT_ELEMENTS: &[&str] = &[
    "iframe", "noembed", "noframes", "noscript", "script", "style", "xmp",
];
/// Raw text elements whose content still has character references decoded.
const ESCAPABLE_RAW_TEXT_ELEMENTS: &[&str] = &["textarea", "title"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Doctype(DoctypeData),
    StartTag {
        name: String,
        attrs: Vec<Attribute>,
        self_closing: bool,
    },
    EndTag(String),
    Text(String),
    Comment(String),
}

pub(crate) struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    pending: VecDeque<Token>,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            pending: VecDeque::new(),
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.input.as_bytes()
    }

    fn text_until_tag(&mut self) -> Token {
        let end = find_byte(self.bytes(), self.pos, b'<').unwrap_or(self.input.len());
        let text = decode_entities(&self.input[self.pos..end]);
        self.pos = end;
        Token::Text(text)
    }

    fn comment(&mut self) -> Token {
        let bytes = self.bytes();
        let start = self.pos + 4;

        // `<!-->` and `<!--->` are complete, empty comments.
        if bytes.get(start) == Some(&b'>') {
            self.pos = start + 1;
            return Token::Comment(String::new());
        }
        if starts_with(bytes, start, b"->") {
            self.pos = start + 2;
            return Token::Comment(String::new());
        }

        match find_subslice(bytes, start, b"-->") {
            Some(end) => {
                self.pos = end + 3;
                Token::Comment(self.input[start..end].to_owned())
            }
            None => {
                self.pos = bytes.len();
                Token::Comment(self.input[start.min(bytes.len())..].to_owned())
            }
        }
    }

    fn doctype(&mut self) -> Token {
        let start = self.pos + "<!doctype".len();
        let end = doctype_end(self.bytes(), start);
        let inner = &self.input[start.min(end)..end];
        self.pos = (end + 1).min(self.input.len());

        let (name, rest) = next_word(inner);
        let mut doctype = DoctypeData {
            name: if name.is_empty() { "html" } else { name }.to_ascii_lowercase(),
            ..DoctypeData::default()
        };

        let (keyword, rest) = next_word(rest);
        if keyword.eq_ignore_ascii_case("public") {
            if let Some((public_id, rest)) = quoted(rest) {
                doctype.public_id = public_id.to_owned();
                if let Some((system_id, _)) = quoted(rest) {
                    doctype.system_id = system_id.to_owned();
                }
            }
        } else if keyword.eq_ignore_ascii_case("system") {
            if let Some((system_id, _)) = quoted(rest) {
                doctype.system_id = system_id.to_owned();
            }
        }

        Token::Doctype(doctype)
    }

    fn bogus_comment(&mut self, start: usize) -> Token {
        let end = find_byte(self.bytes(), start, b'>').unwrap_or(self.input.len());
        let text = self.input[start.min(end)..end].to_owned();
        self.pos = (end + 1).min(self.input.len());
        Token::Comment(text)
    }

    fn end_tag(&mut self) -> Token {
        let bytes = self.bytes();
        let name_start = self.pos + 2;
        let name_end = scan_name(bytes, name_start);
        let name = self.input[name_start..name_end].to_ascii_lowercase();
        let end = find_byte(bytes, name_end, b'>').unwrap_or(bytes.len());
        self.pos = (end + 1).min(bytes.len());
        Token::EndTag(name)
    }

    /// Parses a start tag; `None` when the input ends inside the tag.
    fn start_tag(&mut self) -> Option<Token> {
        let bytes = self.bytes();
        let name_start = self.pos + 1;
        let mut idx = scan_name(bytes, name_start);
        let name = self.input[name_start..idx].to_ascii_lowercase();
        let mut attrs: Vec<Attribute> = Vec::new();
        let mut self_closing = false;

        loop {
            idx = skip_spaces(bytes, idx);
            match bytes.get(idx) {
                None => {
                    self.pos = bytes.len();
                    return None;
                }
                Some(b'>') => {
                    idx += 1;
                    break;
                }
                Some(b'/') => {
                    if bytes.get(idx + 1) == Some(&b'>') {
                        self_closing = true;
                        idx += 2;
                        break;
                    }
                    idx += 1;
                    continue;
                }
                Some(_) => {}
            }

            let attr_start = idx;
            idx += 1;
            while idx < bytes.len() && !is_attr_name_end(bytes[idx]) {
                idx += 1;
            }
            let attr_name = self.input[attr_start..idx].to_ascii_lowercase();

            let value_start = skip_spaces(bytes, idx);
            let mut value = String::new();
            if bytes.get(value_start) == Some(&b'=') {
                idx = skip_spaces(bytes, value_start + 1);
                match bytes.get(idx).copied() {
                    Some(quote @ (b'"' | b'\'')) => {
                        let end = find_byte(bytes, idx + 1, quote).unwrap_or(bytes.len());
                        value = decode_entities(&self.input[idx + 1..end]);
                        idx = (end + 1).min(bytes.len());
                    }
                    Some(_) => {
                        let start = idx;
                        while idx < bytes.len()
                            && !bytes[idx].is_ascii_whitespace()
                            && bytes[idx] != b'>'
                        {
                            idx += 1;
                        }
                        value = decode_entities(&self.input[start..idx]);
                    }
                    None => {}
                }
            }

            // The first occurrence of a duplicated attribute wins.
            if !attrs.iter().any(|attr| attr.name == attr_name) {
                attrs.push(Attribute::new(attr_name, value));
            }
        }

        self.pos = idx;
        if name == "plaintext" {
            let rest = &self.input[self.pos..];
            self.pos = self.input.len();
            if !rest.is_empty() {
                self.pending.push_back(Token::Text(rest.to_owned()));
            }
        } else if RAW_TEXT_ELEMENTS.contains(&name.as_str())
            || ESCAPABLE_RAW_TEXT_ELEMENTS.contains(&name.as_str())
        {
            self.queue_raw_text(&name);
        }

        Some(Token::StartTag {
            name,
            attrs,
            self_closing,
        })
    }

    fn queue_raw_text(&mut self, name: &str) {
        let (raw, after) = read_raw_text_until_end_tag(self.input, self.pos, name);
        self.pos = after;

        if !raw.is_empty() {
            let text = if ESCAPABLE_RAW_TEXT_ELEMENTS.contains(&name) {
                decode_entities(raw)
            } else {
                raw.to_owned()
            };
            self.pending.push_back(Token::Text(text));
        }
        self.pending.push_back(Token::EndTag(name.to_owned()));
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }

            let bytes = self.bytes();
            if self.pos >= bytes.len() {
                return None;
            }

            if bytes[self.pos] != b'<' {
                return Some(self.text_until_tag());
            }

            if starts_with(bytes, self.pos, b"<!--") {
                return Some(self.comment());
            }

            if starts_with(bytes, self.pos, b"<!") {
                if starts_with_ignore_ascii_case(bytes, self.pos + 2, b"doctype") {
                    return Some(self.doctype());
                }
                return Some(self.bogus_comment(self.pos + 2));
            }

            if starts_with(bytes, self.pos, b"<?") {
                return Some(self.bogus_comment(self.pos + 1));
            }

            if starts_with(bytes, self.pos, b"</") {
                match bytes.get(self.pos + 2).copied() {
                    Some(byte) if byte.is_ascii_alphabetic() => return Some(self.end_tag()),
                    Some(b'>') => {
                        self.pos += 3;
                        continue;
                    }
                    Some(_) => return Some(self.bogus_comment(self.pos + 2)),
                    None => {
                        self.pos = bytes.len();
                        return Some(Token::Text("</".to_owned()));
                    }
                }
            }

            if bytes
                .get(self.pos + 1)
                .is_some_and(|byte| byte.is_ascii_alphabetic())
            {
                match self.start_tag() {
                    Some(token) => return Some(token),
                    None => continue,
                }
            }

            self.pos += 1;
            return Some(Token::Text("<".to_owned()));
        }
    }
}

/// Decodes `&name;`, `&#NN;` and `&#xHH;` references. Named references need
/// their semicolon so query strings like `?a=1&copy=2` survive untouched.
pub(crate) fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        match decode_reference(rest) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_reference(input: &str) -> Option<(String, usize)> {
    let bytes = input.as_bytes();

    if bytes.get(1) == Some(&b'#') {
        let hex = matches!(bytes.get(2), Some(b'x' | b'X'));
        let digits_start = if hex { 3 } else { 2 };
        let mut end = digits_start;
        while end < bytes.len()
            && (if hex {
                bytes[end].is_ascii_hexdigit()
            } else {
                bytes[end].is_ascii_digit()
            })
        {
            end += 1;
        }
        if end == digits_start {
            return None;
        }

        let radix = if hex { 16 } else { 10 };
        let value = u32::from_str_radix(&input[digits_start..end], radix).unwrap_or(u32::MAX);
        let ch = match value {
            0 => char::REPLACEMENT_CHARACTER,
            _ => char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER),
        };
        let consumed = if bytes.get(end) == Some(&b';') { end + 1 } else { end };
        return Some((ch.to_string(), consumed));
    }

    let mut end = 1;
    while end < bytes.len() && end <= 32 && bytes[end].is_ascii_alphanumeric() {
        end += 1;
    }
    if end == 1 || bytes.get(end) != Some(&b';') {
        return None;
    }

    let reference = &input[..=end];
    let decoded = html_escape::decode_html_entities(reference);
    if decoded == reference {
        return None;
    }
    Some((decoded.into_owned(), end + 1))
}

fn read_raw_text_until_end_tag<'a>(
    input: &'a str,
    start: usize,
    tag_name: &str,
) -> (&'a str, usize) {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while let Some(open) = find_subslice(bytes, idx, b"</") {
        if starts_with_ignore_ascii_case(bytes, open + 2, tag_bytes)
            && tag_name_boundary(bytes, open + 2 + tag_bytes.len())
        {
            let end = find_byte(bytes, open, b'>').map_or(bytes.len(), |gt| gt + 1);
            return (&input[start..open], end);
        }
        idx = open + 2;
    }

    (&input[start.min(bytes.len())..], bytes.len())
}

fn scan_name(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len()
        && !bytes[idx].is_ascii_whitespace()
        && bytes[idx] != b'/'
        && bytes[idx] != b'>'
    {
        idx += 1;
    }
    idx
}

fn is_attr_name_end(byte: u8) -> bool {
    byte.is_ascii_whitespace() || matches!(byte, b'/' | b'>' | b'=')
}

fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    idx
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }

    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}

/// First `>` outside a quoted identifier.
fn doctype_end(bytes: &[u8], start: usize) -> usize {
    let mut quote = None;
    for (offset, byte) in bytes.iter().enumerate().skip(start) {
        match (quote, *byte) {
            (None, b'>') => return offset,
            (None, b'"' | b'\'') => quote = Some(*byte),
            (Some(open), byte) if byte == open => quote = None,
            _ => {}
        }
    }
    bytes.len()
}

/// Splits off a leading word ending at whitespace or a quote.
fn next_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    let end = input
        .find(|ch: char| ch.is_ascii_whitespace() || ch == '"' || ch == '\'')
        .unwrap_or(input.len());
    input.split_at(end)
}

/// Splits off a leading `"..."` or `'...'` identifier.
fn quoted(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    let quote = input.chars().next().filter(|ch| matches!(ch, '"' | '\''))?;
    let body = &input[1..];
    let close = body.find(quote)?;
    Some((&body[..close], &body[close + 1..]))
}
