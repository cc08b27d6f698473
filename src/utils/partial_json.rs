//! Best-effort decoding of an incomplete JSON document.
//!
//! Streamed model output is a growing prefix of one JSON object. After each
//! delta we want the most complete value that prefix already determines:
//! open strings are closed, open arrays and objects are closed, and anything
//! that cannot stand on its own yet (a dangling key, a trailing comma or
//! colon, half a literal, half an escape sequence) is dropped.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Key,
    Colon,
    Value,
    CommaOrClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object(Expect),
    Array(Expect),
}

/// A prefix length at which the document can be closed validly.
#[derive(Debug, Clone)]
struct Checkpoint {
    end: usize,
    closers: String,
    string_open: bool,
}

struct Scanner {
    stack: Vec<Frame>,
    last: Option<Checkpoint>,
    done: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            last: None,
            done: false,
        }
    }

    fn checkpoint(&mut self, end: usize, string_open: bool) {
        let closers = self
            .stack
            .iter()
            .rev()
            .map(|f| match f {
                Frame::Object(_) => '}',
                Frame::Array(_) => ']',
            })
            .collect();
        self.last = Some(Checkpoint {
            end,
            closers,
            string_open,
        });
    }

    fn expects_value(&self) -> bool {
        match self.stack.last() {
            None => !self.done,
            Some(Frame::Object(e)) | Some(Frame::Array(e)) => *e == Expect::Value,
        }
    }

    fn expects_key(&self) -> bool {
        matches!(self.stack.last(), Some(Frame::Object(Expect::Key)))
    }

    fn value_complete(&mut self, end: usize) {
        match self.stack.last_mut() {
            None => self.done = true,
            Some(Frame::Object(e)) | Some(Frame::Array(e)) => *e = Expect::CommaOrClose,
        }
        self.checkpoint(end, false);
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '}' | ']' | ':')
}

fn literal_is_valid(literal: &str) -> bool {
    serde_json::from_str::<Value>(literal).is_ok()
}

/// Length of the longest non-empty prefix of `literal` that is a valid value.
fn longest_valid_prefix(literal: &str) -> Option<usize> {
    (1..literal.len())
        .rev()
        .filter(|&n| literal.is_char_boundary(n))
        .find(|&n| literal_is_valid(&literal[..n]))
}

/// Decode the most complete value determined by `text`, a prefix of a JSON document.
///
/// Returns `None` when the prefix does not yet determine any value.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    let mut sc = Scanner::new();
    let mut chars = text.char_indices().peekable();

    'scan: while let Some((i, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        match c {
            '{' | '[' => {
                if !sc.expects_value() {
                    break 'scan;
                }
                sc.stack.push(if c == '{' {
                    Frame::Object(Expect::Key)
                } else {
                    Frame::Array(Expect::Value)
                });
                sc.checkpoint(i + 1, false);
            }
            '}' | ']' => {
                let closable = match (c, sc.stack.last()) {
                    ('}', Some(Frame::Object(e))) => *e == Expect::CommaOrClose || *e == Expect::Key,
                    (']', Some(Frame::Array(e))) => *e == Expect::CommaOrClose || *e == Expect::Value,
                    _ => false,
                };
                if !closable {
                    break 'scan;
                }
                sc.stack.pop();
                sc.value_complete(i + 1);
            }
            ':' => match sc.stack.last_mut() {
                Some(Frame::Object(e)) if *e == Expect::Colon => *e = Expect::Value,
                _ => break 'scan,
            },
            ',' => match sc.stack.last_mut() {
                Some(Frame::Object(e)) if *e == Expect::CommaOrClose => *e = Expect::Key,
                Some(Frame::Array(e)) if *e == Expect::CommaOrClose => *e = Expect::Value,
                _ => break 'scan,
            },
            '"' => {
                let is_key = sc.expects_key();
                if !is_key && !sc.expects_value() {
                    break 'scan;
                }
                if !is_key {
                    sc.checkpoint(i + 1, true);
                }
                // Scan the string body.
                loop {
                    let Some((j, d)) = chars.next() else {
                        break 'scan;
                    };
                    match d {
                        '"' => {
                            if is_key {
                                if let Some(Frame::Object(e)) = sc.stack.last_mut() {
                                    *e = Expect::Colon;
                                }
                            } else {
                                sc.value_complete(j + 1);
                            }
                            break;
                        }
                        '\\' => {
                            let Some((k, esc)) = chars.next() else {
                                break 'scan;
                            };
                            let mut end = k + esc.len_utf8();
                            let mut code_unit = 0u32;
                            if esc == 'u' {
                                for _ in 0..4 {
                                    match chars.next() {
                                        Some((h, hex)) if hex.is_ascii_hexdigit() => {
                                            code_unit = code_unit * 16 + hex.to_digit(16).unwrap_or(0);
                                            end = h + 1;
                                        }
                                        Some(_) => break 'scan,
                                        None => break 'scan,
                                    }
                                }
                            }
                            // A high surrogate only decodes together with the low half that follows it.
                            let lone_high_surrogate =
                                esc == 'u' && (0xD800..=0xDBFF).contains(&code_unit);
                            if !is_key && !lone_high_surrogate {
                                sc.checkpoint(end, true);
                            }
                        }
                        _ => {
                            if !is_key {
                                sc.checkpoint(j + d.len_utf8(), true);
                            }
                        }
                    }
                }
            }
            _ => {
                if !sc.expects_value() {
                    break 'scan;
                }
                let start = i;
                let mut end = i + c.len_utf8();
                while let Some(&(j, d)) = chars.peek() {
                    if is_delimiter(d) {
                        break;
                    }
                    end = j + d.len_utf8();
                    chars.next();
                }
                if !literal_is_valid(&text[start..end]) {
                    // A number still being written at end of input keeps its valid part.
                    if chars.peek().is_none() {
                        if let Some(len) = longest_valid_prefix(&text[start..end]) {
                            sc.value_complete(start + len);
                        }
                    }
                    break 'scan;
                }
                sc.value_complete(end);
            }
        }
    }

    let cp = sc.last?;
    let mut candidate = String::with_capacity(cp.end + cp.closers.len() + 1);
    candidate.push_str(&text[..cp.end]);
    if cp.string_open {
        candidate.push('"');
    }
    candidate.push_str(&cp.closers);
    serde_json::from_str(&candidate).ok()
}
