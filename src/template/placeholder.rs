//! `@NAME` placeholder templates.
//!
//! `@NAME` takes the longest run of identifier characters, `@{NAME}` delimits a
//! name explicitly and `@@` is a literal `@`. Any other `@` is copied through.

use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder { name: String, line: usize },
}

#[derive(Clone, Debug)]
pub struct PlaceholderTemplate {
    segments: Vec<Segment>,
}

pub fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl PlaceholderTemplate {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut line = 1;
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '@' {
                if c == '\n' {
                    line += 1;
                }
                literal.push(c);
                continue;
            }

            let name = match chars.peek() {
                Some('@') => {
                    chars.next();
                    literal.push('@');
                    continue;
                }
                Some('{') => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut name = String::new();
                    while let Some(&c) = lookahead.peek() {
                        if !is_name_char(c) {
                            break;
                        }
                        name.push(c);
                        lookahead.next();
                    }
                    let closed = lookahead.peek() == Some(&'}');
                    if !closed || !name.starts_with(is_name_start) {
                        literal.push('@');
                        continue;
                    }
                    lookahead.next();
                    chars = lookahead;
                    name
                }
                Some(&c) if is_name_start(c) => {
                    let mut name = String::new();
                    while let Some(&c) = chars.peek() {
                        if !is_name_char(c) {
                            break;
                        }
                        name.push(c);
                        chars.next();
                    }
                    name
                }
                _ => {
                    literal.push('@');
                    continue;
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder { name, line });
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    pub fn placeholders(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Placeholder { name, .. } => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Fills every placeholder through `lookup`, or returns the unresolved
    /// `name (line N)` occurrences.
    pub fn fill<'a, F>(&self, lookup: F) -> Result<String, Vec<String>>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut text = String::new();
        let mut unresolved = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Placeholder { name, line } => match lookup(name) {
                    Some(value) => text.push_str(value),
                    None => unresolved.push(format!("@{name} (line {line})")),
                },
            }
        }

        if unresolved.is_empty() {
            Ok(text)
        } else {
            Err(unresolved)
        }
    }
}
