//! Selector string parser.
//!
//! Grammar, informally:
//!
//! ```text
//! selector := segment ("." segment)*
//! segment  := "*" | "?" word | "{" member ("," member)* "}" | word
//! member   := "?"? word
//! word     := (char | "\" char | '"' (char | "\" char)* '"')*
//! ```
//!
//! An unquoted word made only of digits is a list index.

use crate::path::{is_digits, Segment};
use crate::selector::{Selector, SelectorSegment, SetMember, OUT_PATH};

/// Malformed selector text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("unterminated quote in selector '{selector}'")]
    UnterminatedQuote { selector: String },

    #[error("dangling escape at end of selector '{selector}'")]
    DanglingEscape { selector: String },

    #[error("unterminated set in selector '{selector}'")]
    UnterminatedSet { selector: String },

    #[error("expected '.' at position {position} in selector '{selector}', found '{found}'")]
    ExpectedSeparator {
        selector: String,
        position: usize,
        found: char,
    },

    #[error("'{OUT_PATH}' cannot be a member of a set in selector '{selector}'")]
    OutPathInSet { selector: String },

    #[error("set mixes indices and attribute names in selector '{selector}'")]
    MixedSet { selector: String },

    #[error("index '{index}' is out of range in selector '{selector}'")]
    IndexOutOfRange { selector: String, index: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// At the start of a segment.
    Start,
    /// Accumulating a plain or maybe word.
    Word { maybe: bool },
    /// Inside `{...}`.
    Set,
    /// After `*` or `}`; only `.` may follow.
    End,
}

/// Accumulates the text of one word, remembering whether any of it was quoted.
#[derive(Debug, Default)]
struct Word {
    text: String,
    quoted: bool,
}

impl Word {
    fn take(&mut self, selector: &str) -> Result<Segment, SelectorError> {
        let word = std::mem::take(self);
        if !word.quoted && is_digits(&word.text) {
            return word
                .text
                .parse::<usize>()
                .map(Segment::Index)
                .map_err(|_| SelectorError::IndexOutOfRange {
                    selector: selector.to_string(),
                    index: word.text.clone(),
                });
        }
        Ok(Segment::Key(word.text))
    }
}

/// Parse a selector string.
///
/// # Examples
///
/// ```
/// use clan_selector::{parse_selector, Segment, SelectorSegment};
///
/// let selector = parse_selector("machines.*.?deploy").unwrap();
/// assert_eq!(selector.segments()[0], SelectorSegment::Literal(Segment::key("machines")));
/// assert_eq!(selector.segments()[1], SelectorSegment::All);
/// ```
pub fn parse_selector(input: &str) -> Result<Selector, SelectorError> {
    let mut segments = Vec::new();
    let mut mode = Mode::Start;
    let mut word = Word::default();
    let mut in_quote = false;
    let mut escape = false;

    // Set state: members so far, and whether the current member is a maybe.
    let mut members: Vec<SetMember> = Vec::new();
    let mut member_maybe: Option<bool> = None;

    for (position, c) in input.chars().enumerate() {
        if escape {
            word.text.push(c);
            escape = false;
            continue;
        }
        if in_quote {
            match c {
                '"' => in_quote = false,
                '\\' => escape = true,
                _ => word.text.push(c),
            }
            continue;
        }

        match mode {
            Mode::End => {
                if c != '.' {
                    return Err(SelectorError::ExpectedSeparator {
                        selector: input.to_string(),
                        position,
                        found: c,
                    });
                }
                mode = Mode::Start;
            }
            Mode::Start => match c {
                '*' => {
                    segments.push(SelectorSegment::All);
                    mode = Mode::End;
                }
                '?' => mode = Mode::Word { maybe: true },
                '{' => mode = Mode::Set,
                '.' => segments.push(SelectorSegment::Literal(word.take(input)?)),
                '"' => {
                    in_quote = true;
                    word.quoted = true;
                    mode = Mode::Word { maybe: false };
                }
                '\\' => {
                    escape = true;
                    mode = Mode::Word { maybe: false };
                }
                _ => {
                    word.text.push(c);
                    mode = Mode::Word { maybe: false };
                }
            },
            Mode::Word { maybe } => match c {
                '.' => {
                    segments.push(word_segment(word.take(input)?, maybe));
                    mode = Mode::Start;
                }
                '"' => {
                    in_quote = true;
                    word.quoted = true;
                }
                '\\' => escape = true,
                _ => word.text.push(c),
            },
            Mode::Set => match c {
                '?' if member_maybe.is_none() => member_maybe = Some(true),
                ',' | '}' => {
                    let segment = word.take(input)?;
                    members.push(if member_maybe == Some(true) {
                        SetMember::Maybe(segment)
                    } else {
                        SetMember::Literal(segment)
                    });
                    member_maybe = None;

                    if c == '}' {
                        segments.push(finish_set(std::mem::take(&mut members), input)?);
                        mode = Mode::End;
                    }
                }
                '"' => {
                    in_quote = true;
                    word.quoted = true;
                    member_maybe.get_or_insert(false);
                }
                '\\' => {
                    escape = true;
                    member_maybe.get_or_insert(false);
                }
                _ => {
                    word.text.push(c);
                    member_maybe.get_or_insert(false);
                }
            },
        }
    }

    if escape {
        return Err(SelectorError::DanglingEscape {
            selector: input.to_string(),
        });
    }
    if in_quote {
        return Err(SelectorError::UnterminatedQuote {
            selector: input.to_string(),
        });
    }

    match mode {
        Mode::Word { maybe } => segments.push(word_segment(word.take(input)?, maybe)),
        Mode::Set => {
            return Err(SelectorError::UnterminatedSet {
                selector: input.to_string(),
            })
        }
        Mode::Start | Mode::End => {}
    }

    Ok(Selector::new(segments))
}

fn word_segment(segment: Segment, maybe: bool) -> SelectorSegment {
    if maybe {
        SelectorSegment::Maybe(segment)
    } else {
        SelectorSegment::Literal(segment)
    }
}

fn finish_set(members: Vec<SetMember>, selector: &str) -> Result<SelectorSegment, SelectorError> {
    if members
        .iter()
        .any(|m| m.segment().as_key() == Some(OUT_PATH))
    {
        return Err(SelectorError::OutPathInSet {
            selector: selector.to_string(),
        });
    }

    let indices = members
        .iter()
        .filter(|m| matches!(m.segment(), Segment::Index(_)))
        .count();
    if indices != 0 && indices != members.len() {
        return Err(SelectorError::MixedSet {
            selector: selector.to_string(),
        });
    }

    Ok(SelectorSegment::Set(members))
}
