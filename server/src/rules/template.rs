//! `{{...}}` placeholder templates used in action fields.

use derive_more::derive::Display;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span<'a> {
    Literal(&'a str),
    /// Instruction text between the braces, trimmed.
    Placeholder(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TemplateError {
    #[display("Unterminated placeholder starting at position {_0}")]
    Unterminated(usize),
    #[display("Empty placeholder at position {_0}")]
    Empty(usize),
}

impl std::error::Error for TemplateError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<'a> {
    spans: Vec<Span<'a>>,
}

impl<'a> Template<'a> {
    pub fn parse(source: &'a str) -> Result<Self, TemplateError> {
        let mut spans = vec![];
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                spans.push(Span::Literal(&rest[..start]));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let instruction = after_open[..end].trim();
            if instruction.is_empty() {
                return Err(TemplateError::Empty(offset + start));
            }
            spans.push(Span::Placeholder(instruction));

            let consumed = start + OPEN.len() + end + CLOSE.len();
            rest = &rest[consumed..];
            offset += consumed;
        }
        if !rest.is_empty() {
            spans.push(Span::Literal(rest));
        }

        Ok(Self { spans })
    }

    pub fn spans(&self) -> &[Span<'a>] {
        &self.spans
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.spans.iter().filter_map(|span| match span {
            Span::Placeholder(instruction) => Some(*instruction),
            Span::Literal(_) => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.placeholders().next().is_none()
    }

    /// Substitutes placeholders in order with `values`.
    /// Missing values render as empty text.
    pub fn render<S: AsRef<str>>(&self, values: &[S]) -> String {
        let mut values = values.iter();
        self.spans
            .iter()
            .map(|span| match span {
                Span::Literal(text) => *text,
                Span::Placeholder(_) => values.next().map(|v| v.as_ref()).unwrap_or(""),
            })
            .collect()
    }
}

pub fn has_placeholders(source: &str) -> bool {
    source.contains(OPEN)
}
