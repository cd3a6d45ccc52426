//! Job name templates.
//!
//! A job's name doubles as its deduplication key, so it has to be derived from
//! the job's inputs deterministically. Jobs build it explicitly: either with
//! `format!` or with a `NameTemplate` plus the arguments it references.
//!
//! ```ignore
//! const NAME: NameTemplate = NameTemplate::new("import_{fileId}");
//! let name = NAME.render(&[("fileId", &42)])?;
//! assert_eq!(name, "import_42");
//! ```

use core::fmt::{self, Display, Write as _};

use crate::error::{CoreError, CoreResult};

/// A `{placeholder}` template for job names.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NameTemplate(&'static str);

impl NameTemplate {
    pub const fn new(template: &'static str) -> Self {
        Self(template)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> CoreResult<Vec<&'static str>> {
        let mut found = Vec::new();
        for segment in Segments::new(self.0) {
            if let Segment::Placeholder(name) = segment? {
                found.push(name);
            }
        }
        Ok(found)
    }

    /// Substitute every placeholder with the matching argument.
    ///
    /// Arguments not referenced by the template are ignored; a placeholder with
    /// no matching argument is an error.
    pub fn render(&self, args: &[(&str, &dyn Display)]) -> CoreResult<String> {
        let mut out = String::with_capacity(self.0.len());
        for segment in Segments::new(self.0) {
            match segment? {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let (_, value) = args
                        .iter()
                        .find(|(key, _)| *key == name)
                        .ok_or_else(|| CoreError::missing_placeholder(self.0, name))?;
                    // Writing into a String cannot fail.
                    let _ = write!(out, "{value}");
                }
            }
        }
        Ok(out)
    }
}

impl Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

enum Segment {
    Literal(&'static str),
    Placeholder(&'static str),
}

struct Segments {
    template: &'static str,
    rest: &'static str,
}

impl Segments {
    fn new(template: &'static str) -> Self {
        Self {
            template,
            rest: template,
        }
    }
}

impl Iterator for Segments {
    type Item = CoreResult<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        if let Some(after_open) = self.rest.strip_prefix('{') {
            let Some(close) = after_open.find('}') else {
                self.rest = "";
                return Some(Err(CoreError::MalformedTemplate(self.template.to_string())));
            };
            let name = &after_open[..close];
            self.rest = &after_open[close + 1..];
            if name.is_empty() || name.contains('{') {
                self.rest = "";
                return Some(Err(CoreError::MalformedTemplate(self.template.to_string())));
            }
            return Some(Ok(Segment::Placeholder(name)));
        }

        let end = self.rest.find(['{', '}']).unwrap_or(self.rest.len());
        if end == 0 {
            // A stray closing brace.
            self.rest = "";
            return Some(Err(CoreError::MalformedTemplate(self.template.to_string())));
        }
        let literal = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(Ok(Segment::Literal(literal)))
    }
}
