use tracing::debug;

use crate::{
    bridge::Bridge,
    error::{BridgeResult, Error},
    marshal::Arg,
    object::Object,
};

/// Source text for [`Bridge::evaluate`].
#[derive(Debug, Clone)]
pub enum Source {
    /// Executed against the shared global namespace.
    Plain(String),
    /// Literal text segments with one interpolated value between each pair.
    ///
    /// Interpolated values are bound in a private copy of the global namespace,
    /// so the shared namespace never sees them.
    Template { parts: Vec<String>, values: Vec<Arg> },
}

impl Source {
    pub fn template<S: Into<String>>(parts: impl IntoIterator<Item = S>, values: Vec<Arg>) -> Self {
        Self::Template {
            parts: parts.into_iter().map(Into::into).collect(),
            values,
        }
    }
}

impl From<&str> for Source {
    fn from(source: &str) -> Self {
        Self::Plain(source.to_owned())
    }
}

impl From<String> for Source {
    fn from(source: String) -> Self {
        Self::Plain(source)
    }
}

impl Bridge {
    /// Executes multi-line source in the foreign runtime and wraps its result.
    ///
    /// Blank lines are dropped and the common indentation stripped first, so an
    /// indented raw string literal runs as top-level statements. Plain sources
    /// and templates without values use the shared globals; templates with
    /// values run in a shadow copy where each value is bound under
    /// [`BridgeOptions::interpolation_name`](crate::BridgeOptions::interpolation_name).
    pub fn evaluate(&self, source: impl Into<Source>) -> BridgeResult<Object> {
        let runtime = self.runtime();
        let globals = runtime.globals();
        let (code, namespace) = match source.into() {
            Source::Plain(code) => (code, globals),
            Source::Template { mut parts, values } if values.is_empty() && parts.len() == 1 => {
                (parts.swap_remove(0), globals)
            }
            Source::Template { parts, values } => {
                if parts.len() != values.len() + 1 {
                    return Err(Error::type_error(format!(
                        "template has {} text parts for {} values",
                        parts.len(),
                        values.len()
                    )));
                }
                let shadow = globals.get_attr("copy")?.invoke(Vec::new())?;
                let mut code = String::new();
                for (index, (part, value)) in parts.iter().zip(values).enumerate() {
                    let name = self.options().interpolation_name(index);
                    if !shadow.set_item(Arg::Str(name.clone()), value).is_ok() {
                        return Err(Error::type_error(format!("cannot bind interpolated value {name}")));
                    }
                    code.push_str(part);
                    code.push_str(&name);
                }
                if let Some(last) = parts.last() {
                    code.push_str(last);
                }
                (code, shadow)
            }
        };

        let code = if self.options().dedent {
            normalize_source(&code)
        } else {
            code
        };
        debug!(lines = code.lines().count(), "evaluating source");
        let result = runtime.exec(&code, &namespace, &namespace)?;
        self.wrap(result)
    }
}

/// Drops blank lines and strips the indentation common to the rest.
pub(crate) fn normalize_source(source: &str) -> String {
    let lines: Vec<&str> = source.lines().filter(|line| !line.trim().is_empty()).collect();
    let indent = lines.iter().map(|line| leading_whitespace(line)).min().unwrap_or(0);
    lines
        .iter()
        .map(|line| strip_chars(line, indent))
        .collect::<Vec<_>>()
        .join("\n")
}

fn leading_whitespace(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn strip_chars(line: &str, count: usize) -> &str {
    line.char_indices().nth(count).map_or("", |(offset, _)| &line[offset..])
}

#[cfg(test)]
mod tests {
    use super::normalize_source;

    #[test]
    fn strips_common_indentation() {
        let source = "\n    x = 1\n      y = 2\n    x\n";
        assert_eq!(normalize_source(source), "x = 1\n  y = 2\nx");
    }

    #[test]
    fn drops_whitespace_only_lines() {
        let source = "  a = 1\n   \n\t\n  a";
        assert_eq!(normalize_source(source), "a = 1\na");
    }

    #[test]
    fn unindented_source_is_unchanged() {
        assert_eq!(normalize_source("a = 1\nb = 2"), "a = 1\nb = 2");
    }

    #[test]
    fn empty_source_normalizes_to_empty() {
        assert_eq!(normalize_source("\n  \n"), "");
    }

    #[test]
    fn handles_crlf_line_endings() {
        assert_eq!(normalize_source("  a = 1\r\n  a\r\n"), "a = 1\na");
    }
}
