//! `{{ path }}` / `{{ path | filter }}` substitution

use super::RenderContext;
use crate::util::naming::{c_ident, snake_to_pascal};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// Every `{{ ... }}` span on a single line
fn span_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^\n]*?)\}\}").expect("valid regex"))
}

/// What a span may contain: one variable path and at most one filter
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9_.\-]+)\s*(?:\|\s*([A-Za-z_]+)\s*)?$").expect("valid regex")
    })
}

/// Why a placeholder could not be rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RenderFailure {
    pub variable: String,
    pub reason: String,
}

impl RenderFailure {
    fn malformed(span: &str) -> Self {
        Self {
            variable: span.to_string(),
            reason: "malformed placeholder".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    Upper,
    Lower,
    Pascal,
    CIdent,
}

impl Filter {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "upper" => Some(Filter::Upper),
            "lower" => Some(Filter::Lower),
            "pascal" => Some(Filter::Pascal),
            "c_ident" => Some(Filter::CIdent),
            _ => None,
        }
    }

    fn apply(self, value: &str) -> String {
        match self {
            Filter::Upper => value.to_uppercase(),
            Filter::Lower => value.to_lowercase(),
            Filter::Pascal => snake_to_pascal(value),
            Filter::CIdent => c_ident(value),
        }
    }
}

struct Placeholder<'t> {
    span: Range<usize>,
    variable: &'t str,
    filter: Option<&'t str>,
}

/// A `{{` that no span on its line closes
fn reject_unterminated(text: &str) -> Result<(), RenderFailure> {
    match text.find("{{") {
        Some(pos) => {
            let rest = &text[pos..];
            let line = rest.lines().next().unwrap_or(rest);
            Err(RenderFailure::malformed(line.trim_end()))
        }
        None => Ok(()),
    }
}

/// Every placeholder in `text`; any `{{` outside the grammar is an error
///
/// Literal double braces (nested C initializers, for instance) must be
/// written with a space: `{ {`.
fn placeholders(text: &str) -> Result<Vec<Placeholder<'_>>, RenderFailure> {
    let mut found = Vec::new();
    let mut last = 0;

    for caps in span_regex().captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        reject_unterminated(&text[last..whole.start()])?;

        let parsed = placeholder_regex()
            .captures(inner.as_str())
            .ok_or_else(|| RenderFailure::malformed(whole.as_str()))?;
        let variable = parsed
            .get(1)
            .map(|m| m.as_str())
            .ok_or_else(|| RenderFailure::malformed(whole.as_str()))?;

        found.push(Placeholder {
            span: whole.range(),
            variable,
            filter: parsed.get(2).map(|m| m.as_str()),
        });
        last = whole.end();
    }
    reject_unterminated(&text[last..])?;

    Ok(found)
}

/// Checks every placeholder in `text` without producing output
pub(crate) fn check(text: &str, context: &RenderContext) -> Result<(), RenderFailure> {
    for placeholder in placeholders(text)? {
        resolve(&placeholder, context)?;
    }
    Ok(())
}

pub(crate) fn render(text: &str, context: &RenderContext) -> Result<String, RenderFailure> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for placeholder in placeholders(text)? {
        out.push_str(&text[last..placeholder.span.start]);
        out.push_str(&resolve(&placeholder, context)?);
        last = placeholder.span.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn resolve(placeholder: &Placeholder<'_>, context: &RenderContext) -> Result<String, RenderFailure> {
    let variable = placeholder.variable;
    let value = context.get(variable).ok_or_else(|| RenderFailure {
        variable: variable.to_string(),
        reason: "is not defined in the render context".to_string(),
    })?;

    match placeholder.filter {
        None => Ok(value.to_string()),
        Some(name) => {
            let filter = Filter::parse(name).ok_or_else(|| RenderFailure {
                variable: variable.to_string(),
                reason: format!("uses unknown filter '{}'", name),
            })?;
            Ok(filter.apply(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn context() -> RenderContext {
        let mut ctx = RenderContext::new();
        ctx.insert("kernel.id", "conv2d_relu");
        ctx.insert("param.tile", "16");
        ctx.insert("board.id", "stm32-h7");
        ctx
    }

    #[parameterized(
        plain = { "tile={{param.tile}}", "tile=16" },
        spaced = { "{{  kernel.id  }}", "conv2d_relu" },
        upper = { "{{ kernel.id | upper }}", "CONV2D_RELU" },
        pascal = { "{{ kernel.id | pascal }}", "Conv2dRelu" },
        c_ident = { "{{ board.id | c_ident }}", "stm32_h7" },
        lower = { "{{ kernel.id|lower }}", "conv2d_relu" },
        untouched = { "{ single } and { {1, 2} }", "{ single } and { {1, 2} }" },
        repeated = { "{{param.tile}}x{{param.tile}}", "16x16" },
    )]
    fn test_render(template: &str, expected: &str) {
        assert_eq!(render(template, &context()).unwrap(), expected);
    }

    #[test]
    fn test_missing_variable() {
        let err = render("{{ param.missing }}", &context()).unwrap_err();
        assert_eq!(err.variable, "param.missing");
        assert!(err.reason.contains("not defined"));
    }

    #[test]
    fn test_unknown_filter() {
        let err = check("{{ kernel.id | reverse }}", &context()).unwrap_err();
        assert_eq!(err.variable, "kernel.id");
        assert!(err.reason.contains("reverse"));
    }

    #[parameterized(
        chained_filters = { "int {{ kernel.id | upper | lower }};", "{{ kernel.id | upper | lower }}" },
        space_in_name = { "= {{ param.tile size }};", "{{ param.tile size }}" },
        empty = { "a {{ }} b", "{{ }}" },
        nested_initializer = { "int m[2][2] = {{1, 2}, {3, 4}};", "{{1, 2}, {3, 4}}" },
        unterminated = { "x = {{ kernel.id;\ny = 1;", "{{ kernel.id;" },
        after_valid = { "{{ kernel.id }} {{ param.tile", "{{ param.tile" },
    )]
    fn test_malformed_placeholder(template: &str, span: &str) {
        let err = check(template, &context()).unwrap_err();
        assert_eq!(err.variable, span);
        assert_eq!(err.reason, "malformed placeholder");
        assert_eq!(render(template, &context()).unwrap_err(), err);
    }
}
