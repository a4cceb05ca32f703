//! Parameter reference syntax
//!
//! - `${<id>.output}` is the final output directory of kernel `<id>`
//! - `${<id>.params.<name>}` is the expanded value of another parameter
//! - `$${` is a literal `${`

use super::is_valid_kernel_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Output { kernel: String },
    Param { kernel: String, name: String },
}

/// Splits a parameter value into literal text and references.
///
/// On a malformed reference, returns the offending `${...}` text.
pub(crate) fn parse(value: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = value;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("$${") {
            literal.push_str("${");
            rest = after;
        } else if let Some(after) = rest.strip_prefix("${") {
            let Some(end) = after.find('}') else {
                return Err(rest.to_string());
            };
            let inner = &after[..end];
            let segment = parse_reference(inner).ok_or_else(|| format!("${{{inner}}}"))?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &after[end + 1..];
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                literal.push(c);
            }
            rest = chars.as_str();
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn parse_reference(inner: &str) -> Option<Segment> {
    let parts: Vec<&str> = inner.trim().split('.').collect();
    match parts.as_slice() {
        [kernel, "output"] if is_valid_kernel_id(kernel) => Some(Segment::Output {
            kernel: kernel.to_string(),
        }),
        [kernel, "params", name] if is_valid_kernel_id(kernel) && !name.is_empty() => {
            Some(Segment::Param {
                kernel: kernel.to_string(),
                name: name.to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn lit(s: &str) -> Segment {
        Segment::Literal(s.to_string())
    }

    #[test]
    fn test_plain_value() {
        assert_eq!(parse("int8").unwrap(), vec![lit("int8")]);
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_mixed_references() {
        let segments = parse("-I${norm.output}/include -DTILE=${gemm.params.tile}").unwrap();
        assert_eq!(
            segments,
            vec![
                lit("-I"),
                Segment::Output {
                    kernel: "norm".to_string()
                },
                lit("/include -DTILE="),
                Segment::Param {
                    kernel: "gemm".to_string(),
                    name: "tile".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(parse("cost: $${HOME}").unwrap(), vec![lit("cost: ${HOME}")]);
        assert_eq!(parse("$5 and $x").unwrap(), vec![lit("$5 and $x")]);
    }

    #[test]
    fn test_non_ascii_literal() {
        assert_eq!(parse("µs ${a.output}").unwrap()[0], lit("µs "));
    }

    #[parameterized(
        unterminated = { "${a.output", "${a.output" },
        unknown_field = { "x ${a.source} y", "${a.source}" },
        missing_param_name = { "${a.params.}", "${a.params.}" },
        bare_id = { "${a}", "${a}" },
        bad_id = { "${a b.output}", "${a b.output}" },
        empty = { "${}", "${}" },
    )]
    fn test_malformed(value: &str, reported: &str) {
        assert_eq!(parse(value).unwrap_err(), reported);
    }
}
