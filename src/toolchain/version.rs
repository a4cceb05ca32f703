use regex::Regex;
use semver::Version;
use std::sync::OnceLock;

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("valid regex"))
}

/// Parses `MAJOR.MINOR[.PATCH]`, treating a missing patch as 0
///
/// ```
/// use etch::toolchain::parse_version_lenient;
/// use semver::Version;
///
/// assert_eq!(parse_version_lenient("3.20"), Some(Version::new(3, 20, 0)));
/// assert_eq!(parse_version_lenient("1.11.1"), Some(Version::new(1, 11, 1)));
/// assert_eq!(parse_version_lenient("latest"), None);
/// ```
pub fn parse_version_lenient(input: &str) -> Option<Version> {
    let trimmed = input.trim().trim_start_matches('v');
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }
    let caps = version_regex().captures(trimmed)?;
    if caps.get(0)?.start() != 0 || caps.get(0)?.end() != trimmed.len() {
        return None;
    }
    version_from_captures(&caps)
}

/// Finds the first version-looking token in a tool's `--version` output
pub fn extract_version(output: &str) -> Option<Version> {
    let caps = version_regex().captures(output)?;
    version_from_captures(&caps)
}

fn version_from_captures(caps: &regex::Captures<'_>) -> Option<Version> {
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    let patch = match caps.get(3) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    Some(Version::new(major, minor, patch))
}
