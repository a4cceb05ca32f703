//! Identifier and path helpers shared by templates and reports

use std::path::{Path, PathBuf};

/// Converts `snake_case` to `PascalCase`
///
/// ```
/// use etch::util::naming::snake_to_pascal;
///
/// assert_eq!(snake_to_pascal("conv2d_relu"), "Conv2dRelu");
/// ```
pub fn snake_to_pascal(snake: &str) -> String {
    snake
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Maps an arbitrary string to a valid C identifier
pub fn c_ident(value: &str) -> String {
    let mut ident: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

/// `path` relative to `base`; paths outside `base` collapse to `../<file name>`
pub fn safe_relative_path(path: &Path, base: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => match path.file_name() {
            Some(name) => Path::new("..").join(name),
            None => path.to_path_buf(),
        },
    }
}
