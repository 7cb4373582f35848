//! Placeholder substitution for paths, location file lines and catalog fields.
//!
//! Recognized forms are `$name`, `${name}`, `${name['key']}`, `${name.key}`
//! and `${name('arg')}`; `$$` produces a literal dollar. Placeholders the
//! resolver does not know are left untouched.

use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r#"\$(?:(?P<escaped>\$)|\{(?P<braced>\w+)(?:\[['"](?P<key>[^'"]*)['"]\]|\.(?P<attr>\w+)|\(['"](?P<arg>[^'"]*)['"]\))?\}|(?P<bare>\w+))"#,
    )
    .unwrap()
});

pub const HERE: &str = "__HERE__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor<'a> {
    /// `${name['key']}` or `${name.key}`
    Key(&'a str),
    /// `${name('arg')}`
    Call(&'a str),
}

pub fn substitute<F>(content: &str, mut resolve: F) -> String
where
    F: FnMut(&str, Option<Accessor<'_>>) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(content, |caps: &regex::Captures<'_>| {
            if caps.name("escaped").is_some() {
                return "$".to_owned();
            }
            let (name, accessor) = if let Some(name) = caps.name("braced") {
                let accessor = caps
                    .name("key")
                    .or_else(|| caps.name("attr"))
                    .map(|key| Accessor::Key(key.as_str()))
                    .or_else(|| caps.name("arg").map(|arg| Accessor::Call(arg.as_str())));
                (name.as_str(), accessor)
            } else if let Some(name) = caps.name("bare") {
                (name.as_str(), None)
            } else {
                return caps[0].to_owned();
            };
            resolve(name, accessor).unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

/// Expand `__HERE__` to the given directory.
pub fn expand_here(content: &str, here: &str) -> String {
    if !content.contains('$') {
        return content.to_owned();
    }
    substitute(content, |name, accessor| {
        (name == HERE && accessor.is_none()).then(|| here.to_owned())
    })
}
