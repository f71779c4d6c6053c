//! Location keys shared by the static scanner and the runtime recorder.
//!
//! Both sides must agree on `<Class>#<method>:<line>`. The scanner reads the
//! simple type name off an `impl` block; the recorder recovers it from a
//! demangled symbol such as `<app::shapes::Circle as core::fmt::Display>::fmt`.
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CovmarkError;

/// Legacy-mangled symbols end in a hash segment like `h0123456789abcdef`.
static RE_LEGACY_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^h[0-9a-f]{16}$").unwrap());

/// A marker location: the type, the method, and the file-absolute line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    pub class: String,
    pub method: String,
    pub line: u32,
}

impl LocationKey {
    pub fn new(class: impl Into<String>, method: impl Into<String>, line: u32) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            line,
        }
    }

    /// Build a key from a demangled runtime symbol and the line debug info
    /// reported for it. Returns `None` when the symbol has no owning type.
    pub fn from_symbol(symbol: &str, line: u32) -> Option<Self> {
        let path = SymbolPath::parse(symbol)?;
        let (class, method) = path.owner_and_name()?;
        Some(Self::new(class, method, line))
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}:{}", self.class, self.method, self.line)
    }
}

impl FromStr for LocationKey {
    type Err = CovmarkError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || CovmarkError::InvalidKey(s.to_string());

        let (owner, line) = s.rsplit_once(':').ok_or_else(invalid)?;
        let line = line.parse::<u32>().map_err(|_| invalid())?;
        let (class, method) = owner.split_once('#').ok_or_else(invalid)?;
        if class.is_empty() || method.is_empty() || line == 0 {
            return Err(invalid());
        }
        Ok(Self::new(class, method, line))
    }
}

/// A demangled symbol reduced to plain path segments.
///
/// Hash suffixes, closure/async shims, generic arguments and qualified-self
/// wrappers are removed, so `<demo::Wrapper<T> as Trait>::get::{{closure}}`
/// becomes `demo::Wrapper::get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolPath {
    segments: Vec<String>,
}

impl SymbolPath {
    pub fn parse(symbol: &str) -> Option<Self> {
        let mut segments = Vec::new();
        push_segments(symbol.trim(), &mut segments);
        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last two segments: the owning type (or module) and the function.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        match self.segments.as_slice() {
            [.., owner, name] => Some((owner.as_str(), name.as_str())),
            _ => None,
        }
    }

    /// Whether this path is exactly `path` (a `::`-separated string).
    pub fn is(&self, path: &str) -> bool {
        self.segments.iter().map(String::as_str).eq(path.split("::"))
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("::"))
    }
}

fn push_segments(path: &str, out: &mut Vec<String>) {
    for part in split_top_level(path, "::") {
        let part = part.trim();
        if part.is_empty() || part.starts_with('{') || RE_LEGACY_HASH.is_match(part) {
            continue;
        }

        // `<Type as Trait>` or `<Type>`: the key uses the implementing type.
        if let Some(inner) = part.strip_prefix('<').and_then(|p| p.strip_suffix('>')) {
            let self_ty = split_top_level(inner, " as ")
                .into_iter()
                .next()
                .unwrap_or(inner);
            push_segments(strip_type_prefix(self_ty), out);
            continue;
        }

        let name = plain_segment(part);
        if !name.is_empty() {
            out.push(name.to_string());
        }
    }
}

/// Drop generic arguments and v0 crate disambiguators: `Wrapper<T>` -> `Wrapper`.
fn plain_segment(part: &str) -> &str {
    let end = part.find(['<', '[']).unwrap_or(part.len());
    part[..end].trim()
}

fn strip_type_prefix(mut ty: &str) -> &str {
    loop {
        let trimmed = ty.trim_start();
        let next = ["&", "mut ", "dyn ", "*const ", "*mut "]
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix));
        match next {
            Some(rest) => ty = rest,
            None => return trimmed,
        }
    }
}

/// Split on `sep` only outside of `<...>` nesting. `->` does not close a level.
fn split_top_level<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let bytes = s.as_bytes();
    let sep = sep.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b'>' => depth = depth.saturating_sub(1),
            _ if depth == 0 && bytes[i..].starts_with(sep) => {
                parts.push(&s[start..i]);
                i += sep.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let key = LocationKey::new("Circle", "area", 42);
        assert_eq!(key.to_string(), "Circle#area:42");
        assert_eq!("Circle#area:42".parse::<LocationKey>().unwrap(), key);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("Circle#area".parse::<LocationKey>().is_err());
        assert!("Circle:12".parse::<LocationKey>().is_err());
        assert!("#area:12".parse::<LocationKey>().is_err());
        assert!("Circle#area:x".parse::<LocationKey>().is_err());
        assert!("Circle#area:0".parse::<LocationKey>().is_err());
    }

    #[test]
    fn test_symbol_inherent_method() {
        let key = LocationKey::from_symbol("demo::shapes::Circle::area", 10).unwrap();
        assert_eq!(key.to_string(), "Circle#area:10");
    }

    #[test]
    fn test_symbol_strips_legacy_hash() {
        let key =
            LocationKey::from_symbol("demo::shapes::Circle::area::h0123456789abcdef", 7).unwrap();
        assert_eq!(key.to_string(), "Circle#area:7");
    }

    #[test]
    fn test_symbol_trait_impl() {
        let key =
            LocationKey::from_symbol("<demo::shapes::Circle as core::fmt::Display>::fmt", 3)
                .unwrap();
        assert_eq!(key.to_string(), "Circle#fmt:3");
    }

    #[test]
    fn test_symbol_generic_trait_impl() {
        let key = LocationKey::from_symbol(
            "<demo::Wrapper<alloc::vec::Vec<u8>> as demo::Store<u8>>::put",
            5,
        )
        .unwrap();
        assert_eq!(key.to_string(), "Wrapper#put:5");
    }

    #[test]
    fn test_symbol_v0_inherent_impl() {
        let key = LocationKey::from_symbol("<demo::Wrapper<i32>>::get", 9).unwrap();
        assert_eq!(key.to_string(), "Wrapper#get:9");
    }

    #[test]
    fn test_symbol_reference_self_type() {
        let key = LocationKey::from_symbol("<&mut demo::Parser as demo::Read>::read", 2).unwrap();
        assert_eq!(key.to_string(), "Parser#read:2");
    }

    #[test]
    fn test_symbol_closures_collapse_to_method() {
        let legacy = LocationKey::from_symbol("demo::Worker::run::{{closure}}::{{closure}}", 4);
        let v0 = LocationKey::from_symbol("demo::Worker::run::{closure#0}", 4);
        assert_eq!(legacy.unwrap().to_string(), "Worker#run:4");
        assert_eq!(v0.unwrap().to_string(), "Worker#run:4");
    }

    #[test]
    fn test_symbol_without_owner() {
        assert!(LocationKey::from_symbol("main", 1).is_none());
        assert!(LocationKey::from_symbol("", 1).is_none());
    }

    #[test]
    fn test_symbol_fn_pointer_generic() {
        let path = SymbolPath::parse("<demo::Table<fn() -> u8> as demo::Lookup>::find").unwrap();
        assert_eq!(path.to_string(), "demo::Table::find");
    }

    #[test]
    fn test_symbol_path_is() {
        let path = SymbolPath::parse("<covmark::recorder::Session>::sample").unwrap();
        assert!(path.is("covmark::recorder::Session::sample"));
        assert!(!path.is("covmark::sample"));
    }
}
