//! Key generation and inspection shared by all backends.
//!
//! Keys are slash-delimited relative paths such as
//! `listings/123/20260101_120000_My_Car_Photo_JPG`. They are produced by
//! substituting placeholders in a per-category [`KeyTemplate`]; substitution is
//! plain string replacement over a template parsed once at startup.
//!
//! Supported placeholders: `{id}`, `{timestamp}` (`yyyyMMdd_HHmmss`, UTC),
//! `{date}` (`yyyy-MM-dd`, UTC), `{uuid}`, `{filename}`, `{category}`,
//! `{originalPath}`.

use crate::traits::{StorageError, StorageResult};
use assetgate_core::{FileCategory, StorageConfig};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;
const FALLBACK_NAME: &str = "file";
/// Characters object stores rewrite or reject in object names.
pub const RESERVED_CHARS: &[char] = &[
    '\\', '{', '}', '^', '%', '`', '[', ']', '"', '<', '>', '~', '#', '|', '*', '?',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Id,
    Timestamp,
    Date,
    Uuid,
    Filename,
    Category,
    OriginalPath,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(Placeholder::Id),
            "timestamp" => Some(Placeholder::Timestamp),
            "date" => Some(Placeholder::Date),
            "uuid" => Some(Placeholder::Uuid),
            "filename" => Some(Placeholder::Filename),
            "category" => Some(Placeholder::Category),
            "originalPath" => Some(Placeholder::OriginalPath),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// A parsed key template.
#[derive(Debug, Clone)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
    prefix: String,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> StorageResult<Self> {
        let invalid = |reason: &str| {
            StorageError::ConfigError(format!("Invalid key template '{}': {}", template, reason))
        };

        if template.trim().is_empty() {
            return Err(invalid("template is empty"));
        }
        if template.starts_with('/') {
            return Err(invalid("template must be relative"));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while let Some(c) = rest.chars().next() {
            match c {
                '{' => {
                    let end = rest.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
                    let name = &rest[1..end];
                    let placeholder = Placeholder::from_name(name)
                        .ok_or_else(|| invalid(&format!("unknown placeholder '{{{}}}'", name)))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(placeholder));
                    rest = &rest[end + 1..];
                }
                '}' => return Err(invalid("unmatched '}'")),
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/') => {
                    literal.push(c);
                    rest = &rest[c.len_utf8()..];
                }
                c => return Err(invalid(&format!("character '{}' is not allowed", c))),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for segment in &segments {
            if let Segment::Literal(text) = segment {
                if text.contains("..") || text.contains("//") {
                    return Err(invalid("literal text must not contain '..' or '//'"));
                }
            }
        }

        // Placeholders always render non-empty, so only a bare literal can form a `.` segment.
        let shape: String = segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Placeholder(_) => "x",
            })
            .collect();
        if shape.split('/').any(|s| s == ".") {
            return Err(invalid("template must not contain '.' segments"));
        }

        let leading = match segments.first() {
            Some(Segment::Literal(text)) => text.as_str(),
            _ => "",
        };
        let prefix = match leading.rfind('/') {
            Some(idx) => leading[..=idx].to_string(),
            None => String::new(),
        };

        Ok(KeyTemplate {
            source: template.to_string(),
            segments,
            prefix,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Literal directory prefix every rendered key starts with (may be empty).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn render(
        &self,
        category: FileCategory,
        id: &str,
        filename: Option<&str>,
        now: DateTime<Utc>,
    ) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Id) => out.push_str(&sanitize_component(id)),
                Segment::Placeholder(Placeholder::Timestamp) => {
                    out.push_str(&now.format("%Y%m%d_%H%M%S").to_string())
                }
                Segment::Placeholder(Placeholder::Date) => {
                    out.push_str(&now.format("%Y-%m-%d").to_string())
                }
                Segment::Placeholder(Placeholder::Uuid) => {
                    out.push_str(&Uuid::new_v4().to_string())
                }
                Segment::Placeholder(Placeholder::Filename) => {
                    out.push_str(&sanitize_filename(filename))
                }
                Segment::Placeholder(Placeholder::Category) => out.push_str(category.slug()),
                Segment::Placeholder(Placeholder::OriginalPath) => {
                    out.push_str(&sanitize_path(filename))
                }
            }
        }
        out.split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Generates keys from per-category templates and classifies existing keys.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    templates: BTreeMap<FileCategory, KeyTemplate>,
    // Longest prefix first so nested prefixes classify to the most specific category.
    prefixes: Vec<(String, FileCategory)>,
}

impl KeyGenerator {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let mut templates = BTreeMap::new();
        for category in FileCategory::ALL {
            templates.insert(category, KeyTemplate::parse(config.key_template(category))?);
        }

        let mut prefixes: Vec<(String, FileCategory)> = templates
            .iter()
            .filter(|(_, t)| !t.prefix().is_empty())
            .map(|(c, t)| (t.prefix().to_string(), *c))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.1.cmp(&b.1)));

        Ok(KeyGenerator {
            templates,
            prefixes,
        })
    }

    pub fn template(&self, category: FileCategory) -> &KeyTemplate {
        // Every category is inserted in `new`.
        &self.templates[&category]
    }

    /// Generate a key for `(category, id, filename)` using the current UTC time.
    pub fn generate_key(
        &self,
        category: FileCategory,
        id: &str,
        filename: Option<&str>,
    ) -> StorageResult<String> {
        self.generate_key_at(category, id, filename, Utc::now())
    }

    pub fn generate_key_at(
        &self,
        category: FileCategory,
        id: &str,
        filename: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<String> {
        let key = self.template(category).render(category, id, filename, now);
        validate_key(&key)?;
        Ok(key)
    }

    /// Probable category of an existing key, by template prefix.
    pub fn classify(&self, key: &str) -> FileCategory {
        self.prefixes
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, category)| *category)
            .unwrap_or(FileCategory::Unknown)
    }
}

/// Sanitize one path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, runs of two or more
/// separators (`.`, `_`, `-`) collapse to `_`, leading and trailing separators
/// are trimmed. Never returns an empty string, `.` or `..`.
pub fn sanitize_component(input: &str) -> String {
    let mapped: Vec<char> = input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut out = String::with_capacity(mapped.len());
    let mut i = 0;
    while i < mapped.len() {
        if is_separator(mapped[i]) {
            let start = i;
            while i < mapped.len() && is_separator(mapped[i]) {
                i += 1;
            }
            if i - start == 1 {
                out.push(mapped[start]);
            } else {
                out.push('_');
            }
        } else {
            out.push(mapped[i]);
            i += 1;
        }
    }

    let trimmed = out.trim_matches(is_separator);
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitize a filename for the `{filename}` placeholder.
///
/// Everything that is not ASCII alphanumeric becomes `_` (the extension dot
/// included), runs of `_` collapse and leading/trailing `_` are trimmed.
/// `None` or an empty result yields `file`.
pub fn sanitize_filename(filename: Option<&str>) -> String {
    let mut out = String::new();
    for c in filename.unwrap_or_default().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitize a relative path, component by component, for `{originalPath}`.
///
/// `.`, `..` and empty components are dropped rather than resolved.
pub fn sanitize_path(path: Option<&str>) -> String {
    let components: Vec<String> = path
        .unwrap_or_default()
        .split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .map(sanitize_component)
        .collect();

    if components.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        components.join("/")
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | '_' | '-')
}

/// Validate a caller-supplied key.
///
/// Keys must be relative and slash-delimited, must not contain empty, `.` or
/// `..` segments, and must not contain control characters or any of
/// [`RESERVED_CHARS`], which object stores would percent-encode. A valid key
/// is stored under exactly the same name on every backend.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let reject = |reason: &str| Err(StorageError::InvalidKey(format!("{}: {}", reason, key)));

    if key.is_empty() {
        return reject("Storage key is empty");
    }
    if key.len() > MAX_KEY_LEN {
        return reject("Storage key is too long");
    }
    if key.starts_with('/') {
        return reject("Storage key must be relative");
    }
    if key
        .chars()
        .any(|c| c.is_control() || RESERVED_CHARS.contains(&c))
    {
        return reject("Storage key contains invalid characters");
    }
    if key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return reject("Storage key contains an empty or relative path segment");
    }
    Ok(())
}

/// Directory part of a key (`""` for top-level keys).
pub fn directory_of(key: &str) -> &str {
    key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Final path segment of a key.
pub fn filename_of(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}
