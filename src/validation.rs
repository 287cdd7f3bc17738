//! Input validation, sanitization and upload screening.
//!
//! Checks here are pure: they report what is wrong and leave logging and
//! event publishing to [`crate::protection::ProtectiveControls`].

use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use crate::redact::{is_sensitive_key, REDACTED_MARKER};
use regex::Regex;
use serde_json::{Map, Value};
use std::path::Path;

/// Bytes of an upload inspected for embedded code.
pub const UPLOAD_SCAN_BYTES: usize = 1024;

const UPLOAD_SIGNATURES: [&str; 5] = ["<script", "<?php", "<%", "eval(", "exec("];

const SUSPICIOUS_PATTERNS: [(&str, &str); 6] = [
    ("script tag", r"(?i)<\s*script"),
    (
        "script protocol",
        r"(?i)(?:javascript|vbscript)\s*:|data\s*:\s*text/html",
    ),
    ("inline event handler", r"(?i)\bon[a-z]+\s*="),
    ("code evaluation", r"(?i)\b(?:eval|exec)\s*\("),
    ("path traversal", r"\.\.[/\\]"),
    (
        "shell injection",
        r"(?i)\$\(|`|;\s*(?:rm|curl|wget|sh|bash)\b|\|\s*(?:sh|bash)\b|&&\s*(?:rm|curl|wget)\b",
    ),
];

/// Caller-supplied structural check applied after the built-in checks.
pub trait InputSchema: Send + Sync {
    fn validate(&self, input: &Value) -> bool;
}

impl<F> InputSchema for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn validate(&self, input: &Value) -> bool {
        self(input)
    }
}

/// Why an input was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    StringTooLong { length: usize, max: usize },
    ArrayTooLong { length: usize, max: usize },
    SuspiciousPattern { pattern: &'static str },
    SchemaRejected,
}

impl ValidationIssue {
    /// Whether the input looks like an attack rather than a mistake.
    pub fn is_suspicious(&self) -> bool {
        matches!(self, ValidationIssue::SuspiciousPattern { .. })
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::StringTooLong { length, max } => {
                write!(f, "string of {length} characters exceeds {max}")
            }
            ValidationIssue::ArrayTooLong { length, max } => {
                write!(f, "array of {length} items exceeds {max}")
            }
            ValidationIssue::SuspiciousPattern { pattern } => {
                write!(f, "suspicious pattern: {pattern}")
            }
            ValidationIssue::SchemaRejected => write!(f, "rejected by schema"),
        }
    }
}

/// Why an upload was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    MissingExtension,
    ExtensionNotAllowed(String),
    TooLarge { size: usize, max: usize },
    EmbeddedCode { signature: &'static str },
}

impl std::fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadRejection::MissingExtension => write!(f, "file has no extension"),
            UploadRejection::ExtensionNotAllowed(ext) => {
                write!(f, "extension '.{ext}' is not allowed")
            }
            UploadRejection::TooLarge { size, max } => {
                write!(f, "file of {size} bytes exceeds limit of {max}")
            }
            UploadRejection::EmbeddedCode { signature } => {
                write!(f, "content contains '{signature}'")
            }
        }
    }
}

/// Validator and sanitizer for untrusted JSON input and uploads.
#[derive(Debug, Clone)]
pub struct InputValidator {
    config: ValidationConfig,
    suspicious: Vec<(&'static str, Regex)>,
    /// Removed from strings during sanitization.
    strip: Vec<Regex>,
}

impl InputValidator {
    pub fn new(config: ValidationConfig) -> Result<Self> {
        let suspicious = SUSPICIOUS_PATTERNS
            .iter()
            .map(|&(name, pattern)| -> Result<(&'static str, Regex)> {
                Ok((name, compile(pattern)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let strip = [
            r"(?i)(?:javascript|vbscript)\s*:",
            r"(?i)data\s*:\s*text/html",
            r"(?i)\bon[a-z]+\s*=",
        ]
        .iter()
        .map(|pattern| compile(pattern))
        .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            suspicious,
            strip,
        })
    }

    /// The first problem found in `input`, depth-first.
    pub fn inspect(&self, input: &Value) -> Option<ValidationIssue> {
        match input {
            Value::String(s) => self.inspect_str(s),
            Value::Array(items) => {
                if items.len() > self.config.max_array_length {
                    return Some(ValidationIssue::ArrayTooLong {
                        length: items.len(),
                        max: self.config.max_array_length,
                    });
                }
                items.iter().find_map(|item| self.inspect(item))
            }
            Value::Object(map) => map
                .iter()
                .find_map(|(key, value)| self.inspect_str(key).or_else(|| self.inspect(value))),
            _ => None,
        }
    }

    /// Run the built-in checks, then the schema if one is given.
    pub fn check(
        &self,
        input: &Value,
        schema: Option<&dyn InputSchema>,
    ) -> std::result::Result<(), ValidationIssue> {
        if let Some(issue) = self.inspect(input) {
            return Err(issue);
        }
        if schema.is_some_and(|schema| !schema.validate(input)) {
            return Err(ValidationIssue::SchemaRejected);
        }
        Ok(())
    }

    pub fn validate_input(&self, input: &Value, schema: Option<&dyn InputSchema>) -> bool {
        self.check(input, schema).is_ok()
    }

    /// Cleaned copy of `input`: markup and script vectors stripped, strings
    /// trimmed and truncated, arrays truncated, sensitive keys redacted.
    pub fn sanitize_input(&self, input: &Value) -> Value {
        match input {
            Value::String(s) => Value::String(self.sanitize_str(s)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .take(self.config.max_array_length)
                    .map(|item| self.sanitize_input(item))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if is_sensitive_key(key) {
                            Value::String(REDACTED_MARKER.to_string())
                        } else {
                            self.sanitize_input(value)
                        };
                        (self.sanitize_str(key), value)
                    })
                    .collect::<Map<String, Value>>(),
            ),
            other => other.clone(),
        }
    }

    /// Screen an upload by extension, size and leading content.
    pub fn check_file_upload(
        &self,
        filename: &str,
        content: &[u8],
    ) -> std::result::Result<(), UploadRejection> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or(UploadRejection::MissingExtension)?;

        if !self
            .config
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(UploadRejection::ExtensionNotAllowed(extension));
        }

        if content.len() >= self.config.max_file_size {
            return Err(UploadRejection::TooLarge {
                size: content.len(),
                max: self.config.max_file_size,
            });
        }

        let head = &content[..content.len().min(UPLOAD_SCAN_BYTES)];
        let head = String::from_utf8_lossy(head).to_lowercase();
        if let Some(signature) = UPLOAD_SIGNATURES.iter().copied().find(|sig| head.contains(sig)) {
            return Err(UploadRejection::EmbeddedCode { signature });
        }

        Ok(())
    }

    pub fn validate_file_upload(&self, filename: &str, content: &[u8]) -> bool {
        self.check_file_upload(filename, content).is_ok()
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    fn inspect_str(&self, s: &str) -> Option<ValidationIssue> {
        let length = s.chars().count();
        if length > self.config.max_string_length {
            return Some(ValidationIssue::StringTooLong {
                length,
                max: self.config.max_string_length,
            });
        }

        self.suspicious
            .iter()
            .find(|(_, regex)| regex.is_match(s))
            .map(|&(name, _)| ValidationIssue::SuspiciousPattern { pattern: name })
    }

    fn sanitize_str(&self, s: &str) -> String {
        let mut cleaned: String = s.chars().filter(|c| *c != '<' && *c != '>').collect();
        // Removing one match can join its neighbours into another, so strip
        // until a full pass changes nothing. Every pass shrinks the string.
        loop {
            let before = cleaned.len();
            for regex in &self.strip {
                cleaned = regex.replace_all(&cleaned, "").into_owned();
            }
            if cleaned.len() == before {
                break;
            }
        }
        cleaned
            .trim()
            .chars()
            .take(self.config.max_string_length)
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidConfiguration(format!("bad validation pattern: {e}")))
}
