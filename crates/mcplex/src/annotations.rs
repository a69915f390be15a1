//! Doc-block annotation parser.
//!
//! Extracts MCP metadata from structured documentation attached to a
//! handler unit. The grammar is line-based: `@mcp_tool <name>`,
//! `@mcp_resource <uri>`, `@mcp_prompt <name>`, `@mcp_mime_type <type>`,
//! `@mcp_param <name> <Type> [k: v, ...]`, `@mcp_arg <name> [k: v, ...]`.
//! The first paragraph of the block (up to the first blank line) is the
//! description. Option values parse to JSON values: booleans, null,
//! integers, floats, double-quoted strings, and bracketed comma-lists.
//! Unknown option keys are preserved verbatim.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::schema::{ParameterSpec, PromptArgument};

/// Error raised while parsing a doc-block annotation.
///
/// Parse failures are non-fatal at discovery time: the unit is skipped
/// with a warning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// An annotation is missing its mandatory argument.
    #[error("annotation `{annotation}` is missing its {what}")]
    MissingArgument {
        /// The annotation keyword.
        annotation: String,
        /// What was expected after the keyword.
        what: String,
    },

    /// An option list was opened but never closed.
    #[error("unterminated option list: `{0}`")]
    UnterminatedOptions(String),

    /// An option entry is not a `key: value` pair.
    #[error("malformed option entry: `{0}`")]
    MalformedOption(String),

    /// An option value does not match any supported form.
    #[error("unsupported option value: `{0}`")]
    UnsupportedValue(String),
}

/// Metadata extracted from one handler unit's doc block.
#[derive(Debug, Clone, Default)]
pub struct ComponentMetadata {
    /// Tool name, when the unit declares `@mcp_tool`.
    pub tool_name: Option<String>,
    /// Resource URI, when the unit declares `@mcp_resource`.
    pub resource_uri: Option<String>,
    /// Prompt name, when the unit declares `@mcp_prompt`.
    pub prompt_name: Option<String>,
    /// First paragraph of the doc block.
    pub description: String,
    /// Declared tool parameters, in declaration order.
    pub parameters: Vec<ParameterSpec>,
    /// Declared prompt arguments, in declaration order.
    pub arguments: Vec<PromptArgument>,
    /// MIME type for resources.
    pub mime_type: Option<String>,
}

impl ComponentMetadata {
    /// Whether the unit is a tool.
    pub fn is_tool(&self) -> bool {
        self.tool_name.is_some()
    }

    /// Whether the unit is a resource.
    pub fn is_resource(&self) -> bool {
        self.resource_uri.is_some()
    }

    /// Whether the unit is a prompt.
    pub fn is_prompt(&self) -> bool {
        self.prompt_name.is_some()
    }

    /// Whether the doc block declared no capability at all.
    pub fn is_empty(&self) -> bool {
        !self.is_tool() && !self.is_resource() && !self.is_prompt()
    }
}

/// Parse a doc block into component metadata.
///
/// An empty or annotation-free block yields empty metadata; discovery
/// skips such units.
pub fn parse_component_doc(doc: &str) -> Result<ComponentMetadata, AnnotationError> {
    let mut metadata = ComponentMetadata::default();
    let mut description_lines = Vec::new();
    let mut in_description = true;

    for raw_line in doc.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            in_description = false;
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            in_description = false;
            parse_annotation_line(rest, &mut metadata)?;
            continue;
        }
        if in_description {
            description_lines.push(line);
        }
    }

    metadata.description = description_lines.join(" ");
    Ok(metadata)
}

/// Parse one annotation line (with the leading `@` already stripped).
fn parse_annotation_line(
    line: &str,
    metadata: &mut ComponentMetadata,
) -> Result<(), AnnotationError> {
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    };

    match keyword {
        "mcp_tool" => {
            metadata.tool_name = Some(required_argument(keyword, rest, "name")?);
        }
        "mcp_resource" => {
            metadata.resource_uri = Some(required_argument(keyword, rest, "uri")?);
        }
        "mcp_prompt" => {
            metadata.prompt_name = Some(required_argument(keyword, rest, "name")?);
        }
        "mcp_mime_type" => {
            metadata.mime_type = Some(required_argument(keyword, rest, "type")?);
        }
        "mcp_param" => {
            metadata.parameters.push(parse_param(rest)?);
        }
        "mcp_arg" => {
            metadata.arguments.push(parse_arg(rest)?);
        }
        // Not an MCP annotation; leave it to whatever else reads the doc.
        _ => {}
    }
    Ok(())
}

fn required_argument(
    annotation: &str,
    rest: &str,
    what: &str,
) -> Result<String, AnnotationError> {
    let value = rest.split_whitespace().next().unwrap_or("");
    if value.is_empty() {
        return Err(AnnotationError::MissingArgument {
            annotation: annotation.to_string(),
            what: what.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Parse `<name> <Type> [k: v, ...]` into a parameter spec.
fn parse_param(rest: &str) -> Result<ParameterSpec, AnnotationError> {
    let (head, options) = split_options(rest)?;
    let mut words = head.split_whitespace();
    let name = words.next().ok_or_else(|| AnnotationError::MissingArgument {
        annotation: "mcp_param".to_string(),
        what: "name".to_string(),
    })?;
    let param_type = words.next().ok_or_else(|| AnnotationError::MissingArgument {
        annotation: "mcp_param".to_string(),
        what: "type".to_string(),
    })?;

    let mut spec = ParameterSpec::new(name, param_type);
    for (key, value) in parse_options(options)? {
        match key.as_str() {
            "description" => {
                spec.description = value.as_str().map(|s| s.to_string());
            }
            "required" => {
                spec.required = value.as_bool().unwrap_or(false);
            }
            "enum" => {
                spec.choices = value.as_array().cloned();
            }
            "default" => {
                spec.default = Some(value);
            }
            _ => {
                spec.extra.insert(key, value);
            }
        }
    }
    Ok(spec)
}

/// Parse `<name> [k: v, ...]` into a prompt argument.
fn parse_arg(rest: &str) -> Result<PromptArgument, AnnotationError> {
    let (head, options) = split_options(rest)?;
    let name = head
        .split_whitespace()
        .next()
        .ok_or_else(|| AnnotationError::MissingArgument {
            annotation: "mcp_arg".to_string(),
            what: "name".to_string(),
        })?;

    let mut argument = PromptArgument::new(name);
    for (key, value) in parse_options(options)? {
        match key.as_str() {
            "description" => {
                argument.description = value.as_str().map(|s| s.to_string());
            }
            "required" => {
                argument.required = value.as_bool().unwrap_or(false);
            }
            _ => {
                argument.extra.insert(key, value);
            }
        }
    }
    Ok(argument)
}

/// Split an annotation tail into the part before the option list and the
/// bracketed option list body, if present.
fn split_options(rest: &str) -> Result<(&str, Option<&str>), AnnotationError> {
    match rest.find('[') {
        Some(open) => {
            let head = rest[..open].trim();
            let tail = &rest[open..];
            if !tail.ends_with(']') {
                return Err(AnnotationError::UnterminatedOptions(rest.to_string()));
            }
            Ok((head, Some(&tail[1..tail.len() - 1])))
        }
        None => Ok((rest.trim(), None)),
    }
}

/// Parse a bracketed option body into ordered `key: value` pairs.
fn parse_options(body: Option<&str>) -> Result<Vec<(String, Value)>, AnnotationError> {
    let Some(body) = body else {
        return Ok(Vec::new());
    };
    let mut options = Vec::new();
    for entry in split_top_level(body) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once(':')
            .ok_or_else(|| AnnotationError::MalformedOption(entry.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(AnnotationError::MalformedOption(entry.to_string()));
        }
        options.push((key.to_string(), parse_value(value.trim())?));
    }
    Ok(options)
}

/// Split on commas that are not inside quotes or nested brackets.
fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for ch in body.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Parse a single option value.
fn parse_value(text: &str) -> Result<Value, AnnotationError> {
    match text {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if text.starts_with('"') {
        return serde_json::from_str::<String>(text)
            .map(Value::String)
            .map_err(|_| AnnotationError::UnsupportedValue(text.to_string()));
    }

    if text.starts_with('[') {
        if !text.ends_with(']') {
            return Err(AnnotationError::UnterminatedOptions(text.to_string()));
        }
        let inner = &text[1..text.len() - 1];
        let mut items = Vec::new();
        for item in split_top_level(inner) {
            let item = item.trim();
            if !item.is_empty() {
                items.push(parse_value(item)?);
            }
        }
        return Ok(Value::Array(items));
    }

    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::Number(n.into()));
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(number) = Number::from_f64(f) {
            return Ok(Value::Number(number));
        }
    }

    Err(AnnotationError::UnsupportedValue(text.to_string()))
}

/// Render metadata as a flat JSON record, the shape discovery reports.
pub fn metadata_record(metadata: &ComponentMetadata) -> Value {
    let mut record = Map::new();
    if let Some(name) = &metadata.tool_name {
        record.insert("name".to_string(), Value::String(name.clone()));
    }
    if let Some(uri) = &metadata.resource_uri {
        record.insert("uri".to_string(), Value::String(uri.clone()));
    }
    if let Some(name) = &metadata.prompt_name {
        record.insert("prompt".to_string(), Value::String(name.clone()));
    }
    record.insert(
        "description".to_string(),
        Value::String(metadata.description.clone()),
    );
    if let Some(mime_type) = &metadata.mime_type {
        record.insert("mime_type".to_string(), Value::String(mime_type.clone()));
    }
    Value::Object(record)
}
