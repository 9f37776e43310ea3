/// Reference resolver
///
/// Node params may embed `${type:payload}` expressions. At dispatch time each
/// configured value is classified into a [`ParamValue`], references are looked
/// up against the execution's runtime context (trigger data plus completed
/// predecessors' outputs) or an external resource store, the nested value path
/// is walked, and the result is coerced to the declared parameter type.
///
/// Supported reference types:
/// - `${static:42}`: the payload itself
/// - `${trigger:items[0].name}`: a path into the trigger data
/// - `${node:fetch.body.id}`: `<node_id>.<path>` into a predecessor's output
/// - `${value:key}`, `${credential:id}`, `${database:id}`, `${file:id}`:
///   `<id>` or `<id>.<path>` served by a [`ResourceLookup`]

use crate::errors::ResolveError;
use crate::runtime::convert::TypeConverter;
use crate::workflow::types::{InputParamDef, ParamType};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The `type` part of a reference expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Static,
    Trigger,
    Node,
    Value,
    Credential,
    Database,
    File,
}

impl ReferenceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(ReferenceKind::Static),
            "trigger" => Some(ReferenceKind::Trigger),
            "node" => Some(ReferenceKind::Node),
            "value" => Some(ReferenceKind::Value),
            "credential" => Some(ReferenceKind::Credential),
            "database" => Some(ReferenceKind::Database),
            "file" => Some(ReferenceKind::File),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Static => "static",
            ReferenceKind::Trigger => "trigger",
            ReferenceKind::Node => "node",
            ReferenceKind::Value => "value",
            ReferenceKind::Credential => "credential",
            ReferenceKind::Database => "database",
            ReferenceKind::File => "file",
        }
    }

    /// Kinds whose payload names an entry in an external store
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            ReferenceKind::Value
                | ReferenceKind::Credential
                | ReferenceKind::Database
                | ReferenceKind::File
        )
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a reference expression
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescriptor {
    pub kind: ReferenceKind,
    /// Literal value (static), node id (node), or resource id (external kinds)
    pub id_or_value: Option<String>,
    /// Path walked over the looked-up value; empty means the whole value
    pub value_path: String,
    pub field: String,
    pub declared_type: ParamType,
}

/// A configured param value, tagged once when params are read
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(Value),
    Reference(ReferenceDescriptor),
}

impl ParamValue {
    pub fn parse(raw: &Value, field: &str, declared_type: ParamType) -> Result<Self, ResolveError> {
        match raw {
            Value::String(s) if ReferenceResolver::is_reference(raw) => Ok(ParamValue::Reference(
                ReferenceResolver::parse_reference(s, field, declared_type)?,
            )),
            other => Ok(ParamValue::Literal(other.clone())),
        }
    }
}

/// One step of a value path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathToken {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Key(key) => f.write_str(key),
            PathToken::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// Runtime data references resolve against
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub trigger: Value,
    /// Completed predecessors' `result_data`, keyed by node id
    pub nodes: HashMap<String, Value>,
}

impl ResolutionContext {
    pub fn new(trigger: Value) -> Self {
        Self {
            trigger,
            nodes: HashMap::new(),
        }
    }

    pub fn with_node_output(mut self, node_id: impl Into<String>, output: Value) -> Self {
        self.nodes.insert(node_id.into(), output);
        self
    }
}

/// External variable/credential/database/file stores
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    /// `Ok(None)` means the store has no entry under `id`
    async fn lookup(&self, kind: ReferenceKind, id: &str) -> Result<Option<Value>>;
}

/// Lookup used when no external stores are wired in
#[derive(Debug, Default)]
pub struct NoResources;

#[async_trait]
impl ResourceLookup for NoResources {
    async fn lookup(&self, kind: ReferenceKind, _id: &str) -> Result<Option<Value>> {
        Err(anyhow::anyhow!("no {} store configured", kind))
    }
}

/// In-memory resource store
#[derive(Debug, Default, Clone)]
pub struct StaticResources {
    entries: HashMap<(ReferenceKind, String), Value>,
}

impl StaticResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ReferenceKind, id: impl Into<String>, value: Value) -> Self {
        self.entries.insert((kind, id.into()), value);
        self
    }
}

#[async_trait]
impl ResourceLookup for StaticResources {
    async fn lookup(&self, kind: ReferenceKind, id: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(&(kind, id.to_string())).cloned())
    }
}

/// Resolves reference expressions and coerces the results
#[derive(Clone)]
pub struct ReferenceResolver {
    resources: Arc<dyn ResourceLookup>,
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceResolver").finish_non_exhaustive()
    }
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoResources))
    }
}

impl ReferenceResolver {
    pub fn new(resources: Arc<dyn ResourceLookup>) -> Self {
        Self { resources }
    }

    /// True iff `value` is a string of the form `${<type>:<payload>}`
    pub fn is_reference(value: &Value) -> bool {
        match value {
            Value::String(s) => s.len() >= 4
                && s.starts_with("${")
                && s.ends_with('}')
                && s[2..s.len() - 1].contains(':'),
            _ => false,
        }
    }

    pub fn parse_reference(
        raw: &str,
        field: &str,
        declared_type: ParamType,
    ) -> Result<ReferenceDescriptor, ResolveError> {
        let parse_err = |reason: &str| ResolveError::Parse {
            raw: raw.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        };

        let inner = raw
            .strip_prefix("${")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| parse_err("expected ${type:payload}"))?;
        let (type_name, payload) = inner
            .split_once(':')
            .ok_or_else(|| parse_err("missing ':' between type and payload"))?;
        let kind = ReferenceKind::parse(type_name)
            .ok_or_else(|| parse_err(&format!("unknown reference type '{}'", type_name)))?;

        let (id_or_value, value_path) = match kind {
            ReferenceKind::Static => (Some(payload.to_string()), String::new()),
            ReferenceKind::Trigger => (None, payload.to_string()),
            ReferenceKind::Node => {
                let (node_id, path) = payload
                    .split_once('.')
                    .ok_or_else(|| parse_err("node reference must be <node_id>.<path>"))?;
                if node_id.is_empty() {
                    return Err(parse_err("empty node id"));
                }
                (Some(node_id.to_string()), path.to_string())
            }
            _ => {
                let (id, path) = payload.split_once('.').unwrap_or((payload, ""));
                if id.is_empty() {
                    return Err(parse_err(&format!("empty {} id", kind)));
                }
                (Some(id.to_string()), path.to_string())
            }
        };

        Ok(ReferenceDescriptor {
            kind,
            id_or_value,
            value_path,
            field: field.to_string(),
            declared_type,
        })
    }

    /// Split a dotted path into key and index tokens
    ///
    /// `"items[0].name"` becomes `[Key("items"), Index(0), Key("name")]`.
    pub fn resolve_path(path: &str) -> Result<Vec<PathToken>, ResolveError> {
        let mut tokens = Vec::new();
        if path.is_empty() {
            return Ok(tokens);
        }

        let invalid = |reason: &str| ResolveError::Parse {
            raw: path.to_string(),
            field: String::new(),
            reason: reason.to_string(),
        };

        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }

            let (key, mut rest) = match segment.find('[') {
                Some(pos) => segment.split_at(pos),
                None => (segment, ""),
            };
            if !key.is_empty() {
                tokens.push(PathToken::Key(key.to_string()));
            }

            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .filter(|_| rest.starts_with('['))
                    .ok_or_else(|| invalid(&format!("malformed index in '{}'", segment)))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| invalid(&format!("non-numeric index in '{}'", segment)))?;
                tokens.push(PathToken::Index(index));
                rest = &rest[close + 1..];
            }
        }

        Ok(tokens)
    }

    /// Walk `tokens` over `context`, failing on the first absent segment
    pub fn get_value(tokens: &[PathToken], context: &Value) -> Result<Value, ResolveError> {
        let mut current = context;

        for (i, token) in tokens.iter().enumerate() {
            let next = match (token, current) {
                (PathToken::Key(key), Value::Object(map)) => map.get(key),
                (PathToken::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            };

            current = next.ok_or_else(|| ResolveError::Resolution {
                path: render_path(&tokens[..=i]),
                missing_segment: token.to_string(),
            })?;
        }

        Ok(current.clone())
    }

    pub fn get_static(descriptor: &ReferenceDescriptor) -> Value {
        Value::String(descriptor.id_or_value.clone().unwrap_or_default())
    }

    /// Resolve one configured value into a concrete, type-correct value
    pub async fn resolve(
        &self,
        raw: &Value,
        field: &str,
        declared_type: ParamType,
        context: &ResolutionContext,
    ) -> Result<Value, ResolveError> {
        let descriptor = match ParamValue::parse(raw, field, declared_type)? {
            ParamValue::Literal(value) => {
                return Ok(TypeConverter::convert(field, value, declared_type)?);
            }
            ParamValue::Reference(descriptor) => descriptor,
        };

        let tokens = Self::resolve_path(&descriptor.value_path).map_err(|e| match e {
            ResolveError::Parse { raw: _, reason, .. } => ResolveError::Parse {
                raw: raw_string(raw),
                field: field.to_string(),
                reason,
            },
            other => other,
        })?;

        let resolved = match descriptor.kind {
            ReferenceKind::Static => Self::get_static(&descriptor),
            ReferenceKind::Trigger => Self::get_value(&tokens, &context.trigger)?,
            ReferenceKind::Node => {
                let node_id = descriptor.id_or_value.as_deref().unwrap_or_default();
                let output = context.nodes.get(node_id).ok_or_else(|| ResolveError::Resolution {
                    path: format!("{}.{}", node_id, descriptor.value_path),
                    missing_segment: node_id.to_string(),
                })?;
                Self::get_value(&tokens, output).map_err(|e| prefix_path(e, node_id))?
            }
            kind => {
                let id = descriptor.id_or_value.as_deref().unwrap_or_default();
                let value = self
                    .resources
                    .lookup(kind, id)
                    .await
                    .map_err(|e| ResolveError::Lookup {
                        kind: kind.to_string(),
                        id: id.to_string(),
                        reason: e.to_string(),
                    })?
                    .ok_or_else(|| ResolveError::Resolution {
                        path: format!("{}:{}", kind, id),
                        missing_segment: id.to_string(),
                    })?;
                Self::get_value(&tokens, &value).map_err(|e| prefix_path(e, id))?
            }
        };

        tracing::debug!(
            "🔎 Resolved {} reference for field '{}'",
            descriptor.kind,
            field
        );

        Ok(TypeConverter::convert(field, resolved, declared_type)?)
    }

    /// Resolve every parameter of a node
    ///
    /// Declared params are resolved with their declared type, falling back to
    /// the declared default; a required param with neither fails. Configured
    /// values without a declaration are resolved as `any`.
    pub async fn resolve_params(
        &self,
        declared: &[InputParamDef],
        configured: &Map<String, Value>,
        context: &ResolutionContext,
    ) -> Result<Map<String, Value>, ResolveError> {
        let mut resolved = Map::new();

        for def in declared {
            let raw = match configured.get(&def.name).or(def.default.as_ref()) {
                Some(raw) => raw,
                None if def.required => {
                    return Err(ResolveError::MissingParameter {
                        field: def.name.clone(),
                    })
                }
                None => continue,
            };
            let value = self.resolve(raw, &def.name, def.param_type, context).await?;
            resolved.insert(def.name.clone(), value);
        }

        for (name, raw) in configured {
            if declared.iter().any(|d| &d.name == name) {
                continue;
            }
            let value = self.resolve(raw, name, ParamType::Any, context).await?;
            resolved.insert(name.clone(), value);
        }

        Ok(resolved)
    }
}

fn render_path(tokens: &[PathToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        if let PathToken::Key(_) = token {
            if !out.is_empty() {
                out.push('.');
            }
        }
        out.push_str(&token.to_string());
    }
    out
}

fn prefix_path(err: ResolveError, prefix: &str) -> ResolveError {
    match err {
        ResolveError::Resolution {
            path,
            missing_segment,
        } => ResolveError::Resolution {
            path: format!("{}.{}", prefix, path),
            missing_segment,
        },
        other => other,
    }
}

fn raw_string(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> ReferenceResolver {
        ReferenceResolver::default()
    }

    #[test]
    fn detects_references() {
        assert!(ReferenceResolver::is_reference(&json!("${static:42}")));
        assert!(ReferenceResolver::is_reference(&json!("${trigger:}")));
        assert!(!ReferenceResolver::is_reference(&json!("${static}")));
        assert!(!ReferenceResolver::is_reference(&json!("static:42")));
        assert!(!ReferenceResolver::is_reference(&json!("${static:42")));
        assert!(!ReferenceResolver::is_reference(&json!(42)));
    }

    #[test]
    fn parses_each_kind() {
        let node = ReferenceResolver::parse_reference("${node:A.y.z}", "f", ParamType::Any).unwrap();
        assert_eq!(node.kind, ReferenceKind::Node);
        assert_eq!(node.id_or_value.as_deref(), Some("A"));
        assert_eq!(node.value_path, "y.z");

        let trigger =
            ReferenceResolver::parse_reference("${trigger:items[0]}", "f", ParamType::Any).unwrap();
        assert_eq!(trigger.id_or_value, None);
        assert_eq!(trigger.value_path, "items[0]");

        let static_ref =
            ReferenceResolver::parse_reference("${static:a.b:c}", "f", ParamType::String).unwrap();
        assert_eq!(static_ref.id_or_value.as_deref(), Some("a.b:c"));

        let cred =
            ReferenceResolver::parse_reference("${credential:pg.password}", "f", ParamType::Any)
                .unwrap();
        assert_eq!(cred.id_or_value.as_deref(), Some("pg"));
        assert_eq!(cred.value_path, "password");
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(matches!(
            ReferenceResolver::parse_reference("${node:A}", "f", ParamType::Any),
            Err(ResolveError::Parse { .. })
        ));
        assert!(matches!(
            ReferenceResolver::parse_reference("${bogus:x}", "f", ParamType::Any),
            Err(ResolveError::Parse { .. })
        ));
        assert!(matches!(
            ReferenceResolver::parse_reference("${node:.y}", "f", ParamType::Any),
            Err(ResolveError::Parse { .. })
        ));
    }

    #[test]
    fn tokenizes_paths() {
        assert_eq!(
            ReferenceResolver::resolve_path("items[0].name").unwrap(),
            vec![
                PathToken::Key("items".into()),
                PathToken::Index(0),
                PathToken::Key("name".into())
            ]
        );
        assert_eq!(
            ReferenceResolver::resolve_path("grid[1][2]").unwrap(),
            vec![
                PathToken::Key("grid".into()),
                PathToken::Index(1),
                PathToken::Index(2)
            ]
        );
        assert!(ReferenceResolver::resolve_path("").unwrap().is_empty());
        assert!(ReferenceResolver::resolve_path("a..b").is_err());
        assert!(ReferenceResolver::resolve_path("a[x]").is_err());
        assert!(ReferenceResolver::resolve_path("a[1]b").is_err());
    }

    #[test]
    fn walks_values_without_defaulting() {
        let ctx = json!({"items": [{"name": "a"}, {"name": "b"}]});
        let tokens = ReferenceResolver::resolve_path("items[1].name").unwrap();
        assert_eq!(ReferenceResolver::get_value(&tokens, &ctx).unwrap(), json!("b"));

        let tokens = ReferenceResolver::resolve_path("items[5].name").unwrap();
        let err = ReferenceResolver::get_value(&tokens, &ctx).unwrap_err();
        assert_eq!(
            err,
            ResolveError::Resolution {
                path: "items[5]".to_string(),
                missing_segment: "[5]".to_string()
            }
        );
    }

    #[tokio::test]
    async fn resolves_static_and_trigger_references() {
        let r = resolver();
        let empty = ResolutionContext::default();
        assert_eq!(
            r.resolve(&json!("${static:42}"), "f", ParamType::Integer, &empty)
                .await
                .unwrap(),
            json!(42)
        );

        let ctx = ResolutionContext::new(json!({"items": [{"name": "a"}, {"name": "b"}]}));
        assert_eq!(
            r.resolve(&json!("${trigger:items[1].name}"), "f", ParamType::String, &ctx)
                .await
                .unwrap(),
            json!("b")
        );

        let missing = r
            .resolve(&json!("${trigger:items[0].missing}"), "f", ParamType::String, &ctx)
            .await;
        assert!(matches!(missing, Err(ResolveError::Resolution { .. })));
    }

    #[tokio::test]
    async fn resolves_node_outputs() {
        let r = resolver();
        let ctx = ResolutionContext::new(json!({})).with_node_output("A", json!({"y": "HELLO_1"}));

        assert_eq!(
            r.resolve(&json!("${node:A.y}"), "text", ParamType::String, &ctx)
                .await
                .unwrap(),
            json!("HELLO_1")
        );

        let unknown = r
            .resolve(&json!("${node:B.y}"), "text", ParamType::String, &ctx)
            .await
            .unwrap_err();
        assert_eq!(
            unknown,
            ResolveError::Resolution {
                path: "B.y".to_string(),
                missing_segment: "B".to_string()
            }
        );
    }

    #[tokio::test]
    async fn literals_are_converted_directly() {
        let r = resolver();
        let ctx = ResolutionContext::default();
        assert_eq!(
            r.resolve(&json!("true"), "flag", ParamType::Boolean, &ctx)
                .await
                .unwrap(),
            json!(true)
        );
        let err = r
            .resolve(&json!("abc"), "count", ParamType::Integer, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Conversion(_)));
    }

    #[tokio::test]
    async fn external_references_use_the_resource_store() {
        let resources = StaticResources::new()
            .with(ReferenceKind::Credential, "pg", json!({"user": "app", "password": "s3cret"}))
            .with(ReferenceKind::Value, "retries", json!("3"));
        let r = ReferenceResolver::new(Arc::new(resources));
        let ctx = ResolutionContext::default();

        assert_eq!(
            r.resolve(&json!("${credential:pg.password}"), "pw", ParamType::String, &ctx)
                .await
                .unwrap(),
            json!("s3cret")
        );
        assert_eq!(
            r.resolve(&json!("${value:retries}"), "n", ParamType::Integer, &ctx)
                .await
                .unwrap(),
            json!(3)
        );
        assert!(matches!(
            r.resolve(&json!("${file:nope}"), "f", ParamType::Any, &ctx).await,
            Err(ResolveError::Resolution { .. })
        ));

        let bare = resolver();
        assert!(matches!(
            bare.resolve(&json!("${value:retries}"), "n", ParamType::Any, &ctx).await,
            Err(ResolveError::Lookup { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_params_applies_defaults_and_requirements() {
        let r = resolver();
        let ctx = ResolutionContext::new(json!({"x": "HELLO"}));
        let declared = vec![
            InputParamDef {
                name: "text".into(),
                param_type: ParamType::String,
                required: true,
                default: None,
            },
            InputParamDef {
                name: "count".into(),
                param_type: ParamType::Integer,
                required: false,
                default: Some(json!("2")),
            },
            InputParamDef {
                name: "optional".into(),
                param_type: ParamType::String,
                required: false,
                default: None,
            },
        ];
        let mut configured = Map::new();
        configured.insert("text".into(), json!("${trigger:x}"));
        configured.insert("extra".into(), json!({"k": 1}));

        let params = r.resolve_params(&declared, &configured, &ctx).await.unwrap();
        assert_eq!(params["text"], json!("HELLO"));
        assert_eq!(params["count"], json!(2));
        assert_eq!(params["extra"], json!({"k": 1}));
        assert!(!params.contains_key("optional"));

        configured.remove("text");
        let err = r.resolve_params(&declared, &configured, &ctx).await.unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingParameter {
                field: "text".into()
            }
        );
    }
}
