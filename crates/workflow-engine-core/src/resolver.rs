//! Reference resolver: substitutes `<blockNameOrId.field[.sub]>` and `{{ENV_VAR}}` tokens in
//! raw sub-block input strings. Tokens are lexed into an AST once, then resolved by walking
//! the fragment list — never by regex-driven substitution at runtime (see spec §9).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ResolverError;
use crate::graph::WorkflowGraph;
use crate::value::BlockOutput;

/// One piece of a parsed input string.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Literal(String),
    BlockRef(Vec<String>),
    EnvRef(String),
}

/// Parse a raw string into literal/block-ref/env-ref fragments. Disjoint token shapes
/// (`<...>` vs `{{...}}`) may coexist in the same string; each is lexed independently,
/// left to right, and never re-expanded once substituted.
pub fn parse(input: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            if let Some(end) = find_close(&chars, i + 2, '}', '}') {
                flush_literal(&mut fragments, &mut literal);
                let name: String = chars[i + 2..end].iter().collect();
                fragments.push(Fragment::EnvRef(name.trim().to_string()));
                i = end + 2;
                continue;
            }
        }
        if chars[i] == '<' {
            if let Some(end) = find_single_close(&chars, i + 1, '>') {
                let raw: String = chars[i + 1..end].iter().collect();
                if !raw.is_empty() && raw.chars().all(is_path_char) {
                    flush_literal(&mut fragments, &mut literal);
                    let path: Vec<String> = raw.split('.').map(str::to_string).collect();
                    fragments.push(Fragment::BlockRef(path));
                    i = end + 1;
                    continue;
                }
            }
        }
        literal.push(chars[i]);
        i += 1;
    }
    flush_literal(&mut fragments, &mut literal);
    fragments
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || c == '.' || c == '_' || c == '-'
}

fn flush_literal(fragments: &mut Vec<Fragment>, literal: &mut String) {
    if !literal.is_empty() {
        fragments.push(Fragment::Literal(std::mem::take(literal)));
    }
}

fn find_close(chars: &[char], from: usize, a: char, b: char) -> Option<usize> {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == a && chars[i + 1] == b {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_single_close(chars: &[char], from: usize, c: char) -> Option<usize> {
    (from..chars.len()).find(|&i| chars[i] == c)
}

/// The result of resolving one raw string: either a single non-string value preserved
/// as-is (when the whole input was exactly one token), or a fully-stringified value.
pub enum Resolved {
    Value(Value),
    Text(String),
}

impl Resolved {
    pub fn into_value(self) -> Value {
        match self {
            Resolved::Value(v) => v,
            Resolved::Text(s) => Value::String(s),
        }
    }
}

/// Resolve one raw input string against the current block states and decrypted
/// environment variables.
pub fn resolve(
    raw: &str,
    graph: &WorkflowGraph,
    block_states: &HashMap<String, BlockOutput>,
    environment_variables: &HashMap<String, String>,
) -> Result<Resolved, ResolverError> {
    let fragments = parse(raw);
    if let [Fragment::BlockRef(path)] = fragments.as_slice() {
        return Ok(Resolved::Value(resolve_block_ref(
            path,
            graph,
            block_states,
        )?));
    }
    if let [Fragment::EnvRef(name)] = fragments.as_slice() {
        let value = environment_variables
            .get(name)
            .ok_or_else(|| ResolverError::MissingEnvironmentVariable(name.clone()))?;
        return Ok(Resolved::Text(value.clone()));
    }

    let mut out = String::new();
    for fragment in &fragments {
        match fragment {
            Fragment::Literal(s) => out.push_str(s),
            Fragment::BlockRef(path) => {
                let value = resolve_block_ref(path, graph, block_states)?;
                out.push_str(&stringify(&value));
            }
            Fragment::EnvRef(name) => {
                let value = environment_variables
                    .get(name)
                    .ok_or_else(|| ResolverError::MissingEnvironmentVariable(name.clone()))?;
                out.push_str(value);
            }
        }
    }
    Ok(Resolved::Text(out))
}

fn resolve_block_ref(
    path: &[String],
    graph: &WorkflowGraph,
    block_states: &HashMap<String, BlockOutput>,
) -> Result<Value, ResolverError> {
    let (head, rest) = path
        .split_first()
        .ok_or_else(|| ResolverError::UnresolvedReference(String::new()))?;
    let block = graph
        .find_block_by_name_or_id(head)
        .ok_or_else(|| ResolverError::UnresolvedReference(head.clone()))?;
    let output = block_states
        .get(&block.id)
        .ok_or_else(|| ResolverError::UnresolvedReference(head.clone()))?;
    let rest_refs: Vec<&str> = rest.iter().map(String::as_str).collect();
    output
        .get_path(&rest_refs)
        .ok_or_else(|| ResolverError::MissingField(head.clone(), rest.join(".")))
}

/// Resolve every string leaf of a (possibly nested) sub-block field value. Non-string
/// scalars pass through untouched; arrays/objects recurse.
pub fn resolve_value(
    value: &Value,
    graph: &WorkflowGraph,
    block_states: &HashMap<String, BlockOutput>,
    environment_variables: &HashMap<String, String>,
) -> Result<Value, ResolverError> {
    match value {
        Value::String(s) => Ok(resolve(s, graph, block_states, environment_variables)?.into_value()),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, graph, block_states, environment_variables)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(
                    k.clone(),
                    resolve_value(v, graph, block_states, environment_variables)?,
                );
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decrypt every ciphertext in the owner's environment map once, at execution start.
/// Aborts on the first failure — performed before any block runs.
pub fn decrypt_environment(
    ciphertexts: &HashMap<String, String>,
    decryptor: &dyn crate::persistence::SecretDecryptor,
) -> Result<HashMap<String, String>, ResolverError> {
    let mut plaintext = HashMap::with_capacity(ciphertexts.len());
    for (name, ciphertext) in ciphertexts {
        let value = decryptor
            .decrypt(ciphertext)
            .map_err(|cause| ResolverError::DecryptionFailed {
                name: name.clone(),
                cause,
            })?;
        plaintext.insert(name.clone(), value);
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{SerializedBlock, SerializedWorkflowState, WorkflowMetadata};
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn starter_only_graph() -> WorkflowGraph {
        let block = SerializedBlock {
            id: "start".into(),
            block_type: "starter".into(),
            name: "Start".into(),
            position: None,
            enabled: true,
            sub_blocks: Map::new(),
            outputs: Value::Null,
        };
        let state = SerializedWorkflowState {
            blocks: Map::from([("start".to_string(), block)]),
            edges: vec![],
            loops: Map::new(),
            parallels: Map::new(),
            variables: Map::new(),
            metadata: WorkflowMetadata::default(),
        };
        WorkflowGraph::load("wf", &state).unwrap()
    }

    #[test]
    fn parse_splits_literal_blockref_envref() {
        let fragments = parse("hello <start.name> from {{API_KEY}}!");
        assert_eq!(
            fragments,
            vec![
                Fragment::Literal("hello ".into()),
                Fragment::BlockRef(vec!["start".into(), "name".into()]),
                Fragment::Literal(" from ".into()),
                Fragment::EnvRef("API_KEY".into()),
                Fragment::Literal("!".into()),
            ]
        );
    }

    #[test]
    fn resolve_whole_string_block_ref_preserves_type() {
        let graph = starter_only_graph();
        let mut states = Map::new();
        states.insert(
            "start".to_string(),
            BlockOutput::Starter {
                payload: json!({ "count": 3 }),
            },
        );
        let resolved = resolve("<start.count>", &graph, &states, &Map::new()).unwrap();
        assert_eq!(resolved.into_value(), json!(3));
    }

    #[test]
    fn resolve_embedded_block_ref_stringifies() {
        let graph = starter_only_graph();
        let mut states = Map::new();
        states.insert(
            "start".to_string(),
            BlockOutput::Starter {
                payload: json!({ "count": 3 }),
            },
        );
        let resolved = resolve("count=<start.count>", &graph, &states, &Map::new()).unwrap();
        assert_eq!(resolved.into_value(), json!("count=3"));
    }

    #[test]
    fn resolve_missing_env_var_fails() {
        let graph = starter_only_graph();
        let err = resolve("{{API_KEY}}", &graph, &Map::new(), &Map::new()).unwrap_err();
        assert!(matches!(err, ResolverError::MissingEnvironmentVariable(name) if name == "API_KEY"));
    }

    #[test]
    fn resolve_unexecuted_block_fails() {
        let graph = starter_only_graph();
        let err = resolve("<start.count>", &graph, &Map::new(), &Map::new()).unwrap_err();
        assert!(matches!(err, ResolverError::UnresolvedReference(_)));
    }

    #[test]
    fn resolve_env_var_present() {
        let graph = starter_only_graph();
        let mut env = Map::new();
        env.insert("API_KEY".to_string(), "secret-value".to_string());
        let resolved = resolve("{{API_KEY}}", &graph, &Map::new(), &env).unwrap();
        assert_eq!(resolved.into_value(), json!("secret-value"));
    }
}
