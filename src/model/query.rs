//! Read queries on a single file: identity fetches and JSON-path projection.

use serde_json::Value;
use serde_json_path::JsonPath;

use crate::errors::DogmaError;
use crate::model::path::normalize_path;

/// Type of a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// Retrieve the content as it is.
    Identity,
    /// Apply a series of JSON-path expressions to the content, left to right.
    JsonPath(Vec<String>),
}

/// A query on a file. Queries never mutate; they address a path and
/// optionally project its JSON content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    path: String,
    r#type: QueryType,
}

impl Query {
    /// A query that retrieves the content at `path` as it is.
    pub fn identity(path: &str) -> Result<Query, DogmaError> {
        if path.is_empty() {
            return Err(DogmaError::InvalidArgument("empty query path".to_string()));
        }
        Ok(Query {
            path: normalize_path(path),
            r#type: QueryType::Identity,
        })
    }

    /// A query that applies JSON-path expressions to the content at `path`.
    ///
    /// The path must denote a JSON file. Expressions are compiled eagerly so
    /// a malformed expression surfaces as *query-syntax* before any I/O.
    pub fn of_json_path(path: &str, exprs: Vec<String>) -> Result<Query, DogmaError> {
        if path.is_empty() {
            return Err(DogmaError::InvalidArgument("empty query path".to_string()));
        }
        let lower = path.to_ascii_lowercase();
        if !(lower.ends_with(".json") || lower.ends_with(".json5")) {
            return Err(DogmaError::InvalidArgument(format!(
                "JSON-path queries require a JSON file: `{path}`"
            )));
        }
        for expr in &exprs {
            JsonPath::parse(expr)
                .map_err(|e| DogmaError::QuerySyntax(format!("`{expr}`: {e}")))?;
        }
        Ok(Query {
            path: normalize_path(path),
            r#type: QueryType::JsonPath(exprs),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_type(&self) -> &QueryType {
        &self.r#type
    }

    /// Stable text form of the query used in cache fingerprints.
    pub fn fingerprint(&self) -> String {
        match &self.r#type {
            QueryType::Identity => self.path.clone(),
            QueryType::JsonPath(exprs) => format!("{}|{}", self.path, exprs.join("|")),
        }
    }

    /// Apply this query to a JSON tree.
    ///
    /// Each expression runs against the result of the previous one. An
    /// expression selecting exactly one node yields that node; several nodes
    /// yield an array; zero nodes fail with *query-execution*.
    pub fn apply_json(&self, content: &Value) -> Result<Value, DogmaError> {
        let QueryType::JsonPath(exprs) = &self.r#type else {
            return Ok(content.clone());
        };
        let mut current = content.clone();
        for expr in exprs {
            let compiled = JsonPath::parse(expr)
                .map_err(|e| DogmaError::QuerySyntax(format!("`{expr}`: {e}")))?;
            let nodes = compiled.query(&current).all();
            current = match nodes.len() {
                0 => {
                    return Err(DogmaError::QueryExecution(format!(
                        "`{expr}` matched nothing at `{}`",
                        self.path
                    )));
                }
                1 => nodes[0].clone(),
                _ => Value::Array(nodes.into_iter().cloned().collect()),
            };
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Identity queries return the content unchanged.
    #[test]
    fn test_identity() {
        let q = Query::identity("a.json").unwrap();
        assert_eq!(q.path(), "/a.json");
        let content = json!({"x": 1});
        assert_eq!(q.apply_json(&content).unwrap(), content);
    }

    /// A single-node JSON-path projection yields the node itself.
    #[test]
    fn test_json_path_single_node() {
        let q = Query::of_json_path("/a.json", vec!["$.a.b".to_string()]).unwrap();
        let content = json!({"a": {"b": 42}});
        assert_eq!(q.apply_json(&content).unwrap(), json!(42));
    }

    /// Expressions chain left to right.
    #[test]
    fn test_json_path_chained() {
        let q = Query::of_json_path(
            "/a.json",
            vec!["$.items".to_string(), "$[0]".to_string()],
        )
        .unwrap();
        let content = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(q.apply_json(&content).unwrap(), json!({"id": 1}));
    }

    /// Several matches collapse into an array.
    #[test]
    fn test_json_path_multiple_nodes() {
        let q = Query::of_json_path("/a.json", vec!["$.items[*].id".to_string()]).unwrap();
        let content = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(q.apply_json(&content).unwrap(), json!([1, 2]));
    }

    /// No match is a query-execution error, not an empty result.
    #[test]
    fn test_json_path_no_match() {
        let q = Query::of_json_path("/a.json", vec!["$.missing".to_string()]).unwrap();
        let err = q.apply_json(&json!({"x": 1})).unwrap_err();
        assert_eq!(err.kind(), "query-execution");
    }

    /// Malformed expressions fail at construction with query-syntax.
    #[test]
    fn test_bad_expression() {
        let err = Query::of_json_path("/a.json", vec!["$[".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "query-syntax");
    }

    /// JSON-path queries require a JSON file path.
    #[test]
    fn test_json_path_requires_json_file() {
        assert!(Query::of_json_path("/a.txt", vec!["$.a".to_string()]).is_err());
    }
}
