//! Static node list
//!
//! One node per line, whitespace separated: `name host port`.
//! Blank lines and lines starting with `#` are ignored.

use crate::common::Result;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A configured candidate storage node, before it is placed on the ring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }
}

/// Parse the node list.
pub fn parse_node_config(text: &str) -> Result<Vec<NodeSpec>> {
    let mut specs = Vec::new();
    let mut names = HashSet::new();

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [name, host, port] = tokens.as_slice() else {
            return Err(Error::Configuration(format!(
                "line {}: expected `name host port`, got {:?}",
                lineno, line
            )));
        };

        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                Error::Configuration(format!("line {}: invalid port {:?}", lineno, port))
            })?;

        if !names.insert(name.to_string()) {
            return Err(Error::Configuration(format!(
                "line {}: duplicate node name {:?}",
                lineno, name
            )));
        }

        specs.push(NodeSpec::new(*name, *host, port));
    }

    Ok(specs)
}

/// Read and parse the node list from disk.
pub fn load_node_config(path: impl AsRef<Path>) -> Result<Vec<NodeSpec>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let specs = parse_node_config(&text)?;
    tracing::info!(
        "Loaded {} node(s) from {}",
        specs.len(),
        path.as_ref().display()
    );
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_basic() {
        let specs = parse_node_config(
            "server1 127.0.0.1 50000\n\n# spare\nserver2   127.0.0.1\t50001\n",
        )
        .unwrap();
        assert_eq!(
            specs,
            vec![
                NodeSpec::new("server1", "127.0.0.1", 50000),
                NodeSpec::new("server2", "127.0.0.1", 50001),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_node_config("server1 127.0.0.1"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            parse_node_config("server1 127.0.0.1 http"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            parse_node_config("server1 127.0.0.1 0"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            parse_node_config("a h 1\na h 2"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let res = load_node_config(dir.path().join("ecs.config"));
        assert!(matches!(res, Err(Error::Io(_))));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "A 127.0.0.1 5000").unwrap();
        writeln!(file, "B 127.0.0.1 5001").unwrap();
        let specs = load_node_config(file.path()).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].name, "B");
    }
}
