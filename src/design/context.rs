//! Design context: the planner's frozen description of every node.
//!
//! Loaded once per run and treated as immutable. Paths inside it are write
//! targets for workers, relative to the artifacts root.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::contracts::{ClockingSpec, InterfaceSpec};

use super::errors::DesignInputError;

/// Per-node design description emitted by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignNode {
    pub rtl_file: PathBuf,
    #[serde(default)]
    pub testbench_file: Option<PathBuf>,
    pub interface: InterfaceSpec,
    #[serde(default)]
    pub clocking: ClockingSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_goals: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses_library: Option<serde_json::Value>,
}

impl DesignNode {
    /// Absolute RTL write target for this node.
    pub fn rtl_path(&self, artifacts_root: &Path) -> PathBuf {
        artifacts_root.join(&self.rtl_file)
    }

    /// Absolute testbench write target; defaults to an `_tb` sibling of the
    /// RTL file when the planner did not name one.
    pub fn testbench_path(&self, artifacts_root: &Path, node_id: &str) -> PathBuf {
        match &self.testbench_file {
            Some(tb) => artifacts_root.join(tb),
            None => {
                let mut path = self.rtl_path(artifacts_root);
                path.set_file_name(format!("{node_id}_tb.sv"));
                path
            }
        }
    }
}

/// The planner's full design context, keyed by node id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignContext {
    pub design_context_hash: String,
    #[serde(default)]
    pub standard_library: serde_json::Value,
    pub nodes: BTreeMap<String, DesignNode>,
}

impl DesignContext {
    pub fn load(path: &Path) -> Result<Self, DesignInputError> {
        let raw = fs::read_to_string(path).map_err(|e| DesignInputError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|e| DesignInputError::parse(path, e))
    }

    pub fn node(&self, id: &str) -> Result<&DesignNode, DesignInputError> {
        self.nodes
            .get(id)
            .ok_or_else(|| DesignInputError::MissingDesignNode { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "design_context_hash": "3f6c2a9b1d4e8f07",
        "standard_library": {},
        "nodes": {
            "counter4": {
                "rtl_file": "rtl/counter4.sv",
                "testbench_file": "rtl/counter4_tb.sv",
                "interface": {
                    "signals": [
                        {"name": "clk", "direction": "input", "width": 1},
                        {"name": "rst_n", "direction": "input", "width": 1},
                        {"name": "count", "direction": "output", "width": 4}
                    ]
                },
                "clocking": {
                    "clk": {"freq_hz": 100000000.0, "reset": "rst_n", "reset_active_low": true}
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_design_context() {
        let ctx: DesignContext = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(ctx.design_context_hash, "3f6c2a9b1d4e8f07");
        let node = ctx.node("counter4").unwrap();
        assert_eq!(node.interface.signals.len(), 3);
        assert!(node.clocking.clk.reset_active_low);
        assert!(ctx.node("missing").is_err());
    }

    #[test]
    fn test_testbench_path_default() {
        let mut ctx: DesignContext = serde_json::from_str(SAMPLE).unwrap();
        let node = ctx.nodes.get_mut("counter4").unwrap();
        node.testbench_file = None;
        let tb = node.testbench_path(Path::new("/artifacts"), "counter4");
        assert_eq!(tb, PathBuf::from("/artifacts/rtl/counter4_tb.sv"));
    }
}
