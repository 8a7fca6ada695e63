//! Stage postconditions, checked by the orchestrator after a worker reports
//! SUCCESS and before the node advances.
//!
//! A postcondition violation is terminal: the classifier never retries it,
//! the node goes to FAILED, and a marker is written to task memory. The
//! artifact checks are textual, not a full SystemVerilog parse; they catch
//! the interface drift an agent is most likely to produce (missing or
//! renamed ports, empty files, stub output).

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::contracts::{
    InterfaceSpec, ResultMessage, SignalDirection, SignalSpec,
};

use super::states::Stage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PostconditionViolation {
    #[error("{stage} artifact missing: {path}")]
    MissingArtifact { stage: Stage, path: PathBuf },

    #[error("{stage} artifact is empty: {path}")]
    EmptyArtifact { stage: Stage, path: PathBuf },

    #[error("interface mismatch in {path}: {detail}")]
    InterfaceMismatch { path: PathBuf, detail: String },

    #[error("testbench incomplete: {detail}")]
    TestbenchIncomplete { detail: String },

    #[error("{stage} completed without captured log output")]
    MissingLog { stage: Stage },

    #[error("distilled dataset missing or empty: {path}")]
    MissingDataset { path: PathBuf },

    #[error("reflection insights body is empty")]
    EmptyInsights,
}

impl PostconditionViolation {
    /// Canonical reason recorded in task memory markers and the summary.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingArtifact { .. } => "postcondition/missing_artifact",
            Self::EmptyArtifact { .. } => "postcondition/empty_artifact",
            Self::InterfaceMismatch { .. } => "postcondition/interface_mismatch",
            Self::TestbenchIncomplete { .. } => "postcondition/testbench_incomplete",
            Self::MissingLog { .. } => "postcondition/missing_log",
            Self::MissingDataset { .. } => "postcondition/missing_dataset",
            Self::EmptyInsights => "postcondition/empty_insights",
        }
    }
}

/// Inputs the checks need beyond the result envelope itself.
#[derive(Debug, Clone, Copy)]
pub struct PostconditionInputs<'a> {
    pub node_id: &'a str,
    pub interface: &'a InterfaceSpec,
    pub rtl_path: &'a Path,
    pub testbench_path: &'a Path,
}

/// Check the postconditions of a successfully-reported stage.
pub fn check_stage(
    stage: Stage,
    result: &ResultMessage,
    inputs: PostconditionInputs<'_>,
) -> Result<(), PostconditionViolation> {
    match stage {
        Stage::Implementation => check_implementation(inputs),
        Stage::Testbench => check_testbench(inputs),
        Stage::Lint | Stage::Simulation => check_tool_log(stage, result),
        Stage::Distill => check_distill(result),
        Stage::Reflect => check_reflect(result),
        // Debug success has no artifact of its own; it re-opens simulation.
        Stage::Debug => Ok(()),
    }
}

fn read_artifact(stage: Stage, path: &Path) -> Result<String, PostconditionViolation> {
    let content = fs::read_to_string(path).map_err(|_| PostconditionViolation::MissingArtifact {
        stage,
        path: path.to_path_buf(),
    })?;
    if content.trim().is_empty() {
        return Err(PostconditionViolation::EmptyArtifact {
            stage,
            path: path.to_path_buf(),
        });
    }
    Ok(content)
}

fn direction_keyword(direction: SignalDirection) -> &'static str {
    match direction {
        SignalDirection::Input => "input",
        SignalDirection::Output => "output",
        SignalDirection::Inout => "inout",
    }
}

/// A port declaration line mentioning the direction keyword and the signal
/// name as a standalone token, with a range bracket when width > 1.
fn declares_port(content: &str, signal: &SignalSpec) -> bool {
    let keyword = direction_keyword(signal.direction);
    content.lines().any(|line| {
        let line = line.trim();
        if !line.contains(keyword) || !contains_token(line, &signal.name) {
            return false;
        }
        signal.width <= 1 || line.contains('[')
    })
}

/// Token match that rejects substrings of longer identifiers.
fn contains_token(line: &str, token: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut start = 0;
    while let Some(pos) = line[start..].find(token) {
        let abs = start + pos;
        let before_ok = abs == 0 || !line[..abs].chars().next_back().map_or(false, is_ident);
        let after = abs + token.len();
        let after_ok = after >= line.len() || !line[after..].chars().next().map_or(false, is_ident);
        if before_ok && after_ok {
            return true;
        }
        start = abs + token.len().max(1);
    }
    false
}

fn check_implementation(inputs: PostconditionInputs<'_>) -> Result<(), PostconditionViolation> {
    let content = read_artifact(Stage::Implementation, inputs.rtl_path)?;

    if !content
        .lines()
        .any(|line| line.trim_start().starts_with("module") && contains_token(line, inputs.node_id))
    {
        return Err(PostconditionViolation::InterfaceMismatch {
            path: inputs.rtl_path.to_path_buf(),
            detail: format!("no module declaration named {}", inputs.node_id),
        });
    }

    let missing: Vec<&str> = inputs
        .interface
        .signals
        .iter()
        .filter(|signal| !declares_port(&content, signal))
        .map(|signal| signal.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(PostconditionViolation::InterfaceMismatch {
            path: inputs.rtl_path.to_path_buf(),
            detail: format!("ports missing or mis-declared: {}", missing.join(", ")),
        });
    }

    Ok(())
}

fn check_testbench(inputs: PostconditionInputs<'_>) -> Result<(), PostconditionViolation> {
    let content = read_artifact(Stage::Testbench, inputs.testbench_path)?;

    if !contains_token(&content, inputs.node_id) {
        return Err(PostconditionViolation::TestbenchIncomplete {
            detail: format!("does not reference module under test {}", inputs.node_id),
        });
    }

    let undriven: Vec<&str> = inputs
        .interface
        .signals
        .iter()
        .filter(|signal| signal.direction == SignalDirection::Input)
        .filter(|signal| !contains_token(&content, &signal.name))
        .map(|signal| signal.name.as_str())
        .collect();
    if !undriven.is_empty() {
        return Err(PostconditionViolation::TestbenchIncomplete {
            detail: format!("input ports never driven: {}", undriven.join(", ")),
        });
    }

    Ok(())
}

fn check_tool_log(stage: Stage, result: &ResultMessage) -> Result<(), PostconditionViolation> {
    if result.log_output.trim().is_empty() {
        return Err(PostconditionViolation::MissingLog { stage });
    }
    Ok(())
}

fn check_distill(result: &ResultMessage) -> Result<(), PostconditionViolation> {
    let dataset = result
        .distilled_dataset
        .as_ref()
        .ok_or(PostconditionViolation::MissingDataset {
            path: PathBuf::new(),
        })?;
    let path = PathBuf::from(&dataset.data_path);
    match fs::metadata(&path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(PostconditionViolation::MissingDataset { path }),
    }
}

fn check_reflect(result: &ResultMessage) -> Result<(), PostconditionViolation> {
    match &result.reflection_insights {
        Some(insights)
            if !insights.analysis_notes.trim().is_empty() || !insights.hypotheses.is_empty() =>
        {
            Ok(())
        }
        _ => Err(PostconditionViolation::EmptyInsights),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ClockingSpec, InterfaceSpec, NodeContext, StageContext, TaskMessage, TaskPriority};
    use std::collections::BTreeMap;
    use std::io::Write;
    use uuid::Uuid;

    fn interface() -> InterfaceSpec {
        InterfaceSpec {
            signals: vec![
                SignalSpec {
                    name: "clk".to_string(),
                    direction: SignalDirection::Input,
                    width: 1,
                },
                SignalSpec {
                    name: "rst_n".to_string(),
                    direction: SignalDirection::Input,
                    width: 1,
                },
                SignalSpec {
                    name: "count".to_string(),
                    direction: SignalDirection::Output,
                    width: 4,
                },
            ],
        }
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn dummy_result() -> ResultMessage {
        let ctx = StageContext::Lint {
            node: NodeContext {
                node_id: "counter4".to_string(),
                interface: InterfaceSpec::default(),
                clocking: ClockingSpec::default(),
                rtl_path: PathBuf::from("x.sv"),
                testbench_path: PathBuf::from("x_tb.sv"),
                design_context_hash: "h".to_string(),
                library_refs: serde_json::Value::Null,
                coverage_goals: None,
                prior_artifacts: BTreeMap::new(),
                settings: None,
            },
            artifact: PathBuf::from("x.sv"),
            tool_flags: vec![],
        };
        let task = TaskMessage::new(Uuid::new_v4(), TaskPriority::default(), ctx);
        ResultMessage::success(&task, "tool output")
    }

    const GOOD_RTL: &str = "\
module counter4 (
    input  logic clk,
    input  logic rst_n,
    output logic [3:0] count
);
  always_ff @(posedge clk or negedge rst_n)
    if (!rst_n) count <= '0;
    else count <= count + 1'b1;
endmodule
";

    #[test]
    fn test_implementation_postcondition_passes() {
        let dir = tempfile::tempdir().unwrap();
        let rtl = write_file(&dir, "counter4.sv", GOOD_RTL);
        let iface = interface();
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: &rtl,
            testbench_path: &rtl,
        };
        assert!(check_stage(Stage::Implementation, &dummy_result(), inputs).is_ok());
    }

    #[test]
    fn test_implementation_missing_output_port_is_interface_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let rtl = write_file(
            &dir,
            "counter4.sv",
            "module counter4 (input logic clk, input logic rst_n);\nendmodule\n",
        );
        let iface = interface();
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: &rtl,
            testbench_path: &rtl,
        };
        let violation = check_stage(Stage::Implementation, &dummy_result(), inputs).unwrap_err();
        assert_eq!(violation.reason(), "postcondition/interface_mismatch");
        assert!(violation.to_string().contains("count"));
    }

    #[test]
    fn test_implementation_width_must_be_ranged() {
        let dir = tempfile::tempdir().unwrap();
        // count declared scalar although the interface says width 4.
        let rtl = write_file(
            &dir,
            "counter4.sv",
            "module counter4 (input logic clk, input logic rst_n, output logic count);\nendmodule\n",
        );
        let iface = interface();
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: &rtl,
            testbench_path: &rtl,
        };
        assert!(check_stage(Stage::Implementation, &dummy_result(), inputs).is_err());
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let iface = interface();
        let missing = dir.path().join("nope.sv");
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: &missing,
            testbench_path: &missing,
        };
        let violation = check_stage(Stage::Implementation, &dummy_result(), inputs).unwrap_err();
        assert_eq!(violation.reason(), "postcondition/missing_artifact");
    }

    #[test]
    fn test_testbench_must_drive_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let tb = write_file(
            &dir,
            "counter4_tb.sv",
            "module counter4_tb;\n  counter4 dut(.clk(clk), .rst_n(rst_n), .count(count));\nendmodule\n",
        );
        let rtl = write_file(&dir, "counter4.sv", GOOD_RTL);
        let iface = interface();
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: &rtl,
            testbench_path: &tb,
        };
        // clk and rst_n are referenced, so the check passes.
        assert!(check_stage(Stage::Testbench, &dummy_result(), inputs).is_ok());

        let tb_bad = write_file(&dir, "bad_tb.sv", "module other_tb;\nendmodule\n");
        let inputs_bad = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: &rtl,
            testbench_path: &tb_bad,
        };
        let violation = check_stage(Stage::Testbench, &dummy_result(), inputs_bad).unwrap_err();
        assert_eq!(violation.reason(), "postcondition/testbench_incomplete");
    }

    #[test]
    fn test_distill_requires_dataset_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_path = write_file(&dir, "distilled.json", "{\"log_excerpt\": \"x\"}");
        let iface = interface();
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: Path::new("x"),
            testbench_path: Path::new("x"),
        };

        let mut result = dummy_result();
        assert_eq!(
            check_stage(Stage::Distill, &result, inputs)
                .unwrap_err()
                .reason(),
            "postcondition/missing_dataset"
        );

        result.distilled_dataset = Some(crate::contracts::DistilledDataset {
            original_data_size: 100,
            distilled_data_size: 20,
            compression_ratio: 5.0,
            failure_focus_areas: vec!["sim_log".to_string()],
            data_path: dataset_path.to_string_lossy().into_owned(),
        });
        assert!(check_stage(Stage::Distill, &result, inputs).is_ok());
    }

    #[test]
    fn test_reflect_requires_insights_body() {
        let iface = interface();
        let inputs = PostconditionInputs {
            node_id: "counter4",
            interface: &iface,
            rtl_path: Path::new("x"),
            testbench_path: Path::new("x"),
        };
        let mut result = dummy_result();
        assert_eq!(
            check_stage(Stage::Reflect, &result, inputs)
                .unwrap_err()
                .reason(),
            "postcondition/empty_insights"
        );

        result.reflection_insights = Some(crate::contracts::ReflectionInsights {
            hypotheses: vec!["reset polarity inverted".to_string()],
            likely_failure_points: vec![],
            recommended_probes: vec![],
            confidence_score: 0.7,
            analysis_notes: String::new(),
        });
        assert!(check_stage(Stage::Reflect, &result, inputs).is_ok());
    }
}
