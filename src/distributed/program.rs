//! Program decoding.
//!
//! A program is a straight-line sequence of op steps over a slot table:
//! request inputs occupy the leading slots, each step appends its outputs,
//! and the trailing slots are the program's outputs. The decoder is a
//! pluggable seam; [`JsonProgramDecoder`] is the built-in encoding.

use crate::error::{Error, ErrorKind};
use crate::op::OpAttrs;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Decode failures, before any context state is touched.
#[derive(Debug, ThisError)]
pub enum ProgramDecodeError {
    /// The bytes are not a well-formed encoding.
    #[error("program bytes are not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    /// A step is structurally invalid.
    #[error("program step {step}: {reason}")]
    Step {
        /// Zero-based step index.
        step: usize,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<ProgramDecodeError> for Error {
    fn from(err: ProgramDecodeError) -> Self {
        Error::new(ErrorKind::InvalidProgram, err.to_string())
    }
}

/// One op step: name, attributes, input slot indices, output count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramStep {
    /// Op name, resolved through the executing handler chain.
    #[serde(rename = "op")]
    pub op_name: String,
    /// Invocation attributes.
    #[serde(default)]
    pub attrs: OpAttrs,
    /// Slot indices of the step's inputs; a slot is either a request
    /// input or an earlier step's output.
    #[serde(rename = "inputs", default)]
    pub input_slots: Vec<usize>,
    /// Number of outputs the step appends to the slot table.
    #[serde(rename = "outputs")]
    pub output_count: usize,
}

/// A decoded program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    /// Steps in execution order.
    pub steps: Vec<ProgramStep>,
}

impl Program {
    /// Total number of output slots the program appends.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.steps.iter().map(|s| s.output_count).sum()
    }
}

/// Turns registered program bytes into an executable [`Program`].
pub trait ProgramDecoder: Send + Sync {
    /// Decodes `bytes`, validating structure but not op availability.
    fn decode(&self, bytes: &[u8]) -> Result<Program, ProgramDecodeError>;
}

/// The built-in encoding: a JSON array of steps, e.g.
/// `[{"op":"add","inputs":[0,1],"outputs":1}]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProgramDecoder;

impl ProgramDecoder for JsonProgramDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Program, ProgramDecodeError> {
        let program: Program = serde_json::from_slice(bytes)?;
        for (step, decoded) in program.steps.iter().enumerate() {
            if decoded.op_name.is_empty() {
                return Err(ProgramDecodeError::Step {
                    step,
                    reason: "empty op name".to_string(),
                });
            }
        }
        Ok(program)
    }
}
