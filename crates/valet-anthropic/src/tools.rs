// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tool execution seam for the Anthropic backend.
//!
//! The gateway drives the model's tool-use loop but never executes
//! capabilities itself; a [`ToolRunner`] supplies the definitions and runs
//! each invocation.

use async_trait::async_trait;
use valet_core::ValetError;

use crate::types::ToolDefinition;

/// Executes model-requested tool invocations.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Tool definitions advertised to the model. Empty disables tool use.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one invocation and return its textual result.
    async fn run(&self, name: &str, input: &serde_json::Value) -> Result<String, ValetError>;
}

/// A runner that advertises no tools.
pub struct NoTools;

#[async_trait]
impl ToolRunner for NoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn run(&self, name: &str, _input: &serde_json::Value) -> Result<String, ValetError> {
        Err(ValetError::Provider {
            message: format!("no tool named {name} is available"),
            source: None,
        })
    }
}
