/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Dispatch errors.
//!
//! Not finding capacity is a normal outcome (`Ok(None)` from
//! [`Workers::launch`](super::Workers::launch)) and never shows up here.
//! Both variants below mean the scheduler's view of the world is wrong.

use thiserror::Error;

use super::task::TaskKind;
use crate::heap::HeapError;
use crate::node::Ram;

/// Why the launch primitive refused to start a task.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LaunchError {
    #[error("node '{0}' does not exist")]
    UnknownNode(String),

    #[error("node '{0}' is not rooted")]
    NotRooted(String),

    #[error("program '{program}' is not present on '{node}'")]
    MissingProgram { node: String, program: String },

    #[error("node '{node}' needs {required} but only has {available} free")]
    InsufficientRam {
        node: String,
        required: Ram,
        available: Ram,
    },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Heap(#[from] HeapError),

    /// Capacity was reserved but the task would not start.
    #[error("reserved capacity for {kind} × {threads} on '{node}' but launch failed")]
    LaunchFailed {
        kind: TaskKind,
        node: String,
        threads: u32,
        #[source]
        source: LaunchError,
    },
}
