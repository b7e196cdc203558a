/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Heap invariant violations.
//!
//! Running out of capacity is *not* an error; allocation calls return
//! `None` for that.  Everything here means the books are corrupt and the
//! control loop must stop.

use thiserror::Error;

use crate::node::Ram;

#[derive(Debug, Error, PartialEq)]
pub enum HeapError {
    /// A node's free capacity maps past the last slab.
    #[error("node '{node}' has {free} free, which is past the largest slab")]
    SlabOutOfRange { node: String, free: Ram },

    /// An operation named a node the heap has never admitted.
    #[error("node '{0}' is not tracked by the heap")]
    UnknownNode(String),
}
