// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{io, time::Duration};
use thiserror::Error;

use crate::{device::Irq, resource::PathSet};

pub type Result<T> = std::result::Result<T, Error>;

/// Classified task failure.
///
/// Only [`Error::Busy`] and [`Error::Timeout`] describe transient conditions;
/// see [`Error::is_retryable`].
#[derive(Debug, Error)]
pub enum Error {
    /// The request can never be satisfied as described. Detected before any
    /// hardware resource is claimed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every resource path acceptable to the caller is occupied.
    #[error("no free resource path for preference {preference:?}")]
    Busy { preference: PathSet },

    /// A channel, buffer or display programming call failed.
    #[error("{op} failed: {source}")]
    Hardware {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Physically contiguous memory could not be allocated.
    #[error("failed to allocate {size} bytes: {source}")]
    Alloc {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// The completion interrupt was not observed in time.
    #[error("timed out after {timeout:?} waiting for {irq:?}")]
    Timeout { irq: Irq, timeout: Duration },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    /// True when the same request may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy { .. } | Error::Timeout { .. })
    }
}

/// Attaches the failing operation name to a collaborator result.
pub(crate) trait HardwareContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> HardwareContext<T> for io::Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| Error::Hardware { op, source })
    }
}
