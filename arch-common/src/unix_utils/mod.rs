// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

mod execve;
mod fork;
mod process;

pub use execve::exec_nonlocking;
pub use fork::{alt_fork, Forked};
pub use process::{detach_from_terminal, exit_immediately, terminate};
