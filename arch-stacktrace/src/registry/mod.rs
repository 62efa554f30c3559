// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Information registered during normal operation and printed with every report.

mod extra_log_info;
mod program_info;

pub use extra_log_info::ExtraLogLines;
pub(crate) use extra_log_info::ExtraLogInfo;
pub(crate) use program_info::ProgramInfo;
