// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants and configuration shared by the capture, reporting and signal handling code.

pub mod configuration;
pub mod constants;
