// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Support for tests that need a whole process to crash: the modes understood by
//! `crashing_test_app` and helpers to check what it left behind.

pub mod test_types;
pub mod validation;
