// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::shared::constants::MIN_BANNER_WIDTH;
use std::io;

const HALT_MESSAGE: &[u8] = b" terminated";
const DASHES: &[u8; 64] = b"----------------------------------------------------------------";

/// The dashed lines framing a crash report on stderr:
///
/// ```text
/// ---------------------------- myprog terminated ----------------------------
/// ...
/// ---------------------------------------------------------------------------
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Banner {
    width: usize,
    leading: usize,
    trailing: usize,
}

impl Banner {
    pub(crate) fn new(program: &[u8]) -> Self {
        let label = program.len() + HALT_MESSAGE.len();
        // Leave room for at least "-- " on either side.
        let width = MIN_BANNER_WIDTH.max(label + 6);
        let leading = (width - label) / 2 - 1;
        let trailing = width - leading - label - 2;
        Self {
            width,
            leading,
            trailing,
        }
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    pub(crate) fn write_header(&self, w: &mut impl io::Write, program: &[u8]) -> io::Result<()> {
        w.write_all(b"\n")?;
        write_dashes(w, self.leading)?;
        w.write_all(b" ")?;
        w.write_all(program)?;
        w.write_all(HALT_MESSAGE)?;
        w.write_all(b" ")?;
        write_dashes(w, self.trailing)?;
        w.write_all(b"\n")
    }

    pub(crate) fn write_footer(&self, w: &mut impl io::Write) -> io::Result<()> {
        write_dashes(w, self.width)?;
        w.write_all(b"\n")
    }
}

fn write_dashes(w: &mut impl io::Write, mut n: usize) -> io::Result<()> {
    while n > 0 {
        let chunk = n.min(DASHES.len());
        w.write_all(&DASHES[..chunk])?;
        n -= chunk;
    }
    Ok(())
}
