// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Display implementations

use crate::control::{TargetCfg, TargetCfgDb};
use std::fmt::{Display, Formatter};

macro_rules! TARGET_FMT {
    () => {
        "{:>40} │ {:>8} │ {}"
    };
}

impl Display for TargetCfg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            TARGET_FMT!(),
            self.target,
            self.level,
            self.tags.join(",")
        )
    }
}

impl Display for TargetCfgDb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, TARGET_FMT!(), "TARGET", "LEVEL", "TAGS")?;
        for t in self.targets.values() {
            writeln!(f, "{t}")?;
        }
        write!(f, TARGET_FMT!(), "(default)", self.level, "--")
    }
}
