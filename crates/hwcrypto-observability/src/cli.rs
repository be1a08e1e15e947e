// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-crate debug switches from `--debug-<name>` arguments and the
//! `HWCRYPTO_DEBUG` variable
//!
//! A name may be the full crate name (`hwcrypto-dispatch`) or its short form
//! without the `hwcrypto-` prefix (`dispatch`).

use std::collections::BTreeSet;
use std::env;

use crate::{crate_target, KNOWN_CRATES};

const ALL: &str = "all";
const FLAG_PREFIX: &str = "--debug-";

/// Crates raised to debug level
///
/// # Example
/// ```rust
/// use hwcrypto_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-dispatch".to_string()]);
/// assert!(flags.is_enabled("hwcrypto-dispatch"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrateDebugFlags {
    crates: BTreeSet<String>,
}

impl CrateDebugFlags {
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = Self::default();
        for arg in args {
            if let Some(name) = arg.strip_prefix(FLAG_PREFIX) {
                flags.enable(name);
            }
        }
        flags
    }

    /// Parse a comma separated list such as `dispatch,hal` or `all`
    pub fn from_list(list: &str) -> Self {
        let mut flags = Self::default();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            flags.enable(name);
        }
        flags
    }

    /// Enable one crate by full or short name; `all` enables every known crate
    pub fn enable(&mut self, name: &str) {
        if name == ALL {
            self.crates.extend(KNOWN_CRATES.iter().map(|c| c.to_string()));
        } else {
            self.crates.insert(canonical_name(name));
        }
    }

    pub fn merge(&mut self, other: CrateDebugFlags) {
        self.crates.extend(other.crates);
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.crates.contains(&canonical_name(name))
    }

    pub fn is_empty(&self) -> bool {
        self.crates.is_empty()
    }

    /// `EnvFilter` directives: one `target=debug` per enabled crate followed
    /// by `default_level` for everything else
    pub fn to_filter_string_with_default(&self, default_level: &str) -> String {
        self.crates
            .iter()
            .map(|name| format!("{}=debug", crate_target(name)))
            .chain(std::iter::once(default_level.to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn canonical_name(name: &str) -> String {
    if name.starts_with("hwcrypto") {
        name.to_string()
    } else {
        format!("hwcrypto-{}", name)
    }
}

/// Debug flags from the process arguments merged with `HWCRYPTO_DEBUG`
pub fn parse_debug_flags() -> CrateDebugFlags {
    let mut flags = CrateDebugFlags::from_args(env::args());
    if let Ok(list) = env::var("HWCRYPTO_DEBUG") {
        flags.merge(CrateDebugFlags::from_list(&list));
    }
    flags
}

pub fn debug_flags_help() -> String {
    format!(
        "Debug flags:\n  --debug-all            every crate\n  --debug-<name>         one crate, e.g. --debug-dispatch\n  HWCRYPTO_DEBUG=a,b     same, comma separated\n\nCrates: {}\n",
        KNOWN_CRATES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_full_names_are_equivalent() {
        let short = CrateDebugFlags::from_args(vec!["--debug-hal".to_string()]);
        let full = CrateDebugFlags::from_args(vec!["--debug-hwcrypto-hal".to_string()]);
        assert_eq!(short, full);
        assert!(short.is_enabled("hal"));
        assert!(!short.is_enabled("hwcrypto-dispatch"));
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-all".to_string()]);
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
    }

    #[test]
    fn test_unrelated_arguments_ignored() {
        let flags = CrateDebugFlags::from_args(vec![
            "hwcrypto-bench".to_string(),
            "--config".to_string(),
            "x.toml".to_string(),
        ]);
        assert!(flags.is_empty());
    }

    #[test]
    fn test_filter_string() {
        let flags = CrateDebugFlags::from_list("dispatch, hwcrypto-config,");
        assert_eq!(
            flags.to_filter_string_with_default("warn"),
            "hwcrypto_config=debug,hwcrypto_dispatch=debug,warn"
        );
        assert_eq!(CrateDebugFlags::default().to_filter_string_with_default("info"), "info");
    }

    #[test]
    fn test_merge() {
        let mut flags = CrateDebugFlags::from_list("hal");
        flags.merge(CrateDebugFlags::from_list("dispatch"));
        assert!(flags.is_enabled("hal") && flags.is_enabled("dispatch"));
    }

    #[test]
    fn test_help_lists_crates() {
        assert!(debug_flags_help().contains("hwcrypto-dispatch"));
    }
}
