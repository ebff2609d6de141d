//==================================================
// File: stdlib_registry.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Track MibScript library sources prepended to user programs
// Objective: Compose library source, the sentinel directive and user source
//            into the single program text the front end consumes
//==================================================

use crate::tokenizer::SENTINEL_DIRECTIVE;

/// Bundled `std` library.
pub const STD_SOURCE: &str = include_str!("../stdlib/std.mi");

//==================================================
// Section 1.0 - Registry Types
//==================================================

#[derive(Debug, Clone, Default)]
pub struct StdlibRegistry {
    sources: Vec<(String, String)>,
}

impl StdlibRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("std", STD_SOURCE);
        registry
    }

    /// Add or replace a library source; order of first registration is kept.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        let source = source.into();
        match self.sources.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = source,
            None => self.sources.push((name, source)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    //Function: compose
    //Purpose: Build `library + "\n#stdlib_end\n" + user` program text
    //Inputs: user: user source text
    //Returns: String (user source unchanged when no library is registered)
    pub fn compose(&self, user: &str) -> String {
        if self.sources.is_empty() {
            return user.to_string();
        }
        let library = self
            .sources
            .iter()
            .map(|(_, source)| source.trim_end())
            .collect::<Vec<_>>()
            .join("\n");
        format!("{library}\n#{SENTINEL_DIRECTIVE}\n{user}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_places_sentinel_between_library_and_user() {
        let mut registry = StdlibRegistry::new();
        registry.register("lib", "module lib {}\n");
        let program = registry.compose("module app {}");
        assert_eq!(program, "module lib {}\n#stdlib_end\nmodule app {}");
    }

    #[test]
    fn empty_registry_leaves_source_untouched() {
        assert_eq!(StdlibRegistry::new().compose("module app {}"), "module app {}");
    }

    #[test]
    fn defaults_bundle_std() {
        let registry = StdlibRegistry::with_defaults();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["std"]);
        assert!(STD_SOURCE.contains("module std"));
    }
}

//==================================================
// End of file
//==================================================
