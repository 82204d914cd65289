//! External encoder discovery.
//!
//! A missing tool never crashes the service; the optimizer candidate that
//! needed it is silently skipped. Probe results are cached for the life of
//! the process.

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// The full set of CLI encoders the optimizers may call.
pub const KNOWN_TOOLS: &[&str] = &[
    "pngquant", "jpegtran", "cjpeg", "gifsicle", "cwebp", "cjxl", "djxl",
];

fn cache() -> &'static BTreeMap<&'static str, bool> {
    static CACHE: OnceLock<BTreeMap<&'static str, bool>> = OnceLock::new();
    CACHE.get_or_init(|| {
        KNOWN_TOOLS
            .iter()
            .map(|&tool| (tool, which::which(tool).is_ok()))
            .collect()
    })
}

/// True when `tool` was found on PATH at first probe.
pub fn have(tool: &str) -> bool {
    match cache().get(tool) {
        Some(&present) => present,
        None => which::which(tool).is_ok(),
    }
}

/// Availability map for all known tools (the health report).
pub fn available_tools() -> &'static BTreeMap<&'static str, bool> {
    cache()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_all_known_tools() {
        let tools = available_tools();
        assert_eq!(tools.len(), KNOWN_TOOLS.len());
        for tool in KNOWN_TOOLS {
            assert!(tools.contains_key(tool));
        }
    }

    #[test]
    fn unknown_tool_is_probed_directly() {
        assert!(!have("slimg-definitely-not-installed"));
    }
}
