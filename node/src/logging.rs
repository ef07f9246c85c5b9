//! # Structured Logging
//!
//! One `tracing` subscriber for the whole node, written to stderr. The
//! filter is built per component: every strata target starts at the
//! configured level and `[logging.components]` raises or lowers single
//! components, e.g.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [logging.components]
//! verifier = "debug"
//! resend = "warn"
//! ```
//!
//! `RUST_LOG`, when set, replaces the whole filter.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as layer_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Accepts "json" or "pretty" (case-insensitive). Anything else is
    /// `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Parts of the node that can be filtered on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// The binary itself: startup, progress, metrics server.
    Node,
    /// Verification processes and the process manager.
    Verifier,
    /// Turn timer, leader schedule and leader service.
    Schedule,
    /// Resend loops for votes, requests, mining and posed messages.
    Resend,
    /// In-memory chain, pool and transport of the devnet.
    Devnet,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Node,
        Component::Verifier,
        Component::Schedule,
        Component::Resend,
        Component::Devnet,
    ];

    /// `tracing` targets the component logs under.
    pub fn targets(self) -> &'static [&'static str] {
        match self {
            Component::Node => &["strata_node"],
            Component::Verifier => &[
                "strata_protocol::consensus::process",
                "strata_protocol::consensus::manager",
            ],
            Component::Schedule => &[
                "strata_protocol::consensus::timer",
                "strata_protocol::consensus::schedule",
                "strata_protocol::consensus::leader_service",
            ],
            Component::Resend => &["strata_protocol::consensus::resend"],
            Component::Devnet => &["strata_protocol::devnet"],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Node => "node",
            Component::Verifier => "verifier",
            Component::Schedule => "schedule",
            Component::Resend => "resend",
            Component::Devnet => "devnet",
        };
        f.write_str(name)
    }
}

/// Filter directives for `level` with per-component overrides. Anything
/// outside the strata crates logs at `warn`.
pub fn directives(level: &str, components: &BTreeMap<Component, String>) -> String {
    let mut parts = vec![
        "warn".to_string(),
        format!("strata_protocol={level}"),
    ];
    for component in Component::ALL {
        let component_level = components.get(&component).map_or(level, String::as_str);
        for target in component.targets() {
            parts.push(format!("{target}={component_level}"));
        }
    }
    parts.join(",")
}

/// Installs the global subscriber. Call once, early in `main()`.
pub fn init_logging(
    level: &str,
    components: &BTreeMap<Component, String>,
    format: LogFormat,
) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = directives(level, components);
            EnvFilter::try_new(&directives)
                .with_context(|| format!("invalid log filter: {directives}"))?
        }
    };

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    layer_fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    layer_fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .init();
        }
    }

    tracing::debug!(?format, level, overrides = components.len(), "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossy_format_parsing() {
        assert_eq!(LogFormat::from_str_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_lossy("xml"), LogFormat::Pretty);
    }

    #[test]
    fn component_overrides_reach_their_targets() {
        let mut components = BTreeMap::new();
        components.insert(Component::Verifier, "trace".to_string());
        let filter = directives("info", &components);

        assert!(filter.starts_with("warn,strata_protocol=info"));
        assert!(filter.contains("strata_protocol::consensus::process=trace"));
        assert!(filter.contains("strata_protocol::consensus::manager=trace"));
        assert!(filter.contains("strata_protocol::consensus::leader_service=info"));
        assert!(filter.contains("strata_node=info"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn components_parse_from_toml() {
        let parsed: BTreeMap<Component, String> =
            toml::from_str("devnet = \"debug\"\nresend = \"warn\"").expect("components");
        assert_eq!(parsed.get(&Component::Devnet).map(String::as_str), Some("debug"));
        assert_eq!(parsed.len(), 2);
        assert_eq!(Component::Schedule.to_string(), "schedule");
    }
}
