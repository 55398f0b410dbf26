#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests.
//!
//! `Cargo.toml` is parsed with `toml` and checked against the crate's
//! panic-free lint policy and feature layout. A failure here means the
//! manifest drifted from the agreed-upon configuration.

use std::path::PathBuf;

use toml::Table;

fn manifest() -> Table {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read '{}': {e}", path.display()));
    text.parse::<Table>()
        .unwrap_or_else(|e| panic!("Cargo.toml is not valid TOML: {e}"))
}

mod panic_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn panic_prone_lints_are_denied() {
        let manifest = manifest();
        let clippy = manifest
            .get("lints")
            .and_then(|lints| lints.get("clippy"))
            .and_then(|clippy| clippy.as_table())
            .expect("Cargo.toml is missing a [lints.clippy] table");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(|level| level.as_str()),
                Some("deny"),
                "[lints.clippy] must set `{lint} = \"deny\"` to keep library code panic-free"
            );
        }
    }
}

mod feature_policy {
    use super::*;

    #[test]
    fn websocket_transport_is_default_and_optional() {
        let manifest = manifest();
        let features = manifest["features"].as_table().expect("[features]");
        let default: Vec<&str> = features["default"]
            .as_array()
            .expect("default feature list")
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(default.contains(&"transport-websocket"));

        let websocket = &manifest["dependencies"]["tokio-tungstenite"];
        assert_eq!(
            websocket.get("optional").and_then(|v| v.as_bool()),
            Some(true),
            "tokio-tungstenite must stay optional so the core builds without it"
        );
    }

    #[test]
    fn msrv_is_declared() {
        let manifest = manifest();
        let msrv = manifest["package"]
            .get("rust-version")
            .and_then(|v| v.as_str())
            .expect("package.rust-version must be declared");
        assert!(
            msrv.split('.').count() == 3,
            "rust-version '{msrv}' should be a full semver version"
        );
    }
}
