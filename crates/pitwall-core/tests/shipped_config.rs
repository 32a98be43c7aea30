//! The example configuration in `config/` must stay in sync with the defaults.

use std::path::Path;

use pitwall_core::PipelineConfig;

fn shipped_config_path() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("config/pitwall.toml")
}

#[test]
fn shipped_config_parses_and_validates() {
    let path = shipped_config_path();
    let config = PipelineConfig::load(&path)
        .unwrap_or_else(|e| panic!("failed to load {}: {}", path.display(), e));
    assert!(config.database.primary.is_none());
}

#[test]
fn shipped_config_matches_defaults() {
    let config = PipelineConfig::load(&shipped_config_path()).unwrap();
    assert_eq!(config, PipelineConfig::default());
}
