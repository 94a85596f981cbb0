use anyhow::Result;
use tempfile::TempDir;

use graphcli::config::ConfigLoad;

#[test]
fn test_config_defaults() {
    let config = ConfigLoad::default();

    assert_eq!(config.prompt.as_deref(), Some("graphcli"));
    assert_eq!(config.show_stats, Some(false));
    assert_eq!(config.worker_id(), 0);
    assert_eq!(config.gc_every(), 0);
}

#[test]
fn test_config_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("graphdb.toml");

    // The first load materializes the defaults on disk.
    let mut config: ConfigLoad = confy::load_path(&path)?;
    assert_eq!(config.prompt.as_deref(), Some("graphcli"));

    config.show_stats = Some(true);
    config.worker_id = Some(7);
    config.gc_every = Some(100);
    confy::store_path(&path, &config)?;

    let reloaded: ConfigLoad = confy::load_path(&path)?;
    assert_eq!(reloaded.show_stats, Some(true));
    assert_eq!(reloaded.worker_id(), 7);
    assert_eq!(reloaded.gc_every(), 100);
    Ok(())
}

#[test]
fn test_terminal_update_enables_stats() {
    let mut config = ConfigLoad::default();
    config.terminal_update();
    assert_eq!(config.show_stats, Some(true));
}
