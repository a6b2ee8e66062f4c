//! Config load validation tests for run-atlas-config.
// crates/run-atlas-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, ranges).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

#![allow(clippy::use_debug, reason = "Test-only assertions and helpers are permitted.")]

use std::io::Write;
use std::path::Path;

use run_atlas_config::ConfigError;
use run_atlas_config::RunAtlasConfig;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<RunAtlasConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

fn write_config(content: &str) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(content.as_bytes()).map_err(|err| err.to_string())?;
    Ok(file)
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    assert_invalid(RunAtlasConfig::load(Some(Path::new(&long_path))), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    assert_invalid(RunAtlasConfig::load(Some(Path::new(&long_component))), "config path component too long")
}

#[test]
fn load_rejects_missing_file() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("run-atlas.toml");
    assert_invalid(RunAtlasConfig::load(Some(&path)), "config io error")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'#'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_rejects_malformed_toml() -> TestResult {
    let file = write_config("[store\nconnection = ")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "config parse error")
}

#[test]
fn load_rejects_non_postgres_connection() -> TestResult {
    let file = write_config("[store]\nconnection = \"mysql://db/lab\"\n")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "postgres")
}

#[test]
fn load_rejects_pool_limits() -> TestResult {
    let file = write_config("[store]\nmax_connections = 0\n")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "max_connections")?;
    let file = write_config("[store]\nmax_connections = 2\nmin_idle = 3\n")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "min_idle")
}

#[test]
fn load_rejects_zero_cache_ttl() -> TestResult {
    let file = write_config("[cache]\nexperiments_ttl_ms = 0\n")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "cache.experiments_ttl_ms")
}

#[test]
fn load_rejects_default_page_above_max() -> TestResult {
    let file = write_config("[query]\ndefault_page_size = 500\nmax_page_size = 200\n")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "default_page_size")
}

#[test]
fn load_rejects_histogram_bins_above_ceiling() -> TestResult {
    let file = write_config("[query]\nmax_histogram_bins = 201\n")?;
    assert_invalid(RunAtlasConfig::load(Some(file.path())), "max_histogram_bins")
}

#[test]
fn load_accepts_full_document() -> TestResult {
    let file = write_config(
        r#"
        [store]
        connection = "postgres://atlas:secret@db:5432/lab?schema=vision&file_root=/srv/artifacts"
        max_connections = 8
        min_idle = 2
        connect_timeout_ms = 5000
        statement_timeout_ms = 15000

        [cache]
        field_index_ttl_ms = 30000
        experiments_ttl_ms = 30000
        namespace_map_ttl_ms = 120000

        [query]
        default_page_size = 50
        max_page_size = 500
        introspection_sample = 2000
        max_histogram_bins = 100
        "#,
    )?;
    let config = RunAtlasConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    let store = config.to_store_config();
    if store.max_connections != 8 || store.min_idle != 2 || store.statement_timeout_ms != 15_000 {
        return Err(format!("pool settings not carried over: {store:?}"));
    }
    if store.namespace_map_ttl_ms != 120_000 || store.max_page_size != 500 || store.max_histogram_bins != 100 {
        return Err(format!("limits not carried over: {store:?}"));
    }
    if config.query.first_page(None).limit != 50 {
        return Err("default page size not applied".to_string());
    }
    Ok(())
}
