#![forbid(unsafe_code)]

//! Cross-crate contracts that must hold without a GL context: the engine
//! settings format, the switch state machine, and the CPU-side half of the
//! preset switch pipeline.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use kaleid_core::EngineSettings;

    // ---- Golden fixtures (JSON contracts) ----
    const SETTINGS_FULL_JSON: &str = include_str!("../fixtures/settings_full.json");
    const SETTINGS_UNKNOWN_KEY_JSON: &str = include_str!("../fixtures/settings_unknown_key.json");

    fn write_temp_fixture(name: &str, contents: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("kaleid_contract_tests_{name}_{ts}.json"));
        fs::write(&p, contents).expect("write fixture");
        p
    }

    #[test]
    fn golden_settings_full_deserializes() {
        let path = write_temp_fixture("settings_full", SETTINGS_FULL_JSON);

        let settings =
            EngineSettings::from_json_path(&path).expect("settings_full.json should parse");
        assert_eq!(settings.texture_search_paths.len(), 2);
        assert!(settings.smooth_transitions);
        assert_eq!((settings.mesh_x, settings.mesh_y), (64, 48));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_settings_unknown_key_is_rejected() {
        let path = write_temp_fixture("settings_unknown_key", SETTINGS_UNKNOWN_KEY_JSON);

        let err = EngineSettings::from_json_path(&path)
            .expect_err("settings_unknown_key.json must fail (typo key)");

        // Keep this stable but not overly strict.
        assert!(
            err.to_string().to_lowercase().contains("json"),
            "expected a json error, got: {err}"
        );

        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod switching;
