#[cfg(test)]
mod tests {
    use crate::{Config, ToolCallFormat};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_full_config_round_trips_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("supercoder.toml");

        let config_content = r#"
[agent]
tool_call_format = "glm_tool_call"

[checkpoints]
retention = 4
directory = ".state/checkpoints"

[interrupt]
double_press_window_ms = 750
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = Config::load(Some(config_path.to_str().unwrap())).unwrap();

        assert_eq!(config.agent.tool_call_format, ToolCallFormat::GlmToolCall);
        assert_eq!(config.checkpoints.retention, 4);
        assert_eq!(config.checkpoints.directory, ".state/checkpoints");
        assert_eq!(config.interrupt.double_press_window_ms, 750);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("supercoder.toml");
        fs::write(&config_path, "[agent]\ntool_call_format = \"json_block\"\n").unwrap();

        let config = Config::load(Some(config_path.to_str().unwrap())).unwrap();

        assert_eq!(config.agent.tool_call_format, ToolCallFormat::JsonBlock);
        assert_eq!(config.checkpoints.retention, 10);
        assert_eq!(config.checkpoints.directory, ".supercoder/checkpoints");
        assert_eq!(config.interrupt.double_press_window_ms, 500);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("supercoder.toml");
        fs::write(&config_path, "[agent]\ntool_call_format = \"smoke_signals\"\n").unwrap();

        assert!(Config::load(Some(config_path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("supercoder.toml");
        fs::write(&config_path, "[checkpoints]\nretention = 0\n").unwrap();

        let err = Config::load(Some(config_path.to_str().unwrap())).unwrap_err();
        assert!(err.to_string().contains("retention"));
    }

    #[test]
    fn test_absolute_checkpoint_directory_is_rejected() {
        let mut config = Config::default();
        config.checkpoints.directory = "/var/tmp/checkpoints".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_checkpoint_directory_outside_project_is_rejected() {
        for directory in ["../store", "state/../../store", ".."] {
            let mut config = Config::default();
            config.checkpoints.directory = directory.to_string();
            assert!(config.validate().is_err(), "{} was accepted", directory);
        }

        let mut config = Config::default();
        config.checkpoints.directory = "./state/checkpoints".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nope.toml");
        assert!(Config::load(Some(config_path.to_str().unwrap())).is_err());
    }

    #[test]
    fn test_format_parsing_accepts_dashes_and_case() {
        assert_eq!(
            "Qwen-Like".parse::<ToolCallFormat>().unwrap(),
            ToolCallFormat::QwenLike
        );
        assert_eq!(
            "xml_function".parse::<ToolCallFormat>().unwrap(),
            ToolCallFormat::XmlFunction
        );
        let err = "carrier_pigeon".parse::<ToolCallFormat>().unwrap_err();
        assert!(err.to_string().contains("supercoder"));
    }

    #[test]
    fn test_format_display_matches_config_value() {
        for format in ToolCallFormat::ALL {
            let toml_line = format!("[agent]\ntool_call_format = \"{}\"\n", format);
            let config: Config = toml::from_str(&toml_line).unwrap();
            assert_eq!(config.agent.tool_call_format, format);
        }
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("saved.toml");

        let mut config = Config::default();
        config.agent.tool_call_format = ToolCallFormat::XmlFunction;
        config.checkpoints.retention = 3;
        config.save(&config_path).unwrap();

        let loaded = Config::load(Some(config_path.to_str().unwrap())).unwrap();
        assert_eq!(loaded.agent.tool_call_format, ToolCallFormat::XmlFunction);
        assert_eq!(loaded.checkpoints.retention, 3);
    }
}
