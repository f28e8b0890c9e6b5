use std::io::Write;

use volreg_core::error::VolregError;
use volreg_core::interpolation::Interpolation;
use volreg_core::pipeline::RegistrationConfig;
use volreg_core::register::CostType;
use volreg_core::transform::RegType;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "reg_type = \"Rigid\"\ncost = \"Skip\"\nbidirectional = false\ninterpolation = \"Nearest\"\nthreads = 2\n\n[nonlinear]\nresolution = 2\nsmoothness = 0.5"
    )
    .unwrap();
    let config = RegistrationConfig::load(file.path()).unwrap();
    assert_eq!(config.reg_type, RegType::Rigid);
    assert_eq!(config.cost, CostType::Skip);
    assert!(!config.bidirectional);
    assert_eq!(config.interpolation, Interpolation::Nearest);
    assert_eq!(config.threads, Some(2));
    assert_eq!(config.nonlinear.resolution, 2);
    assert_eq!(config.nonlinear.smoothness, 0.5);
    assert_eq!(config.nonlinear.iterations, 32);
    assert_eq!(config.edge, None);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        RegistrationConfig::load(&dir.path().join("absent.toml")),
        Err(VolregError::Io(_))
    ));
}

#[test]
fn test_unknown_cost_rejected() {
    assert!(matches!(
        RegistrationConfig::from_toml_str("cost = \"Entropy\""),
        Err(VolregError::Config(_))
    ));
}

#[test]
fn test_display_summarizes_settings() {
    let text = RegistrationConfig::default().to_string();
    assert!(text.contains("edge: auto"));
    assert!(text.contains("iterations 32"));
}
