//! Render Settings Tests

use strata::RenderSettings;

#[test]
fn settings_round_trip_through_json() {
    let mut settings = RenderSettings {
        vsync: false,
        shadow_map_size: 4096,
        cascade_lambda: 0.5,
        sdsm: true,
        terrain_pixel_error: 1.5,
        debug_mode: 2,
        ..Default::default()
    };
    settings.clear_color = [0.1, 0.2, 0.3, 1.0];

    let json = serde_json::to_string(&settings).unwrap();
    let back: RenderSettings = serde_json::from_str(&json).unwrap();

    assert!(!back.vsync);
    assert_eq!(back.shadow_map_size, 4096);
    assert_eq!(back.cascade_lambda, 0.5);
    assert!(back.sdsm);
    assert_eq!(back.clear_color, [0.1, 0.2, 0.3, 1.0]);
    assert_eq!(back.debug_mode, 2);
}

#[test]
fn partial_config_files_fill_defaults() {
    // Project config files usually set a handful of fields.
    let back: RenderSettings = serde_json::from_str(r#"{"vsync": false, "sdsm": true}"#).unwrap();
    assert!(!back.vsync);
    assert!(back.sdsm);
    assert_eq!(back.shadow_map_size, RenderSettings::default().shadow_map_size);
    // Device-selection fields always deserialize to defaults.
    assert_eq!(back.required_limits, wgpu::Limits::default());
}

#[test]
fn debug_mode_cycles_through_all_views() {
    let mut s = RenderSettings::default();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..strata::renderer::settings::DEBUG_MODE_COUNT {
        seen.insert(s.debug_mode);
        s.cycle_debug_mode();
    }
    assert_eq!(seen.len() as u32, strata::renderer::settings::DEBUG_MODE_COUNT);
    assert_eq!(s.debug_mode, 0);
}
