//! Integration tests for the `Validate` derive.
//!
//! These live in spritenav-config because proc-macro crates can't have
//! integration tests that use their own macros.

use spritenav_macros::Validate;

#[derive(Validate)]
struct TierSettings {
    #[validate(non_empty)]
    pub name: String,
    #[validate(non_zero)]
    pub capacity: usize,
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: f64,
    #[validate(range(min = 1, max = 100))]
    pub max_hints: usize,
    #[validate(non_empty)]
    pub enabled: Vec<String>,
    #[validate(range(min = -1.0))]
    pub bias: f64,
}

fn valid() -> TierSettings {
    TierSettings {
        name: "memory".to_string(),
        capacity: 500,
        threshold: 0.7,
        max_hints: 10,
        enabled: vec!["linear".to_string()],
        bias: 0.0,
    }
}

#[test]
fn test_validate_all_pass() {
    assert!(valid().validate().is_ok());
}

#[test]
fn test_validate_empty_name() {
    let settings = TierSettings {
        name: String::new(),
        ..valid()
    };
    let errors = settings.validate().unwrap_err();
    assert_eq!(errors, vec!["name: must not be empty".to_string()]);
}

#[test]
fn test_validate_zero_capacity() {
    let settings = TierSettings {
        capacity: 0,
        ..valid()
    };
    let errors = settings.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.contains("capacity")));
}

#[test]
fn test_validate_float_range() {
    let settings = TierSettings {
        threshold: 1.5,
        ..valid()
    };
    let errors = settings.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.starts_with("threshold: must be at most")));

    let settings = TierSettings {
        threshold: -0.1,
        ..valid()
    };
    assert!(settings.validate().is_err());
}

#[test]
fn test_validate_integer_range() {
    let settings = TierSettings {
        max_hints: 101,
        ..valid()
    };
    let errors = settings.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.contains("max_hints")));
}

#[test]
fn test_validate_empty_collection_and_lone_bound() {
    let settings = TierSettings {
        enabled: Vec::new(),
        bias: -2.0,
        ..valid()
    };
    let errors = settings.validate().unwrap_err();
    assert_eq!(
        errors,
        vec!["enabled: must not be empty".to_string(), "bias: must be at least -1".to_string()]
    );

    let settings = TierSettings {
        bias: f64::NAN,
        ..valid()
    };
    assert!(settings.validate().is_err());
    let settings = TierSettings {
        bias: 1e9,
        ..valid()
    };
    assert!(settings.validate().is_ok());
}

#[test]
fn test_validate_multiple_errors() {
    let settings = TierSettings {
        name: String::new(),
        capacity: 0,
        threshold: 2.0,
        max_hints: 0,
        enabled: Vec::new(),
        bias: -5.0,
    };
    let errors = settings.validate().unwrap_err();
    assert!(errors.len() >= 5, "should have multiple errors: {errors:?}");
}
