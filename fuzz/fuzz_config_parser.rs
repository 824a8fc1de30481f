//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text through `AppConfig::parse()`, which also runs
//! validation. A config that parses must survive a TOML round trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spritenav_config::AppConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = AppConfig::parse(s)
        && let Ok(text) = toml::to_string(&config)
    {
        assert!(AppConfig::parse(&text).is_ok(), "re-parse failed:\n{text}");
    }
});
