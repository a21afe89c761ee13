use crate::config::LogLevel;

// Define all log targets in one place
macro_rules! define_log_targets {
    ($(($const_name:ident, $field_name:ident, $target_str:literal)),* $(,)?) => {
        $(
            pub const $const_name: &str = $target_str;
        )*

        pub fn log_targets() -> Vec<&'static str> {
            vec![
                $(
                    $const_name,
                )*
            ]
        }

        pub fn log_level_for(config: &crate::config::LogConfig, target: &str) -> LogLevel {
            match target {
                $(
                    $const_name => config.$field_name,
                )*
                _ => config.level,
            }
        }

        // Fails to compile if LogConfig is missing a target level field
        pub const fn validate_log_config_fields() {
            use crate::config::LogConfig;

            let _config = LogConfig {
                ansi_enabled: true,
                format: crate::config::LogFormat::Pretty,
                output: crate::config::LogOutput::Stdout,
                level: LogLevel::Info,
                $(
                    $field_name: LogLevel::Info,
                )*
            };
        }

        // LogConfig fields in config/log.rs are kept in sync with the targets by hand.
        //
        // When adding a target (NEW_TARGET, new_target_level, "new_target"):
        // 1. Add it to the define_log_targets! invocation below
        // 2. Add `pub new_target_level: LogLevel` to LogConfig with the default level serde attribute
        // 3. Add `new_target_level: level` to LogConfig::with_level
    };
}

define_log_targets!(
    (DEVELOPMENT, development_level, "development"),
    (CONFIG, config_level, "config"),
    (ELIGIBILITY, eligibility_level, "eligibility"),
    (QUEUE, queue_level, "queue"),
    (REGISTRY, registry_level, "registry"),
    (LIFECYCLE, lifecycle_level, "lifecycle"),
    (CLAIM, claim_level, "claim"),
    (SWEEPER, sweeper_level, "sweeper"),
    (STORE, store_level, "store"),
);

const _: () = validate_log_config_fields();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;

    #[test]
    fn every_target_has_a_level() {
        let mut config = LogConfig::with_level(LogLevel::Info);
        config.sweeper_level = LogLevel::Trace;

        assert_eq!(log_level_for(&config, SWEEPER), LogLevel::Trace);
        assert_eq!(log_level_for(&config, CLAIM), LogLevel::Info);
        assert_eq!(log_level_for(&config, "unknown"), LogLevel::Info);
        assert_eq!(log_targets().len(), 9);
    }
}
