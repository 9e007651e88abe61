/// Knobs for one [`crate::Executor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Clear DONT_CARE attachments to a recognizable pattern when a render
    /// pass loads or stores them.
    pub poison_mem: bool,
    /// Log every replayed command.
    pub print_cmds: bool,
    /// Nesting limit for secondary command buffers and generated commands.
    pub max_replay_depth: u32,
    /// Size of each scratch upload block in bytes.
    pub upload_arena_size: u64,
}

pub const POISON_MEMORY_ENV: &str = "AERO_LVP_POISON_MEMORY";
pub const PRINT_CMDS_ENV: &str = "AERO_LVP_PRINT_CMDS";
pub const MAX_REPLAY_DEPTH_ENV: &str = "AERO_LVP_MAX_REPLAY_DEPTH";

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            poison_mem: false,
            print_cmds: false,
            max_replay_depth: 8,
            upload_arena_size: 64 * 1024,
        }
    }
}

impl ReplayConfig {
    /// Defaults overridden by `AERO_LVP_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(POISON_MEMORY_ENV) {
            config.poison_mem = parse_flag(&raw);
        }
        if let Ok(raw) = std::env::var(PRINT_CMDS_ENV) {
            config.print_cmds = parse_flag(&raw);
        }
        if let Ok(raw) = std::env::var(MAX_REPLAY_DEPTH_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(depth) => config.max_replay_depth = depth,
                Err(err) => tracing::warn!(
                    value = %raw,
                    %err,
                    "ignoring invalid {MAX_REPLAY_DEPTH_ENV}"
                ),
            }
        }
        config
    }
}

/// Truthy values are `1`, `true`, `yes` and `on`, case-insensitively.
pub fn parse_flag(raw: &str) -> bool {
    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_accepts_common_truthy_spellings() {
        for v in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(parse_flag(v), "{v:?}");
        }
        for v in ["", "0", "false", "off", "2", "enabled"] {
            assert!(!parse_flag(v), "{v:?}");
        }
    }

    #[test]
    fn defaults_bound_recursion() {
        let config = ReplayConfig::default();
        assert_eq!(config.max_replay_depth, 8);
        assert_eq!(config.upload_arena_size, 65536);
        assert!(!config.poison_mem);
    }
}
