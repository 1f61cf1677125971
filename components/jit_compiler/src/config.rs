//! Engine configuration

/// Engine configuration
///
/// The optimization level drives both the IR transform pipeline and the
/// code generator's own optimization setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// IR optimization level, 0 to 3
    pub opt_level: u8,
    /// Compile the functions of a materialization batch on the worker pool
    pub concurrent_compile: bool,
    /// Run the code generator's verifier on every function
    pub verify_generated_code: bool,
    /// Write `/tmp/perf-<pid>.map` entries for linked code
    pub perf_map: bool,
}

impl EngineConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self {
            opt_level: 2,
            concurrent_compile: true,
            verify_generated_code: cfg!(debug_assertions),
            perf_map: false,
        }
    }

    /// Fast compilation, no inlining
    pub fn baseline() -> Self {
        Self {
            opt_level: 0,
            ..Self::new()
        }
    }

    /// Aggressive optimization
    pub fn optimizing() -> Self {
        Self {
            opt_level: 3,
            ..Self::new()
        }
    }

    /// Builder-style optimization level, clamped to 3
    pub fn with_opt_level(mut self, level: u8) -> Self {
        self.opt_level = level.min(3);
        self
    }

    /// Builder-style perf map toggle
    pub fn with_perf_map(mut self, enabled: bool) -> Self {
        self.perf_map = enabled;
        self
    }

    /// Builder-style concurrency toggle
    pub fn with_concurrent_compile(mut self, enabled: bool) -> Self {
        self.concurrent_compile = enabled;
        self
    }

    /// Value for the code generator's `opt_level` flag
    pub fn codegen_opt_level(&self) -> &'static str {
        match self.opt_level {
            0 => "none",
            1 | 2 => "speed",
            _ => "speed_and_size",
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(EngineConfig::new().opt_level, 2);
        assert_eq!(EngineConfig::baseline().codegen_opt_level(), "none");
        assert_eq!(EngineConfig::optimizing().codegen_opt_level(), "speed_and_size");
    }

    #[test]
    fn test_opt_level_clamped() {
        assert_eq!(EngineConfig::new().with_opt_level(9).opt_level, 3);
    }
}
