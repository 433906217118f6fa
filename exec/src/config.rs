use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total size of the generated-code buffer in bytes.
    pub code_buffer_size: usize,
    /// Number of regions the code buffer is split into. A region is
    /// the unit of eviction.
    pub code_regions: usize,
    /// Capacity of the TB arena.
    pub max_tbs: usize,
    /// Upper bound on guest instructions per TB.
    pub max_insns_per_tb: u32,
    /// log2 of the TLB entries per MMU index of each vCPU.
    pub tlb_bits: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_buffer_size: 32 * 1024 * 1024,
            code_regions: 8,
            max_tbs: 65536,
            max_insns_per_tb: 512,
            tlb_bits: 8,
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ExecError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        let bad = |msg: String| Err(ExecError::InvalidConfig(msg));
        if self.code_regions == 0 {
            return bad("code_regions must be at least 1".into());
        }
        if self.code_buffer_size < self.code_regions * 4096 {
            return bad(format!(
                "code_buffer_size {} leaves less than a page per region",
                self.code_buffer_size
            ));
        }
        if self.max_tbs == 0 || self.max_tbs > u32::MAX as usize >> 3 {
            return bad(format!("max_tbs {} out of range", self.max_tbs));
        }
        if self.max_insns_per_tb == 0 {
            return bad("max_insns_per_tb must be at least 1".into());
        }
        if !(1..=16).contains(&self.tlb_bits) {
            return bad(format!("tlb_bits {} out of range 1..=16", self.tlb_bits));
        }
        Ok(())
    }
}

/// Per-vCPU settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VCpuConfig {
    pub hart_id: u64,
    /// Bit `n` set: exceptions with guest cause `n` are returned from
    /// [`crate::VCpu::run`] instead of entering the guest handler.
    pub intercept: u64,
}
