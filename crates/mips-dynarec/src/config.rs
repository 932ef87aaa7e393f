use crate::{runtime::FastRegion, JitError};

/// Tuning knobs of the recompiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitOptions {
    /// Patch block exits to jump straight into already compiled successors.
    pub enable_block_link: bool,
    /// Mask dynamic addresses into the main fast region instead of range checking them. Out of range accesses
    /// wrap around inside that region rather than reaching the bus or the other regions.
    pub fast_memory: bool,
    /// Size of the executable arena in bytes.
    pub code_size: usize,
    pub max_blocks: usize,
    /// Free arena space required before starting to compile a block.
    pub reserved_code_margin: usize,
    /// Blocks longer than this end with a fall-through exit.
    pub max_block_instructions: usize,
    /// Log the guest and host code of every compiled block.
    pub dump_blocks: bool,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            enable_block_link: true,
            fast_memory: false,
            code_size: 16 * 1024 * 1024,
            max_blocks: 16384,
            reserved_code_margin: 0x10000,
            max_block_instructions: 128,
            dump_blocks: false,
        }
    }
}

impl JitOptions {
    pub fn validate(&self, fast_regions: &[FastRegion]) -> Result<(), JitError> {
        let invalid = |reason: String| Err(JitError::InvalidConfig(reason));

        if self.max_blocks == 0 {
            return invalid("the block table needs at least one slot".into());
        }
        if self.max_block_instructions == 0 {
            return invalid("blocks need room for at least one instruction".into());
        }
        if self.reserved_code_margin >= self.code_size {
            return invalid(format!(
                "reserved margin of {:#x} bytes does not fit in a {:#x} byte arena",
                self.reserved_code_margin, self.code_size
            ));
        }
        for (i, region) in fast_regions.iter().enumerate() {
            if let Some(other) = fast_regions[..i].iter().find(|other| other.overlaps(region)) {
                return invalid(format!(
                    "fast regions at {:#010x} and {:#010x} overlap",
                    other.start, region.start
                ));
            }
        }
        if self.fast_memory {
            match fast_regions.first() {
                None => return invalid("masked memory access needs a fast region".into()),
                Some(region) if !region.len.is_power_of_two() => {
                    return invalid(format!(
                        "masked memory access needs a power of two region, got {:#x} bytes",
                        region.len
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
