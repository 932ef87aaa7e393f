//! The host side of execution: looks up or compiles the block at the guest PC and runs it until the
//! cycle budget is spent or the guest stops.

use crate::{
    arena::CodeBuffer,
    cache::{Block, BlockCache},
    compiler::{self, CompileError},
    config::JitOptions,
    disasm,
    dispatcher::ExitReason,
    emitter::{Emitter, HostEmitter},
    runtime::{Bus, Environment, FastRegion},
    state::{CoreState, CpuState},
    JitError,
};
use log::{debug, error, info, warn};
use mips_decomp::{MaybeInstruction, INSTRUCTION_SIZE};

/// Signature of the enter stub, see [`Emitter::enter_host`].
type EnterFn = unsafe extern "sysv64" fn(*mut Environment, *mut u8, *const u8) -> u32;

/// Why [`Jit::run_loop_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The cycle budget ran out.
    DowncountExpired,
    /// The guest stopped running, through a syscall handler or a `break`.
    CoreStateChanged(CoreState),
}

pub struct Jit {
    env: Box<Environment>,
    cache: BlockCache<HostEmitter>,
    options: JitOptions,
    regions: Vec<FastRegion>,
}

impl Jit {
    pub fn new(mut bus: Box<dyn Bus>, options: JitOptions) -> Result<Self, JitError> {
        let regions = bus.fast_regions();
        options.validate(&regions)?;

        let code = CodeBuffer::new(options.code_size)?;
        let cache = BlockCache::new(HostEmitter::new(code), options.max_blocks)?;
        if regions.is_empty() {
            info!("no fast memory region, every access goes through the bus");
        }
        for (i, region) in regions.iter().enumerate() {
            let mode = match i {
                0 if options.fast_memory => "masked",
                _ => "range checked",
            };
            info!(
                "fast memory covers {:#010x}..{:#010x}, {mode} accesses",
                region.start,
                u64::from(region.start) + u64::from(region.len),
            );
        }

        Ok(Self {
            env: Environment::new(bus),
            cache,
            options,
            regions,
        })
    }

    pub fn state(&self) -> &CpuState {
        &self.env.state
    }

    pub fn state_mut(&mut self) -> &mut CpuState {
        &mut self.env.state
    }

    pub fn bus(&self) -> &dyn Bus {
        self.env.bus.as_ref()
    }

    pub fn bus_mut(&mut self) -> &mut dyn Bus {
        self.env.bus.as_mut()
    }

    pub fn options(&self) -> &JitOptions {
        &self.options
    }

    pub fn blocks(&self) -> &[Block] {
        self.cache.blocks()
    }

    pub fn block_at(&self, addr: u32) -> Option<&Block> {
        self.cache
            .get_block_number_from_start_address(addr)
            .and_then(|num| self.cache.block(num))
    }

    /// Host code in the arena, for inspecting compiled blocks.
    pub fn code(&self, offset: usize, len: usize) -> &[u8] {
        self.cache.emitter().code().bytes(offset, len)
    }

    /// Returns the block starting at `addr`, compiling it first if needed.
    ///
    /// The whole cache is cleared when the arena or the block table are close to running out, and once more
    /// if the block still does not fit.
    pub fn compile(&mut self, addr: u32) -> Result<usize, JitError> {
        if let Some(num) = self.cache.get_block_number_from_start_address(addr) {
            return Ok(num);
        }

        if self.cache.is_full() || self.cache.space_left() < self.options.reserved_code_margin {
            info!(
                "code cache is full ({} blocks, {:#x} bytes left), clearing it",
                self.cache.len(),
                self.cache.space_left()
            );
            self.cache.clear();
        }

        let num = match self.compile_block(addr) {
            Err(CompileError::CodeSpaceExhausted) => {
                warn!("block at {addr:#010x} did not fit in the arena, retrying with an empty cache");
                self.cache.clear();
                self.compile_block(addr)?
            }
            result => result?,
        };

        if self.options.dump_blocks {
            self.dump_block(num);
        }
        Ok(num)
    }

    fn compile_block(&mut self, addr: u32) -> Result<usize, CompileError> {
        compiler::compile_block(
            &mut self.cache,
            self.env.bus.as_mut(),
            &self.options,
            &self.regions,
            addr,
        )
    }

    /// Runs guest code for `cycles` cycles, or until the guest stops.
    ///
    /// The downcount is set to `cycles` and every block charges its cost on exit, so the downcount left over
    /// is the budget minus everything that ran. It ends up negative when the budget is used up.
    pub fn run_loop_until(&mut self, cycles: i32) -> Result<RunExit, JitError> {
        self.env.state.set_downcount(cycles);

        loop {
            match self.env.state.core_state() {
                CoreState::Running => {}
                state => {
                    debug!("core state changed to {state:?} at {:#010x}", self.env.state.pc());
                    return Ok(RunExit::CoreStateChanged(state));
                }
            }
            if self.env.state.downcount() < 0 {
                return Ok(RunExit::DowncountExpired);
            }

            let pc = self.env.state.pc();
            let num = self.compile(pc)?;
            let entry = self.cache.block(num).map_or(0, |block| block.checked_entry);

            match self.enter(entry) {
                ExitReason::Dispatch | ExitReason::CoreState | ExitReason::DowncountExpired => {}
                ExitReason::HardFault => {
                    let pc = self.env.state.pc();
                    let raw = self.env.bus.read_u32(pc).unwrap_or_default();
                    error!(
                        "hard fault at {pc:#010x}: {}",
                        MaybeInstruction::new(raw)
                    );
                    return Err(JitError::HardFault { pc, raw });
                }
            }
        }
    }

    /// Runs generated code from the arena offset `entry` until it returns to the host.
    fn enter(&mut self, entry: usize) -> ExitReason {
        let stub = self.cache.code_ptr(self.cache.stubs().enter);
        let code = self.cache.code_ptr(entry);
        let membase = self
            .regions
            .first()
            .map_or(std::ptr::null_mut(), |region| region.ptr.as_ptr());
        let env: *mut Environment = self.env.as_mut();

        // SAFETY: the enter stub has the `EnterFn` signature, `entry` is a finalized block, and the environment
        // and the fast regions outlive the call.
        let reason = unsafe {
            let enter = std::mem::transmute::<*const u8, EnterFn>(stub);
            enter(env, membase, code)
        };
        ExitReason::from_repr(reason)
            .unwrap_or_else(|| unreachable!("generated code returned unknown exit reason {reason}"))
    }

    /// Drops every compiled block.
    pub fn clear_cache(&mut self) {
        info!("clearing the code cache");
        self.cache.clear();
    }

    /// Must be called after guest code in `addr..addr + len` was modified.
    pub fn invalidate_cache_at(&mut self, addr: u32, len: u32) {
        self.cache.invalidate_icache_at(addr, len);
    }

    fn dump_block(&mut self, num: usize) {
        let Some(block) = self.cache.block(num).cloned() else {
            return;
        };

        info!(
            "block {num} at {:#010x}, {} guest instructions:",
            block.start, block.original_size
        );
        for i in 0..block.original_size {
            let addr = block.start.wrapping_add(i * INSTRUCTION_SIZE);
            match self.env.bus.read_u32(addr) {
                Ok(raw) => info!("  {addr:#010x}: {}", MaybeInstruction::new(raw)),
                Err(err) => info!("  {addr:#010x}: {err}"),
            }
        }

        let ip = self.cache.code_ptr(block.checked_entry) as u64;
        let code = self.code(block.checked_entry, block.code_size);
        info!("{} bytes of host code:", code.len());
        for line in disasm::disassemble(code, ip) {
            info!("  {line}");
        }
    }
}

impl std::fmt::Debug for Jit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jit")
            .field("env", &self.env)
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
