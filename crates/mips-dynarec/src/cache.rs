//! The table of compiled blocks and the arena their code lives in.

use crate::{
    compiler::CompileError,
    dispatcher::{self, Stubs},
    emitter::Emitter,
};
use log::{debug, warn};
use std::collections::HashMap;

/// A block exit that jumps to a statically known guest address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub target: u32,
    /// Arena offset of the patchable jump.
    pub patch_offset: usize,
    /// Whether the jump goes straight to the target block instead of the dispatcher.
    pub linked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start: u32,
    /// Number of guest instructions, delay slots included.
    pub original_size: u32,
    /// Bytes of host code.
    pub code_size: usize,
    /// Entry that checks the downcount first, used by the dispatcher.
    pub checked_entry: usize,
    /// Entry that skips the check, used by direct links.
    pub normal_entry: usize,
    pub exits: Vec<Exit>,
}

impl Block {
    fn new(start: u32, offset: usize) -> Self {
        Self {
            start,
            original_size: 0,
            code_size: 0,
            checked_entry: offset,
            normal_entry: offset,
            exits: Vec::new(),
        }
    }
}

pub struct BlockCache<E: Emitter> {
    emit: E,
    blocks: Vec<Block>,
    by_start: HashMap<u32, usize>,
    /// Target address to the blocks with an exit to it.
    links_to: HashMap<u32, Vec<usize>>,
    stubs: Stubs,
    max_blocks: usize,
}

impl<E: Emitter> BlockCache<E> {
    pub fn new(emit: E, max_blocks: usize) -> Result<Self, CompileError> {
        let mut cache = Self {
            emit,
            blocks: Vec::new(),
            by_start: HashMap::new(),
            links_to: HashMap::new(),
            stubs: Stubs::default(),
            max_blocks,
        };
        cache.clear();
        if cache.emit.code_mut().take_overflow() {
            return Err(CompileError::CodeSpaceExhausted);
        }
        Ok(cache)
    }

    pub fn emitter(&self) -> &E {
        &self.emit
    }

    pub fn emitter_mut(&mut self) -> &mut E {
        &mut self.emit
    }

    pub fn stubs(&self) -> &Stubs {
        &self.stubs
    }

    /// A pointer into the arena, for entering generated code.
    pub fn code_ptr(&self, offset: usize) -> *const u8 {
        self.emit.code().ptr(offset)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.max_blocks
    }

    pub fn space_left(&self) -> usize {
        self.emit.code().space_left()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, num: usize) -> Option<&Block> {
        self.blocks.get(num)
    }

    pub fn block_mut(&mut self, num: usize) -> Option<&mut Block> {
        self.blocks.get_mut(num)
    }

    pub fn get_block_number_from_start_address(&self, addr: u32) -> Option<usize> {
        self.by_start.get(&addr).copied()
    }

    /// Starts a new block at the end of the arena. Space and table checks are up to the caller.
    pub fn allocate_block(&mut self, start: u32) -> usize {
        debug_assert!(!self.is_full(), "block table is full");
        let offset = self.emit.offset();
        let space_left = self.space_left();
        self.emit.code_mut().reserve(space_left);
        self.blocks.push(Block::new(start, offset));
        self.blocks.len() - 1
    }

    /// Drops the most recently allocated block and its code, after a failed compilation.
    pub fn discard_block(&mut self, num: usize) {
        debug_assert_eq!(num + 1, self.blocks.len(), "only the newest block can be discarded");
        if let Some(block) = self.blocks.pop() {
            let code = self.emit.code_mut();
            code.truncate(block.checked_entry);
            code.take_overflow();
        }
    }

    /// Publishes a compiled block, linking its exits and any exits waiting for it when `block_link` is set.
    pub fn finalize_block(&mut self, num: usize, block_link: bool) {
        let end = self.emit.offset();
        let Some(block) = self.blocks.get_mut(num) else {
            return;
        };
        block.code_size = end - block.checked_entry;
        let (start, checked_entry) = (block.start, block.checked_entry);
        self.by_start.insert(start, num);

        if block_link {
            let targets: Vec<u32> = self.blocks[num].exits.iter().map(|exit| exit.target).collect();
            for target in targets {
                let sources = self.links_to.entry(target).or_default();
                if !sources.contains(&num) {
                    sources.push(num);
                }
                if let Some(target_num) = self.get_block_number_from_start_address(target) {
                    self.link_exits(num, target, target_num);
                }
            }

            let sources = self.links_to.get(&start).cloned().unwrap_or_default();
            for source in sources {
                self.link_exits(source, start, num);
            }
        }

        self.emit.code().flush_icache(checked_entry, end - checked_entry);
        debug!(
            "finalized block {num} at {start:#010x}: {} guest instructions, {} bytes",
            self.blocks[num].original_size, self.blocks[num].code_size
        );
    }

    /// Points every unlinked exit of `source` that leaves for `target` at the normal entry of `target_num`.
    fn link_exits(&mut self, source: usize, target: u32, target_num: usize) {
        let normal_entry = self.blocks[target_num].normal_entry;
        let mut patched = false;
        for exit in &mut self.blocks[source].exits {
            if exit.target == target && !exit.linked {
                if self.emit.patch_jump(exit.patch_offset, normal_entry) {
                    exit.linked = true;
                    patched = true;
                } else {
                    warn!("failed to patch exit of block {source} at {:#x}", exit.patch_offset);
                }
            }
        }
        if patched {
            debug!("linked block {source} to {target:#010x} (block {target_num})");
            let checked_entry = self.blocks[source].checked_entry;
            let code_size = self.blocks[source].code_size;
            self.emit.code().flush_icache(checked_entry, code_size);
        }
    }

    /// Forgets every block and regenerates the stubs. Offsets handed out before are invalid afterwards.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.by_start.clear();
        self.links_to.clear();
        self.emit.code_mut().reset();
        self.stubs = dispatcher::generate(&mut self.emit);
    }

    /// Invalidation is a full clear, there is no per block bookkeeping to undo links.
    pub fn invalidate_icache_at(&mut self, addr: u32, len: u32) {
        if !self.is_empty() {
            warn!("code at {addr:#010x}+{len:#x} was invalidated, clearing the whole cache");
        }
        self.clear();
    }
}

impl<E: Emitter + std::fmt::Debug> std::fmt::Debug for BlockCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("blocks", &self.blocks.len())
            .field("space_left", &self.space_left())
            .field("stubs", &self.stubs)
            .finish_non_exhaustive()
    }
}
