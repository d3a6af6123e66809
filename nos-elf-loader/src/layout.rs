//! Loader configuration: target description and user address-space layout
//!
//! One [`LoaderConfig`] per supported architecture, mirroring the kernel's
//! address-space layout tables. The configuration is always passed to the
//! loader explicitly; there is no global instance.

use crate::address_space::{VirtAddr, VirtRange};
use crate::bytes::ByteOrder;
use crate::header::{EM_AARCH64, EM_RISCV, EM_X86_64};

/// Page size (4KB)
pub const PAGE_SIZE: u64 = 4096;

/// Default size of the initial user stack (64KB committed up front)
pub const DEFAULT_STACK_SIZE: u64 = 16 * PAGE_SIZE;

/// Loader configuration for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// `e_machine` value images must carry
    pub machine: u16,

    /// Byte order images must be encoded in
    pub byte_order: ByteOrder,

    /// Page size in bytes (power of two)
    pub page_size: u64,

    /// Lowest address a segment or the stack may occupy
    pub user_base: u64,

    /// First address past user space (exclusive)
    pub user_max: u64,

    /// Preferred top of the initial stack (exclusive, page aligned)
    pub stack_top: u64,

    /// Size of the initial stack region
    pub stack_size: u64,

    /// Unmapped gap kept on each side of the stack
    pub stack_guard_size: u64,

    /// Drop write permission from segments that are both writable and executable
    pub enforce_wx: bool,
}

impl LoaderConfig {
    /// x86_64, 47-bit canonical user half
    pub const fn x86_64() -> Self {
        Self {
            machine: EM_X86_64,
            byte_order: ByteOrder::Little,
            page_size: PAGE_SIZE,
            // Leave the NULL page unmapped
            user_base: 0x0000_0000_0000_1000,
            user_max: 0x0000_8000_0000_0000,
            // Typical Linux layout
            stack_top: 0x0000_7FFF_FFFF_F000,
            stack_size: DEFAULT_STACK_SIZE,
            stack_guard_size: PAGE_SIZE,
            enforce_wx: true,
        }
    }

    /// AArch64, 48-bit TTBR0 user space
    pub const fn aarch64() -> Self {
        Self {
            machine: EM_AARCH64,
            byte_order: ByteOrder::Little,
            page_size: PAGE_SIZE,
            user_base: 0x0000_0000_0000_1000,
            user_max: 0x0001_0000_0000_0000,
            stack_top: 0x0000_FFFF_FFFF_F000,
            stack_size: DEFAULT_STACK_SIZE,
            stack_guard_size: PAGE_SIZE,
            enforce_wx: true,
        }
    }

    /// RISC-V 64, Sv39 user space
    pub const fn riscv64() -> Self {
        Self {
            machine: EM_RISCV,
            byte_order: ByteOrder::Little,
            page_size: PAGE_SIZE,
            user_base: 0x0000_0000_0000_1000,
            user_max: 0x0000_0040_0000_0000,
            stack_top: 0x0000_003F_FFFF_F000,
            stack_size: DEFAULT_STACK_SIZE,
            stack_guard_size: PAGE_SIZE,
            enforce_wx: true,
        }
    }

    /// Configuration of the architecture this crate was built for
    pub const fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        let config = Self::aarch64();

        #[cfg(target_arch = "riscv64")]
        let config = Self::riscv64();

        #[cfg(not(any(target_arch = "aarch64", target_arch = "riscv64")))]
        let config = Self::x86_64();

        // Images must match the running kernel
        Self {
            byte_order: ByteOrder::native(),
            ..config
        }
    }

    /// Replaces the stack size, rounded up to whole pages.
    pub const fn with_stack_size(mut self, size: u64) -> Self {
        self.stack_size = (size + self.page_size - 1) & !(self.page_size - 1);
        self
    }

    /// Replaces the preferred stack top.
    pub const fn with_stack_top(mut self, top: u64) -> Self {
        self.stack_top = top;
        self
    }

    /// Replaces the user address window.
    pub const fn with_user_window(mut self, base: u64, max: u64) -> Self {
        self.user_base = base;
        self.user_max = max;
        self
    }

    /// The user address window as a range
    pub const fn user_window(&self) -> VirtRange {
        VirtRange::new(VirtAddr(self.user_base), VirtAddr(self.user_max))
    }

    /// Whether `range` lies entirely inside the user window
    pub const fn is_user_range(&self, range: &VirtRange) -> bool {
        range.start.0 >= self.user_base && range.end.0 <= self.user_max && range.start.0 <= range.end.0
    }

    /// Smallest page-aligned range covering `range`, `None` on overflow
    pub const fn page_span(&self, range: &VirtRange) -> Option<VirtRange> {
        match range.end.page_round_up(self.page_size) {
            Some(end) => Some(VirtRange::new(range.start.page_round_down(self.page_size), end)),
            None => None,
        }
    }

    /// Verify the configuration is internally consistent.
    pub fn verify(&self) -> Result<(), &'static str> {
        if !self.page_size.is_power_of_two() {
            return Err("Page size is not a power of two");
        }
        if self.user_base >= self.user_max {
            return Err("User window is empty");
        }
        if self.stack_top % self.page_size != 0
            || self.stack_size % self.page_size != 0
            || self.stack_guard_size % self.page_size != 0
        {
            return Err("Stack is not page aligned");
        }
        if self.stack_size == 0 {
            return Err("Stack size is zero");
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::current()
    }
}
