//! Boot information and kernel initialization.
//!
//! The boot stub converts the bootloader's native structures into
//! [`BootInfoData`] and calls [`kernel_init`], which brings the
//! subsystems up in dependency order and finally drops into the shell.

extern crate alloc;

use alloc::sync::Arc;

use crate::addr::{PhysAddr, VirtAddr};
use crate::fs::{self, FileSystem};
use crate::mm::pmm::BitmapFrameAllocator;
use crate::mm::{PhysMemoryRegion, hhdm, pmm};

/// Kind of a boot memory region. Anything that is not `Usable` is left
/// alone by the frame allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// Normal usable RAM.
    Usable,
    /// Reserved by firmware or hardware.
    Reserved,
    /// ACPI-related memory.
    Acpi,
    /// Bootloader structures, reclaimable in principle (never reclaimed).
    BootloaderReclaimable,
    /// The kernel image and boot modules.
    KernelAndModules,
    /// Framebuffer memory.
    Framebuffer,
    /// Defective memory.
    BadMemory,
}

/// One region of the boot memory map.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    /// Physical start address.
    pub start: PhysAddr,
    /// Size in bytes.
    pub size: u64,
    /// Region classification.
    pub kind: MemoryRegionKind,
}

/// The kernel image's load placement.
#[derive(Debug, Clone, Copy)]
pub struct KernelImageInfo {
    /// Physical base the image was loaded at.
    pub phys_base: PhysAddr,
    /// Virtual base the image was mapped at.
    pub virt_base: VirtAddr,
    /// Image size in bytes (text start through data end).
    pub size: u64,
}

/// A linear framebuffer descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    /// Virtual address (HHDM-mapped by the bootloader).
    pub address: VirtAddr,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per scanline.
    pub pitch: u32,
    /// Bits per pixel.
    pub bpp: u8,
}

/// A boot module: a file the bootloader loaded next to the kernel.
#[derive(Debug, Clone, Copy)]
pub struct BootModule {
    /// The path the module was loaded from.
    pub path: &'static str,
    /// The module bytes, in never-reclaimed module memory.
    pub data: &'static [u8],
}

/// Maximum memory-map entries carried in [`BootInfoData`].
pub const MAX_MEMORY_REGIONS: usize = 128;

/// Maximum boot modules carried in [`BootInfoData`].
pub const MAX_MODULES: usize = 8;

/// Boot information in kernel-native form.
pub struct BootInfoData {
    /// The memory map entries (first `memory_region_count` are valid).
    pub memory_map: [MemoryRegion; MAX_MEMORY_REGIONS],
    /// Number of valid memory map entries.
    pub memory_region_count: usize,
    /// The HHDM offset.
    pub hhdm_offset: u64,
    /// Kernel image placement.
    pub kernel_image: KernelImageInfo,
    /// The primary framebuffer, if the bootloader provided one.
    pub framebuffer: Option<FramebufferInfo>,
    /// Boot modules (first `module_count` are valid).
    pub modules: [Option<BootModule>; MAX_MODULES],
    /// Number of valid modules.
    pub module_count: usize,
}

impl BootInfoData {
    /// The valid prefix of the memory map.
    #[must_use]
    pub fn memory_map(&self) -> &[MemoryRegion] {
        &self.memory_map[..self.memory_region_count]
    }

    /// Iterates over the valid modules.
    pub fn modules(&self) -> impl Iterator<Item = &BootModule> {
        self.modules[..self.module_count].iter().flatten()
    }

    /// Finds the module whose path's last component is `file_name`.
    #[must_use]
    pub fn module_by_name(&self, file_name: &str) -> Option<&BootModule> {
        self.modules()
            .find(|m| m.path.rsplit('/').next() == Some(file_name))
    }
}

/// File name the initramfs module is recognised by.
const INITRAMFS_NAME: &str = "initramfs.cpio";

/// Brings the kernel up and enters the shell. Called by the boot stub
/// with CR3 already pointing at kernel-owned page tables.
pub fn kernel_init(boot_info: &BootInfoData) -> ! {
    // 1. CPU tables: GDT, TSS, IDT; legacy PICs masked.
    crate::arch::cpu_init();

    // 2. The HHDM offset, needed by everything that touches memory.
    hhdm::init(boot_info.hhdm_offset);

    // 3. Physical frame allocator.
    init_pmm(boot_info);

    // 4. Kernel heap (backed by contiguous frames via the HHDM).
    crate::mm::heap::init();

    // 5. Framebuffer console + the fan-out logger.
    if let Some(fb) = &boot_info.framebuffer {
        crate::drivers::fbcon::init(fb);
    }
    crate::logger::init();

    // 6. Capture the kernel PML4 for address-space creation and fault
    //    recovery.
    crate::proc::save_kernel_cr3();

    // 7. Fast-call path.
    // SAFETY: The GDT from step 1 has the documented selector layout.
    unsafe { crate::arch::x86_64::syscall::init() };

    // 8. Keyboard.
    crate::drivers::i8042::init();

    // 9. Filesystems.
    init_vfs(boot_info);

    // 10. The shell owns the machine from here. Interrupts can come on
    //     now: every unmasked source has a gate and the PICs are quiet.
    // SAFETY: IDT is live and the legacy PICs were masked in step 1.
    unsafe { crate::arch::x86_64::instructions::enable_interrupts() };
    crate::kinfo!("Muon initialized; starting shell");
    crate::shell::run()
}

/// Builds and installs the frame allocator from the boot memory map.
fn init_pmm(boot_info: &BootInfoData) {
    let mut regions = [PhysMemoryRegion {
        start: PhysAddr::zero(),
        size: 0,
        usable: false,
    }; MAX_MEMORY_REGIONS];

    for (slot, region) in regions.iter_mut().zip(boot_info.memory_map()) {
        *slot = PhysMemoryRegion {
            start: region.start,
            size: region.size,
            usable: region.kind == MemoryRegionKind::Usable,
        };
    }
    let regions = &regions[..boot_info.memory_region_count];

    let kernel_image = (boot_info.kernel_image.phys_base, boot_info.kernel_image.size);
    // SAFETY: The memory map comes straight from the bootloader and the
    // HHDM covers all of physical memory.
    let pmm = unsafe { BitmapFrameAllocator::new(regions, kernel_image, boot_info.hhdm_offset) }
        .expect("PMM: no usable memory");

    crate::kinfo!(
        "PMM: Initialization complete. Highest address: {:#x}",
        pmm.highest_address().as_u64()
    );
    crate::kinfo!(
        "PMM: {} MiB free of {} MiB tracked",
        pmm.free_frames() * 4 / 1024,
        pmm.total_frames() * 4 / 1024
    );
    pmm::install(pmm);
}

/// Mounts the root filesystem: the initramfs overlay, or an ext2 image
/// found inside it.
fn init_vfs(boot_info: &BootInfoData) {
    fs::vfs::init();

    let Some(module) = boot_info.module_by_name(INITRAMFS_NAME) else {
        crate::kwarn!("no {INITRAMFS_NAME} module; root is an empty overlay");
        fs::vfs::with_vfs_mut(|vfs| vfs.mount("/", Arc::new(fs::ramfs::RamFs::new())));
        return;
    };

    // Unpack the archive into the writable overlay.
    let overlay = fs::ramfs::RamFs::new();
    let names = fs::initramfs::unpack(module.data, &overlay.root());
    {
        // One line, names space-separated — the boot log's file manifest.
        use core::fmt::Write as _;
        let mut line = alloc::string::String::new();
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                let _ = write!(line, " ");
            }
            let _ = write!(line, "{name}");
        }
        crate::kinfo!("[initramfs: files: {line}]");
    }

    // An embedded ext2 image takes over as the root filesystem; the
    // overlay is dropped, exactly as if the tag had switched.
    if let Some((image_name, image_data)) = fs::initramfs::find_ext2_image(module.data) {
        match fs::ext2::Ext2Fs::mount(image_data) {
            Ok(ext2) => {
                crate::kinfo!("VFS: {image_name} is a valid ext2 image; using it as root");
                fs::vfs::with_vfs_mut(|vfs| vfs.mount("/", Arc::new(ext2)));
                return;
            }
            Err(err) => {
                crate::kwarn!("VFS: {image_name} found but not mountable: {err}");
            }
        }
    }

    fs::vfs::with_vfs_mut(|vfs| vfs.mount("/", Arc::new(overlay)));
}
