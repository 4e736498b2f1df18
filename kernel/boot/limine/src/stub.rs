//! Boot path: request ingestion, page-table construction, CR3 switch,
//! and the jump into [`kernel_init`](muon_kernel::kernel_init).
//!
//! The bootloader's own page tables live in reclaimable memory, so the
//! stub builds kernel-owned tables before anything else can allocate.

use crate::requests::REQUESTS;

use muon_kernel::addr::{PhysAddr, VirtAddr};
use muon_kernel::boot::{
    BootInfoData, BootModule, FramebufferInfo, KernelImageInfo, MAX_MEMORY_REGIONS, MAX_MODULES,
    MemoryRegion, MemoryRegionKind,
};
use muon_kernel::drivers::uart16550::{COM1, Uart16550};
use muon_kernel::mm::mapper::PageTableMapper;
use muon_kernel::mm::paging::PageTableFlags;
use muon_kernel::{kdebug, kinfo};

unsafe extern "C" {
    static __text_start: u8;
    static __text_end: u8;
    static __rodata_start: u8;
    static __rodata_end: u8;
    static __data_start: u8;
    static __data_end: u8;
}

/// Bump allocator over the largest usable region, used only while the
/// stub builds page tables. The consumed tail is subtracted from the
/// region before the memory map is handed to the kernel.
struct BumpFrameAllocator {
    next: u64,
    limit: u64,
    hhdm_offset: u64,
    count: u64,
}

impl BumpFrameAllocator {
    fn new(region_start: u64, region_end: u64, hhdm_offset: u64) -> Self {
        Self {
            next: region_end,
            limit: region_start,
            hhdm_offset,
            count: 0,
        }
    }

    /// Hands out a zeroed 4 KiB frame from the top of the region.
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        if self.next < self.limit + 0x1000 {
            return None;
        }
        self.next -= 0x1000;
        self.count += 1;
        // SAFETY: The frame is usable RAM inside the bootloader's HHDM.
        unsafe {
            core::ptr::write_bytes((self.hhdm_offset + self.next) as *mut u8, 0, 0x1000);
        }
        Some(PhysAddr::new(self.next))
    }
}

/// Limine entry point.
#[unsafe(no_mangle)]
extern "C" fn _start() -> ! {
    let uart = Uart16550::new(COM1);
    // SAFETY: COM1 is the standard PC UART; this is the first access.
    unsafe { uart.init() };
    muon_kernel::logger::init_early_serial();

    assert!(
        REQUESTS.base_revision.is_supported(),
        "bootloader does not support the requested Limine revision"
    );

    if let Some(info) = REQUESTS.bootloader_info.response() {
        kinfo!("Muon booting via {} {}", info.name(), info.version());
    }

    let hhdm_offset = REQUESTS
        .hhdm
        .response()
        .expect("no HHDM response")
        .offset;
    let memmap = REQUESTS.memmap.response().expect("no memory map response");
    let exec_addr = REQUESTS
        .executable_address
        .response()
        .expect("no executable address response");

    let kernel_phys_base = PhysAddr::new(exec_addr.phys_base);
    let kernel_virt_base = VirtAddr::new(exec_addr.virt_base);

    // Seed the bump allocator from the largest usable region.
    let mut largest_start = 0u64;
    let mut largest_size = 0u64;
    for entry in memmap.entries() {
        if entry.kind == limine::memmap::EntryKind::Usable && entry.length > largest_size {
            largest_start = entry.base;
            largest_size = entry.length;
        }
    }
    assert!(largest_size >= 0x10_0000, "no usable region for page tables");
    let mut alloc =
        BumpFrameAllocator::new(largest_start, largest_start + largest_size, hhdm_offset);

    let framebuffer = convert_framebuffer();

    // Kernel-owned page tables, then the switch.
    let pml4_phys = build_page_tables(
        hhdm_offset,
        memmap,
        kernel_phys_base,
        kernel_virt_base,
        &mut alloc,
    );
    kdebug!(
        "page tables built: PML4 at {pml4_phys}, {} frames used",
        alloc.count
    );

    // SAFETY: NXE/PGE/WP are prerequisites for the mappings just built.
    unsafe { set_cpu_control_bits() };
    // SAFETY: The new tables map the kernel image, the HHDM, and the
    // framebuffer; execution continues seamlessly after the switch.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) pml4_phys.as_u64(), options(nostack, preserves_flags));
    }
    kdebug!("CR3 switched to kernel-owned page tables");

    let boot_info = build_boot_info(
        hhdm_offset,
        kernel_phys_base,
        kernel_virt_base,
        framebuffer,
        largest_start,
        largest_size,
        alloc.count,
    );

    muon_kernel::kernel_init(&boot_info)
}

/// Builds the kernel's page tables: the HHDM as 2 MiB pages, the kernel
/// image sections with precise W^X, and an identity mapping of the
/// first 2 MiB to survive the CR3 switch.
fn build_page_tables(
    hhdm_offset: u64,
    memmap: &limine::MemMapResponse,
    kernel_phys_base: PhysAddr,
    kernel_virt_base: VirtAddr,
    alloc: &mut BumpFrameAllocator,
) -> PhysAddr {
    let mapper = PageTableMapper::new(hhdm_offset);
    let pml4_phys = alloc.alloc_frame().expect("PML4 frame");

    // The HHDM covers every mapped region, framebuffer included.
    let mut max_phys = 0u64;
    for entry in memmap.entries() {
        max_phys = max_phys.max(entry.base + entry.length);
    }
    let max_phys = (max_phys + 0x1F_FFFF) & !0x1F_FFFF;
    kdebug!(
        "mapping HHDM: {} MiB of physical address space",
        max_phys / (1024 * 1024)
    );

    let hhdm_flags = PageTableFlags::PRESENT
        | PageTableFlags::WRITABLE
        | PageTableFlags::GLOBAL
        | PageTableFlags::NO_EXECUTE;
    let mut phys = 0u64;
    while phys < max_phys {
        let virt = VirtAddr::new_truncate(hhdm_offset + phys);
        // SAFETY: Fresh tables; 2 MiB-aligned physical addresses.
        unsafe {
            mapper
                .map_2mib(pml4_phys, virt, PhysAddr::new(phys), hhdm_flags, &mut || {
                    alloc.alloc_frame()
                })
                .expect("out of page-table frames");
        }
        phys += 0x20_0000;
    }

    // Kernel image sections, 4 KiB pages for exact permissions.
    let text_flags = PageTableFlags::PRESENT | PageTableFlags::GLOBAL;
    let rodata_flags =
        PageTableFlags::PRESENT | PageTableFlags::GLOBAL | PageTableFlags::NO_EXECUTE;
    let data_flags = PageTableFlags::PRESENT
        | PageTableFlags::WRITABLE
        | PageTableFlags::GLOBAL
        | PageTableFlags::NO_EXECUTE;

    let section = |start: &u8, end: &u8| {
        (
            VirtAddr::new(core::ptr::from_ref(start) as u64),
            VirtAddr::new(core::ptr::from_ref(end) as u64),
        )
    };
    // SAFETY: The linker-script symbols delimit the image sections.
    let (text_start, text_end) = unsafe { section(&__text_start, &__text_end) };
    let (rodata_start, rodata_end) = unsafe { section(&__rodata_start, &__rodata_end) };
    let (data_start, data_end) = unsafe { section(&__data_start, &__data_end) };

    map_kernel_range(&mapper, pml4_phys, text_start, text_end, kernel_phys_base, kernel_virt_base, text_flags, alloc);
    map_kernel_range(&mapper, pml4_phys, rodata_start, rodata_end, kernel_phys_base, kernel_virt_base, rodata_flags, alloc);
    map_kernel_range(&mapper, pml4_phys, data_start, data_end, kernel_phys_base, kernel_virt_base, data_flags, alloc);

    // Identity-map the first 2 MiB for the instant of the CR3 switch.
    // SAFETY: Fresh tables; the low 2 MiB are never handed to user code.
    unsafe {
        mapper
            .map_2mib(
                pml4_phys,
                VirtAddr::zero(),
                PhysAddr::zero(),
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE,
                &mut || alloc.alloc_frame(),
            )
            .expect("out of page-table frames");
    }

    pml4_phys
}

/// Maps one kernel image section with 4 KiB pages.
#[expect(clippy::too_many_arguments, reason = "boot-time plumbing")]
fn map_kernel_range(
    mapper: &PageTableMapper,
    pml4_phys: PhysAddr,
    virt_start: VirtAddr,
    virt_end: VirtAddr,
    kernel_phys_base: PhysAddr,
    kernel_virt_base: VirtAddr,
    flags: PageTableFlags,
    alloc: &mut BumpFrameAllocator,
) {
    let mut virt = virt_start.align_down(0x1000).as_u64();
    let end = virt_end.align_up(0x1000).as_u64();
    while virt < end {
        let phys =
            PhysAddr::new(virt - kernel_virt_base.as_u64() + kernel_phys_base.as_u64());
        // SAFETY: Fresh tables; the mapping mirrors the bootloader's.
        unsafe {
            mapper
                .map_4k(pml4_phys, VirtAddr::new(virt), phys, flags, &mut || {
                    alloc.alloc_frame()
                })
                .expect("out of page-table frames");
        }
        virt += 0x1000;
    }
}

/// Sets EFER.NXE, CR4.PGE, and CR0.WP.
unsafe fn set_cpu_control_bits() {
    // SAFETY: Standard control-bit programming, before the CR3 switch.
    unsafe {
        core::arch::asm!(
            "mov ecx, 0xC0000080",
            "rdmsr",
            "or eax, (1 << 11)", // NXE
            "wrmsr",
            out("ecx") _, out("eax") _, out("edx") _,
            options(nomem, nostack),
        );
        core::arch::asm!(
            "mov {tmp}, cr4",
            "or {tmp}, (1 << 7)", // PGE
            "mov cr4, {tmp}",
            tmp = out(reg) _,
            options(nomem, nostack),
        );
        core::arch::asm!(
            "mov {tmp}, cr0",
            "or {tmp}, (1 << 16)", // WP
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            options(nomem, nostack),
        );
    }
}

/// Converts the first Limine framebuffer, if any.
fn convert_framebuffer() -> Option<FramebufferInfo> {
    let response = REQUESTS.framebuffer.response()?;
    let fb = response.framebuffers().next()?;
    Some(FramebufferInfo {
        address: VirtAddr::new(fb.address.as_ptr() as u64),
        width: fb.width as u32,
        height: fb.height as u32,
        pitch: fb.pitch as u32,
        bpp: fb.bpp as u8,
    })
}

/// Assembles [`BootInfoData`] from the Limine responses.
fn build_boot_info(
    hhdm_offset: u64,
    kernel_phys_base: PhysAddr,
    kernel_virt_base: VirtAddr,
    framebuffer: Option<FramebufferInfo>,
    alloc_region_start: u64,
    alloc_region_size: u64,
    frames_used: u64,
) -> BootInfoData {
    let memmap = REQUESTS.memmap.response().expect("no memory map response");

    let mut memory_map = [MemoryRegion {
        start: PhysAddr::zero(),
        size: 0,
        kind: MemoryRegionKind::Reserved,
    }; MAX_MEMORY_REGIONS];
    let mut count = 0;

    for entry in memmap.entries() {
        if count >= MAX_MEMORY_REGIONS {
            break;
        }
        let mut size = entry.length;
        // The frames the stub consumed for page tables came off the top
        // of this region; the kernel must never treat them as free.
        if entry.kind == limine::memmap::EntryKind::Usable
            && entry.base == alloc_region_start
            && entry.length == alloc_region_size
        {
            size -= frames_used * 0x1000;
        }
        memory_map[count] = MemoryRegion {
            start: PhysAddr::new(entry.base),
            size,
            kind: convert_memory_kind(entry.kind),
        };
        count += 1;
    }

    // Kernel image size: text start through data end.
    // SAFETY: Linker-script symbols.
    let image_size = unsafe {
        core::ptr::from_ref(&__data_end) as u64 - core::ptr::from_ref(&__text_start) as u64
    };

    let mut modules = [const { None }; MAX_MODULES];
    let mut module_count = 0;
    if let Some(response) = REQUESTS.modules.response() {
        for file in response.modules() {
            if module_count >= MAX_MODULES {
                break;
            }
            kinfo!("boot module: {} ({} bytes)", file.path(), file.size);
            modules[module_count] = Some(BootModule {
                path: file.path(),
                data: file.data(),
            });
            module_count += 1;
        }
    }

    BootInfoData {
        memory_map,
        memory_region_count: count,
        hhdm_offset,
        kernel_image: KernelImageInfo {
            phys_base: kernel_phys_base,
            virt_base: kernel_virt_base,
            size: image_size,
        },
        framebuffer,
        modules,
        module_count,
    }
}

fn convert_memory_kind(kind: limine::memmap::EntryKind) -> MemoryRegionKind {
    use limine::memmap::EntryKind;
    match kind {
        EntryKind::Usable => MemoryRegionKind::Usable,
        EntryKind::Reserved => MemoryRegionKind::Reserved,
        EntryKind::AcpiReclaimable | EntryKind::AcpiNvs => MemoryRegionKind::Acpi,
        EntryKind::BadMemory => MemoryRegionKind::BadMemory,
        EntryKind::BootloaderReclaimable => MemoryRegionKind::BootloaderReclaimable,
        EntryKind::ExecutableAndModules => MemoryRegionKind::KernelAndModules,
        EntryKind::Framebuffer => MemoryRegionKind::Framebuffer,
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    muon_kernel::logger::panic_serial(info);
    loop {
        core::hint::spin_loop();
    }
}
