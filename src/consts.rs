//! Internal constants, physical addresses, register offsets and default paths.

// --- AM335x GPIO controllers ---
/// Physical base address of each GPIO controller, indexed by bank.
pub const GPIO_BANK_ADDRESSES: [u64; BANK_COUNT] = [
    0x44E0_7000, // GPIO0 (wakeup domain)
    0x4804_C000, // GPIO1
    0x481A_C000, // GPIO2
    0x481A_E000, // GPIO3
];
/// Number of GPIO controllers (banks) on the SoC.
pub const BANK_COUNT: usize = 4;
/// Pins per bank, one per bit of a 32-bit register.
pub const PINS_PER_BANK: u8 = 32;
/// Total number of pins addressable through the bank map.
pub const PIN_COUNT: u8 = 128;
/// Size of one mapped register page.
pub const GPIO_PAGE_SIZE: usize = 0x1000; // 4KiB

// --- Per-bank register sub-offsets (AM335x TRM, GPIO module) ---
pub mod reg {
    /// Output enable: bit set = input, bit clear = output.
    pub const OUTPUT_ENABLE: usize = 0x134;
    pub const DATA_IN: usize = 0x138;
    pub const DATA_OUT: usize = 0x13C;
    pub const DEBOUNCE_ENABLE: usize = 0x150;
    pub const DEBOUNCE_TIME: usize = 0x154;
    /// Writing 1 clears the matching DATA_OUT bit, 0 is a no-op.
    pub const CLEAR_DATA_OUT: usize = 0x190;
    /// Writing 1 sets the matching DATA_OUT bit, 0 is a no-op.
    pub const SET_DATA_OUT: usize = 0x194;
}

// --- Hardware identification ---
/// Prefix the device tree `compatible` string of every bank must start with.
pub const COMPATIBLE_PREFIX: &[u8] = b"ti,omap4-gpio";
/// Number of bytes read from a `compatible` file.
pub const COMPATIBLE_READ_LEN: usize = 32;

// --- Debounce timing ---
/// One DEBOUNCINGTIME step in microseconds; register value n means (n + 1) steps.
pub const DEBOUNCE_UNIT_US: f64 = 31.0;
pub const DEBOUNCE_MAX_UNITS: u32 = 255;

// --- Default filesystem locations ---
pub const DEFAULT_MEM_DEVICE: &str = "/dev/mem";
pub const DEFAULT_DEVICE_TREE_ROOT: &str = "/proc/device-tree/ocp";
pub const DEFAULT_SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_SYSFS_OCP_ROOT: &str = "/sys/devices/platform/ocp";
