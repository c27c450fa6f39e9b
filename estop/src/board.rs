//! The hardware collaborators the core consumes.

/// Everything the coordination core needs from the board.
///
/// Methods take `&self`; implementations keep their peripherals behind interior mutability
/// (a `critical_section::Mutex` on target). The core serializes access to the actuator and to
/// the log sink through its resource guards, except for the fault hooks which may not suspend.
pub trait Board {
    /// Drive the actuator output.
    fn set_actuator(&self, on: bool);

    /// Write one line to the serial output channel. May block while the transport is congested.
    fn write_log(&self, line: &str);

    /// Current level of the emergency trigger line, `true` when asserted.
    fn trigger_asserted(&self) -> bool;

    /// Free heap memory in bytes.
    fn free_memory_bytes(&self) -> u32;

    /// Mask all interrupts so no task or handler can run any more. Must not return before
    /// preemption is off.
    fn mask_interrupts(&self);

    /// Stop the system for good: interrupts off, no further scheduling, wait for an external
    /// reset.
    fn halt(&self) -> !;
}
