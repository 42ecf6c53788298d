/// Resource limits shared by the compiler and the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of nested call frames.
    pub control_stack_size: usize,
    /// Number of value slots shared by all frames of one interpreter.
    pub locals_buffer_size: usize,
    /// Register file limit of a single compiled function.
    pub max_slot_count: usize,
}

impl Config {
    pub const DEFAULT_CONTROL_STACK_SIZE: usize = 256;
    pub const DEFAULT_LOCALS_BUFFER_SIZE: usize = 4096 * 256;
    pub const DEFAULT_MAX_SLOT_COUNT: usize = 4096;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_stack_size: Self::DEFAULT_CONTROL_STACK_SIZE,
            locals_buffer_size: Self::DEFAULT_LOCALS_BUFFER_SIZE,
            max_slot_count: Self::DEFAULT_MAX_SLOT_COUNT,
        }
    }
}
