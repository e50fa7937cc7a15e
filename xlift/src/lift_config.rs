//! A global store of flags that can impact lifting.
//!
//! WARNING: Currently only supports a single consistent configuration amongst threads (i.e., cannot
//! have different configurations for different function lifts in the same process).

/// The global configuration store. Its fields are expected to be accessed across the program via
/// the global [`CONFIG`](static@CONFIG).
pub struct LiftConfig {
    /// Recover `&p->field` (and `p->field` dereferences) from pointer-plus-constant expressions
    /// whose pointer targets a composite with a known field layout.
    pub recover_struct_fields_from_pointer_arithmetic: bool,
    /// Divide the addend of pointer-plus-constant arithmetic by the size of the pointee when it
    /// divides evenly, matching C pointer arithmetic.
    pub scale_pointer_arithmetic: bool,
    /// Introduce a fresh SSA variable for each `(register, definition site)`. If disabled, register
    /// definitions go to the plain register variable.
    pub introduce_ssa_registers: bool,
    /// Record the constant value assigned to an SSA variable when the right-hand side folds.
    pub record_ssa_constants: bool,
    /// Resolve register uses to the SSA variable of their (single) reaching definition.
    pub resolve_register_uses_via_reaching_defs: bool,
    /// Prefer the committed (narrowed) expressions over the plain results when they are present.
    pub use_committed_expressions: bool,
    /// Whether to print each decoded xdata record at debug level (useful when debugging)
    pub debug_print_decoded_xdata: bool,
    /// Register names that denote the stack pointer.
    pub stack_pointer_names: &'static [&'static str],
    /// Registers that carry a call's return value.
    pub return_value_registers: &'static [&'static str],
    /// Size of a pointer, in bytes, when no type says otherwise.
    pub default_pointer_size: u64,
}

impl LiftConfig {
    /// Internal method: sets up initialization
    #[allow(static_mut_refs)]
    fn from_initialized() -> Self {
        // Tests never go through `initialize`; they get the defaults. The initializer can only be
        // taken once, since `CONFIG` is only ever evaluated once.
        let init = unsafe { INTERNAL_CONFIG_INITIALIZER.take() };
        init.flatten().unwrap_or_default()
    }

    /// Initialize with the given command line configuration. Should only be called once, and should
    /// only be called from `main`.
    #[allow(static_mut_refs)]
    pub fn initialize(command_line_config: Vec<CommandLineLiftConfig>) {
        let prev = unsafe { INTERNAL_CONFIG_INITIALIZER.replace(Some(command_line_config.into())) };
        assert!(prev.is_some(), "Performed double initialization");
        lazy_static::initialize(&CONFIG);
    }

    /// Whether `name` is one of the stack pointer registers.
    pub fn is_stack_pointer(&self, name: &str) -> bool {
        self.stack_pointer_names.contains(&name)
    }

    pub fn is_return_value_register(&self, name: &str) -> bool {
        self.return_value_registers.contains(&name)
    }
}

/// Internal initialization detail.
static mut INTERNAL_CONFIG_INITIALIZER: Option<Option<LiftConfig>> = Some(None);

lazy_static::lazy_static! {
    /// The global configuration store
    pub static ref CONFIG: LiftConfig = LiftConfig::from_initialized();
}

#[derive(clap::ArgEnum, Clone, Debug)]
/// Lifting configuration parameters
pub enum CommandLineLiftConfig {
    DisableStructFieldRecovery,
    DisablePointerArithmeticScaling,
    DisableSSARegisterIntroduction,
    DisableSSAConstantRecording,
    DisableReachingDefRegisterResolution,
    DisableCommittedExpressions,
    EnableDebugPrintDecodedXData,
}

impl Default for LiftConfig {
    fn default() -> Self {
        LiftConfig {
            recover_struct_fields_from_pointer_arithmetic: true,
            scale_pointer_arithmetic: true,
            introduce_ssa_registers: true,
            record_ssa_constants: true,
            resolve_register_uses_via_reaching_defs: true,
            use_committed_expressions: true,
            debug_print_decoded_xdata: false,
            stack_pointer_names: &["sp", "esp", "rsp", "SP", "r13"],
            return_value_registers: &["R0", "S0", "eax", "rax", "v0"],
            default_pointer_size: 4,
        }
    }
}

impl From<Vec<CommandLineLiftConfig>> for LiftConfig {
    fn from(v: Vec<CommandLineLiftConfig>) -> Self {
        use CommandLineLiftConfig::*;
        let mut r = LiftConfig::default();
        for v in v {
            match v {
                DisableStructFieldRecovery => {
                    r.recover_struct_fields_from_pointer_arithmetic = false;
                }
                DisablePointerArithmeticScaling => {
                    r.scale_pointer_arithmetic = false;
                }
                DisableSSARegisterIntroduction => {
                    r.introduce_ssa_registers = false;
                }
                DisableSSAConstantRecording => {
                    r.record_ssa_constants = false;
                }
                DisableReachingDefRegisterResolution => {
                    r.resolve_register_uses_via_reaching_defs = false;
                }
                DisableCommittedExpressions => {
                    r.use_committed_expressions = false;
                }
                EnableDebugPrintDecodedXData => {
                    r.debug_print_decoded_xdata = true;
                }
            }
        }
        r
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_line_flags_override_defaults() {
        let c: LiftConfig = vec![
            CommandLineLiftConfig::DisableSSARegisterIntroduction,
            CommandLineLiftConfig::EnableDebugPrintDecodedXData,
        ]
        .into();
        assert!(!c.introduce_ssa_registers);
        assert!(c.debug_print_decoded_xdata);
        assert!(c.record_ssa_constants);
        assert!(c.is_stack_pointer("esp"));
        assert!(!c.is_stack_pointer("r0"));
    }
}
