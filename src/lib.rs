#![cfg_attr(not(feature = "std"), no_std)]
//! Stack-based execution engine for Bitcoin-style scripts.
//!
//! The crate has two cores: a byte-code interpreter that runs a flat script
//! against a main and an alt stack ([`Engine`]), and a wire-message codec
//! for length-prefixed p2p payloads ([`Alert`]). Execution is a pure compute
//! loop: no I/O, no global state, one engine per script. The engine promises
//! faithful execution and typed failures; whether a terminal stack counts as
//! "success" is the caller's judgement (conventionally "top is truthy",
//! which [`eval_script`] implements).

#[cfg(not(feature = "std"))]
extern crate alloc;

mod message;
mod script;

pub use message::{compact_size_len, Alert, Reader, WireMessage, COMMAND_SIZE};
pub use script::{
    cast_to_bool, decode_num, encode_num, is_minimally_encoded, DigestSignatureChecker, Engine,
    NoSignatureCheck, Script, ScriptError, ScriptStack, SignatureChecker, MAX_OPS_PER_SCRIPT,
    MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE, MAX_STACK_SIZE,
};

/// Do not enable any verification strictness.
pub const VERIFY_NONE: u32 = 0;
/// Require minimal encodings for pushdata and numeric operands.
pub const VERIFY_MINIMALDATA: u32 = 1 << 0;
/// Enforce strict DER signatures and well-formed public keys at OP_CHECKSIG.
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Require exactly one stack element after execution.
pub const VERIFY_CLEANSTACK: u32 = 1 << 2;
/// Fail scripts that execute the upgradable NOP1..NOP10 opcodes.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 3;

/// Aggregate of every supported verification flag.
pub const VERIFY_ALL: u32 =
    VERIFY_MINIMALDATA | VERIFY_STRICTENC | VERIFY_CLEANSTACK | VERIFY_DISCOURAGE_UPGRADABLE_NOPS;

/// Wrapper for script verification flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    /// Validates `bits` against the supported flag set.
    pub fn from_bits(bits: u32) -> Result<Self, ScriptError> {
        if bits & !VERIFY_ALL != 0 {
            return Err(ScriptError::InvalidFlags);
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn require_minimal_data(self) -> bool {
        self.0 & VERIFY_MINIMALDATA != 0
    }

    pub fn strict_encoding(self) -> bool {
        self.0 & VERIFY_STRICTENC != 0
    }

    pub fn require_clean_stack(self) -> bool {
        self.0 & VERIFY_CLEANSTACK != 0
    }

    pub fn discourage_upgradable_nops(self) -> bool {
        self.0 & VERIFY_DISCOURAGE_UPGRADABLE_NOPS != 0
    }
}

/// Executes `script` on a fresh engine and reports the conventional success
/// predicate: the terminal main stack is non-empty with a truthy top.
pub fn eval_script(script: &[u8], flags: u32) -> Result<bool, ScriptError> {
    eval_script_with_checker(script, flags, &NoSignatureCheck)
}

/// Same as [`eval_script`], with an externally supplied signature checker
/// for OP_CHECKSIG.
pub fn eval_script_with_checker(
    script: &[u8],
    flags: u32,
    checker: &dyn SignatureChecker,
) -> Result<bool, ScriptError> {
    let flags = ScriptFlags::from_bits(flags)?;
    let mut engine = Engine::with_checker(script, flags, checker)?;
    engine.execute()?;
    Ok(engine
        .stack()
        .last()
        .map(|top| cast_to_bool(top))
        .unwrap_or(false))
}
