//! Script interpreter.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};
#[cfg(feature = "std")]
use std::sync::OnceLock;
#[cfg(feature = "std")]
use std::vec::Vec;

use core::fmt;

use bitcoin::hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};
use bitcoin::opcodes::{all, Opcode};
use bitcoin::secp256k1::{self, ecdsa::Signature as EcdsaSignature, Message, PublicKey, Secp256k1};

use crate::ScriptFlags;

/// Failure kinds surfaced by the interpreter and the wire codec.
///
/// Every failure unwinds to the caller; nothing is recovered locally.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The program counter ran past the end of the script.
    ScriptTooShort,
    /// A wire-format reader hit end-of-input mid-field.
    Truncated,
    /// A pop or peek reached below the bottom of a stack.
    StackUnderflow,
    /// An element larger than [`MAX_SCRIPT_ELEMENT_SIZE`] was pushed.
    ElementTooLarge,
    /// A numeric operand was over four bytes, negative where a count was
    /// expected, or non-minimal under `VERIFY_MINIMALDATA`.
    InvalidNumber,
    /// The OP_VERIFY family saw a false top element.
    VerifyFailed,
    /// OP_RETURN executed. Terminal, but the stacks remain inspectable.
    EarlyReturn,
    /// Dispatch hit a byte with no defined behaviour.
    UnknownOpcode,
    /// Dispatch hit an explicitly reserved byte.
    ReservedOpcode,
    /// A push used a longer encoding than necessary under `VERIFY_MINIMALDATA`.
    MinimalEncoding,
    /// The allocator refused to grow a stack or codec buffer.
    OutOfMemory,
    /// The input script exceeds [`MAX_SCRIPT_SIZE`].
    ScriptTooLarge,
    /// Main and alt stack together exceed [`MAX_STACK_SIZE`] elements.
    StackOverflow,
    /// More than [`MAX_OPS_PER_SCRIPT`] non-push opcodes executed.
    TooManyOps,
    /// IF/ELSE/ENDIF nesting did not balance.
    UnbalancedConditional,
    /// `VERIFY_CLEANSTACK` was set and the terminal stack depth is not one.
    CleanStackRequired,
    /// `VERIFY_STRICTENC` was set and a signature push is not strict DER.
    SignatureEncoding,
    /// `VERIFY_STRICTENC` was set and a public key push is malformed.
    PubkeyEncoding,
    /// `VERIFY_DISCOURAGE_UPGRADABLE_NOPS` was set and NOP1..NOP10 executed.
    DiscouragedNop,
    /// Unknown bits were passed to [`ScriptFlags::from_bits`].
    InvalidFlags,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ScriptError::*;

        let description = match *self {
            ScriptTooShort => "script ended inside an instruction",
            Truncated => "input ended mid-field",
            StackUnderflow => "stack operation reached below the stack bottom",
            ElementTooLarge => "pushed element exceeds the 520 byte bound",
            InvalidNumber => "numeric operand is out of range or badly encoded",
            VerifyFailed => "verify saw a false top element",
            EarlyReturn => "op_return terminated the script",
            UnknownOpcode => "undefined opcode",
            ReservedOpcode => "reserved opcode",
            MinimalEncoding => "push is not minimally encoded",
            OutOfMemory => "allocation failed",
            ScriptTooLarge => "script exceeds the 10000 byte bound",
            StackOverflow => "combined stack depth exceeds 1000 elements",
            TooManyOps => "executed opcode budget exhausted",
            UnbalancedConditional => "if/else/endif nesting does not balance",
            CleanStackRequired => "terminal stack is not a single element",
            SignatureEncoding => "signature is not strictly encoded",
            PubkeyEncoding => "public key is not strictly encoded",
            DiscouragedNop => "upgradable nop executed",
            InvalidFlags => "unknown verification flag bits",
        };

        f.write_str(description)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScriptError {}

/// Largest accepted input script, in bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Largest stack element, in bytes.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Largest combined depth of the main and alt stacks.
pub const MAX_STACK_SIZE: usize = 1000;
/// Budget of executed non-push opcodes per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

const SCRIPTNUM_MAX_LEN: usize = 4;

#[cfg(feature = "std")]
static SECP256K1: OnceLock<Secp256k1<secp256k1::VerifyOnly>> = OnceLock::new();

fn with_verification_ctx<R>(f: impl FnOnce(&Secp256k1<secp256k1::VerifyOnly>) -> R) -> R {
    #[cfg(feature = "std")]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
    #[cfg(not(feature = "std"))]
    {
        let ctx = Secp256k1::verification_only();
        f(&ctx)
    }
}

/// Immutable view of a script's byte stream.
#[derive(Debug, Copy, Clone)]
pub struct Script<'a> {
    bytes: &'a [u8],
}

impl<'a> Script<'a> {
    /// Wraps `bytes`, rejecting inputs over [`MAX_SCRIPT_SIZE`].
    pub fn new(bytes: &'a [u8]) -> Result<Self, ScriptError> {
        if bytes.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptTooLarge);
        }
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns the byte at `index`, or [`ScriptError::ScriptTooShort`].
    pub fn byte_at(&self, index: usize) -> Result<u8, ScriptError> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(ScriptError::ScriptTooShort)
    }

    /// Borrows `len` bytes starting at `start`, failing with
    /// [`ScriptError::ScriptTooShort`] when the range leaves the script.
    pub fn slice(&self, start: usize, len: usize) -> Result<&'a [u8], ScriptError> {
        let end = start.checked_add(len).ok_or(ScriptError::ScriptTooShort)?;
        if end > self.bytes.len() {
            return Err(ScriptError::ScriptTooShort);
        }
        Ok(&self.bytes[start..end])
    }
}

/// LIFO stack of owned byte-array elements.
///
/// Elements have two views: raw bytes, and the signed little-endian
/// sign-magnitude number decoded by [`decode_num`]. Every element obeys the
/// [`MAX_SCRIPT_ELEMENT_SIZE`] bound.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScriptStack {
    items: Vec<Vec<u8>>,
}

impl ScriptStack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Appends `data` as the new top element.
    pub fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::ElementTooLarge);
        }
        self.items
            .try_reserve(1)
            .map_err(|_| ScriptError::OutOfMemory)?;
        self.items.push(data);
        Ok(())
    }

    /// Pushes the canonical boolean encoding: `[0x01]` or the empty element.
    pub fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        if value {
            self.push(vec![1])
        } else {
            self.push(Vec::new())
        }
    }

    /// Pushes the minimal encoding of `value`.
    pub fn push_int(&mut self, value: i64) -> Result<(), ScriptError> {
        self.push(encode_num(value))
    }

    /// Removes and returns the top element.
    pub fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::StackUnderflow)
    }

    /// Pops the top element and decodes it as a four-byte-bounded number.
    pub fn pop_int(&mut self, require_minimal: bool) -> Result<i64, ScriptError> {
        let bytes = self.pop()?;
        parse_scriptnum(&bytes, require_minimal, SCRIPTNUM_MAX_LEN)
    }

    /// Borrows the element `depth` positions from the top (0 is the top).
    pub fn peek(&self, depth: usize) -> Result<&[u8], ScriptError> {
        if depth >= self.items.len() {
            return Err(ScriptError::StackUnderflow);
        }
        Ok(&self.items[self.items.len() - 1 - depth])
    }

    /// Removes and returns the element `depth` positions from the top,
    /// shifting shallower elements down.
    pub fn pop_nth(&mut self, depth: usize) -> Result<Vec<u8>, ScriptError> {
        if depth >= self.items.len() {
            return Err(ScriptError::StackUnderflow);
        }
        let index = self.items.len() - 1 - depth;
        Ok(self.items.remove(index))
    }

    /// Exchanges the elements `a` and `b` positions from the top.
    fn swap(&mut self, a: usize, b: usize) -> Result<(), ScriptError> {
        let len = self.items.len();
        if a >= len || b >= len {
            return Err(ScriptError::StackUnderflow);
        }
        self.items.swap(len - 1 - a, len - 1 - b);
        Ok(())
    }

    /// Inserts `data` below the `depth` shallowest elements.
    fn insert(&mut self, depth: usize, data: Vec<u8>) -> Result<(), ScriptError> {
        if depth > self.items.len() {
            return Err(ScriptError::StackUnderflow);
        }
        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::ElementTooLarge);
        }
        self.items
            .try_reserve(1)
            .map_err(|_| ScriptError::OutOfMemory)?;
        let index = self.items.len() - depth;
        self.items.insert(index, data);
        Ok(())
    }

    pub fn last(&self) -> Option<&Vec<u8>> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The elements bottom-first, for post-execution inspection.
    pub fn cells(&self) -> &[Vec<u8>] {
        &self.items
    }
}

/// External judgement of an OP_CHECKSIG signature.
///
/// The engine hands over the raw signature and public key pushes exactly as
/// they appeared on the stack; how the message digest is obtained is the
/// implementor's concern.
pub trait SignatureChecker {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> Result<bool, ScriptError>;
}

/// Rejects every signature. The default checker for contexts with no
/// transaction, mirroring Bitcoin Core's base checker.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoSignatureCheck;

impl SignatureChecker for NoSignatureCheck {
    fn check_signature(&self, _signature: &[u8], _pubkey: &[u8]) -> Result<bool, ScriptError> {
        Ok(false)
    }
}

static NO_SIGNATURE_CHECK: NoSignatureCheck = NoSignatureCheck;

/// Verifies ECDSA signatures against a precomputed 32-byte message digest.
///
/// The trailing sighash-type byte of the signature push is stripped before
/// DER parsing; parse failures count as an invalid signature, not an error.
#[derive(Debug, Copy, Clone)]
pub struct DigestSignatureChecker {
    digest: [u8; 32],
}

impl DigestSignatureChecker {
    pub fn new(digest: [u8; 32]) -> Self {
        Self { digest }
    }
}

impl SignatureChecker for DigestSignatureChecker {
    fn check_signature(&self, signature: &[u8], pubkey: &[u8]) -> Result<bool, ScriptError> {
        if signature.len() < 2 {
            return Ok(false);
        }
        let der_bytes = &signature[..signature.len() - 1];
        let Ok(signature) = EcdsaSignature::from_der(der_bytes) else {
            return Ok(false);
        };
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return Ok(false);
        };
        let mut normalized = signature;
        normalized.normalize_s();
        let message = Message::from_digest(self.digest);
        let valid =
            with_verification_ctx(|secp| secp.verify_ecdsa(&message, &normalized, &pubkey).is_ok());
        Ok(valid)
    }
}

/// Byte-code interpreter over a main and an alt stack.
///
/// [`Engine::execute`] drives the fetch-decode-execute loop to termination;
/// hosts that need an external step or time budget call [`Engine::step`]
/// directly and finish with [`Engine::finish`]. Both stacks stay inspectable
/// after a failure, which is how OP_RETURN's preserved stack state is
/// observed.
pub struct Engine<'a> {
    script: Script<'a>,
    pc: usize,
    steps: u64,
    stack: ScriptStack,
    altstack: ScriptStack,
    exec_stack: Vec<bool>,
    flags: ScriptFlags,
    op_count: usize,
    checker: &'a dyn SignatureChecker,
}

impl<'a> core::fmt::Debug for Engine<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("script", &self.script)
            .field("pc", &self.pc)
            .field("steps", &self.steps)
            .field("stack", &self.stack)
            .field("altstack", &self.altstack)
            .field("exec_stack", &self.exec_stack)
            .field("flags", &self.flags)
            .field("op_count", &self.op_count)
            .finish_non_exhaustive()
    }
}

impl<'a> Engine<'a> {
    pub fn new(script: &'a [u8], flags: ScriptFlags) -> Result<Self, ScriptError> {
        Self::with_checker(script, flags, &NO_SIGNATURE_CHECK)
    }

    pub fn with_checker(
        script: &'a [u8],
        flags: ScriptFlags,
        checker: &'a dyn SignatureChecker,
    ) -> Result<Self, ScriptError> {
        Ok(Self {
            script: Script::new(script)?,
            pc: 0,
            steps: 0,
            stack: ScriptStack::new(),
            altstack: ScriptStack::new(),
            exec_stack: Vec::new(),
            flags,
            op_count: 0,
            checker,
        })
    }

    /// Runs the script to termination and applies the terminal checks.
    pub fn execute(&mut self) -> Result<(), ScriptError> {
        while self.step()? {}
        self.finish()
    }

    /// Executes one instruction. Returns `Ok(false)` at end-of-script.
    pub fn step(&mut self) -> Result<bool, ScriptError> {
        if self.pc >= self.script.len() {
            return Ok(false);
        }
        let opcode = self.script.byte_at(self.pc)?;
        self.pc += 1;
        self.steps += 1;
        let executing = self.exec_stack.iter().all(|&branch| branch);

        if (0x01..=0x4b).contains(&opcode) {
            let push_len = opcode as usize;
            let data = self.script.slice(self.pc, push_len)?;
            self.pc += push_len;
            if executing {
                self.push_data(opcode, data)?;
            }
        } else if opcode == all::OP_PUSHDATA1.to_u8()
            || opcode == all::OP_PUSHDATA2.to_u8()
            || opcode == all::OP_PUSHDATA4.to_u8()
        {
            let width = match opcode {
                x if x == all::OP_PUSHDATA1.to_u8() => 1,
                x if x == all::OP_PUSHDATA2.to_u8() => 2,
                _ => 4,
            };
            let push_len = self.read_push_length(width)?;
            if push_len > MAX_SCRIPT_ELEMENT_SIZE {
                return Err(ScriptError::ElementTooLarge);
            }
            let data = self.script.slice(self.pc, push_len)?;
            self.pc += push_len;
            if executing {
                self.push_data(opcode, data)?;
            }
        } else {
            let op = Opcode::from(opcode);
            if matches!(op, all::OP_VERIF | all::OP_VERNOTIF) {
                return Err(ScriptError::ReservedOpcode);
            }
            if opcode > all::OP_PUSHNUM_16.to_u8() {
                self.add_ops(1)?;
            }
            if is_control_flow(op) {
                self.handle_control_flow(op, executing)?;
            } else if executing {
                self.execute_opcode(op)?;
            }
        }

        self.ensure_stack_limit()?;
        Ok(true)
    }

    /// Terminal checks once the loop reaches end-of-script.
    pub fn finish(&self) -> Result<(), ScriptError> {
        if !self.exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        if self.flags.require_clean_stack() && self.stack.len() != 1 {
            return Err(ScriptError::CleanStackRequired);
        }
        Ok(())
    }

    pub fn stack(&self) -> &ScriptStack {
        &self.stack
    }

    pub fn altstack(&self) -> &ScriptStack {
        &self.altstack
    }

    /// Current program counter, in `[0, script.len()]`.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Instructions executed so far. Monotone; hosts bounding execution poll
    /// this between [`Engine::step`] calls.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn push_data(&mut self, opcode: u8, data: &[u8]) -> Result<(), ScriptError> {
        if self.flags.require_minimal_data() && !is_minimal_push(opcode, data) {
            return Err(ScriptError::MinimalEncoding);
        }
        self.stack.push(data.to_vec())
    }

    fn read_push_length(&mut self, width: usize) -> Result<usize, ScriptError> {
        let bytes = self.script.slice(self.pc, width)?;
        self.pc += width;
        let mut len = 0usize;
        for (i, &byte) in bytes.iter().enumerate() {
            len |= (byte as usize) << (8 * i);
        }
        Ok(len)
    }

    fn add_ops(&mut self, count: usize) -> Result<(), ScriptError> {
        self.op_count += count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            Err(ScriptError::TooManyOps)
        } else {
            Ok(())
        }
    }

    fn ensure_stack_limit(&self) -> Result<(), ScriptError> {
        if self.stack.len() + self.altstack.len() > MAX_STACK_SIZE {
            Err(ScriptError::StackOverflow)
        } else {
            Ok(())
        }
    }

    fn handle_control_flow(&mut self, op: Opcode, executing: bool) -> Result<(), ScriptError> {
        use all::*;

        match op {
            OP_IF | OP_NOTIF => {
                let mut value = false;
                if executing {
                    let condition = self
                        .stack
                        .pop()
                        .map_err(|_| ScriptError::UnbalancedConditional)?;
                    value = cast_to_bool(&condition);
                    if op == OP_NOTIF {
                        value = !value;
                    }
                }
                self.exec_stack.push(value);
            }
            OP_ELSE => {
                let Some(top) = self.exec_stack.last_mut() else {
                    return Err(ScriptError::UnbalancedConditional);
                };
                *top = !*top;
            }
            OP_ENDIF => {
                if self.exec_stack.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn execute_opcode(&mut self, op: Opcode) -> Result<(), ScriptError> {
        use all::*;

        let opcode = op.to_u8();
        let require_minimal = self.flags.require_minimal_data();

        if matches!(op, OP_RESERVED | OP_VER | OP_RESERVED1 | OP_RESERVED2) {
            return Err(ScriptError::ReservedOpcode);
        }

        if opcode == OP_PUSHBYTES_0.to_u8() {
            return self.stack.push(Vec::new());
        }
        if opcode >= OP_PUSHNUM_1.to_u8() && opcode <= OP_PUSHNUM_16.to_u8() {
            let value = (opcode - OP_PUSHNUM_1.to_u8() + 1) as i64;
            return self.stack.push_int(value);
        }

        match op {
            OP_NOP => {}
            OP_NOP1 | OP_CLTV | OP_CSV | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8
            | OP_NOP9 | OP_NOP10 => {
                if self.flags.discourage_upgradable_nops() {
                    return Err(ScriptError::DiscouragedNop);
                }
            }
            OP_PUSHNUM_NEG1 => {
                self.stack.push_int(-1)?;
            }
            OP_TOALTSTACK => {
                let cell = self.stack.pop()?;
                self.altstack.push(cell)?;
            }
            OP_FROMALTSTACK => {
                let cell = self.altstack.pop()?;
                self.stack.push(cell)?;
            }
            OP_IFDUP => {
                let duplicate = {
                    let top = self.stack.peek(0)?;
                    if cast_to_bool(top) {
                        Some(top.to_vec())
                    } else {
                        None
                    }
                };
                if let Some(cell) = duplicate {
                    self.stack.push(cell)?;
                }
            }
            OP_DEPTH => {
                let depth = self.stack.len() as i64;
                self.stack.push_int(depth)?;
            }
            OP_DROP => {
                self.stack.pop()?;
            }
            OP_DUP => {
                let top = self.stack.peek(0)?.to_vec();
                self.stack.push(top)?;
            }
            OP_NIP => {
                self.stack.pop_nth(1)?;
            }
            OP_OVER => {
                let cell = self.stack.peek(1)?.to_vec();
                self.stack.push(cell)?;
            }
            OP_PICK | OP_ROLL => {
                let depth = self.stack.pop_int(require_minimal)?;
                if depth < 0 {
                    return Err(ScriptError::InvalidNumber);
                }
                let depth = depth as usize;
                if op == OP_PICK {
                    let cell = self.stack.peek(depth)?.to_vec();
                    self.stack.push(cell)?;
                } else {
                    let cell = self.stack.pop_nth(depth)?;
                    self.stack.push(cell)?;
                }
            }
            OP_ROT => {
                self.stack.swap(2, 1)?;
                self.stack.swap(1, 0)?;
            }
            OP_SWAP => {
                self.stack.swap(1, 0)?;
            }
            OP_TUCK => {
                let top = self.stack.peek(0)?.to_vec();
                self.stack.insert(2, top)?;
            }
            OP_2DROP => {
                if self.stack.len() < 2 {
                    return Err(ScriptError::StackUnderflow);
                }
                self.stack.pop()?;
                self.stack.pop()?;
            }
            OP_2DUP => {
                let first = self.stack.peek(1)?.to_vec();
                let second = self.stack.peek(0)?.to_vec();
                self.stack.push(first)?;
                self.stack.push(second)?;
            }
            OP_3DUP => {
                let first = self.stack.peek(2)?.to_vec();
                let second = self.stack.peek(1)?.to_vec();
                let third = self.stack.peek(0)?.to_vec();
                self.stack.push(first)?;
                self.stack.push(second)?;
                self.stack.push(third)?;
            }
            OP_2OVER => {
                let first = self.stack.peek(3)?.to_vec();
                let second = self.stack.peek(2)?.to_vec();
                self.stack.push(first)?;
                self.stack.push(second)?;
            }
            OP_2ROT => {
                if self.stack.len() < 6 {
                    return Err(ScriptError::StackUnderflow);
                }
                let first = self.stack.pop_nth(5)?;
                let second = self.stack.pop_nth(4)?;
                self.stack.push(first)?;
                self.stack.push(second)?;
            }
            OP_2SWAP => {
                self.stack.swap(3, 1)?;
                self.stack.swap(2, 0)?;
            }
            OP_SIZE => {
                let size = self.stack.peek(0)?.len() as i64;
                self.stack.push_int(size)?;
            }
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let mut num = self.stack.pop_int(require_minimal)?;
                match op {
                    OP_1ADD => num += 1,
                    OP_1SUB => num -= 1,
                    OP_NEGATE => num = -num,
                    OP_ABS => {
                        if num < 0 {
                            num = -num;
                        }
                    }
                    OP_NOT => num = if num == 0 { 1 } else { 0 },
                    OP_0NOTEQUAL => num = if num != 0 { 1 } else { 0 },
                    _ => {}
                }
                self.stack.push_int(num)?;
            }
            OP_ADD
            | OP_SUB
            | OP_BOOLAND
            | OP_BOOLOR
            | OP_NUMEQUAL
            | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL
            | OP_LESSTHAN
            | OP_GREATERTHAN
            | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL
            | OP_MIN
            | OP_MAX => {
                let b = self.stack.pop_int(require_minimal)?;
                let a = self.stack.pop_int(require_minimal)?;
                let result = match op {
                    OP_ADD => a.checked_add(b).ok_or(ScriptError::InvalidNumber)?,
                    OP_SUB => a.checked_sub(b).ok_or(ScriptError::InvalidNumber)?,
                    OP_BOOLAND => {
                        if a != 0 && b != 0 {
                            1
                        } else {
                            0
                        }
                    }
                    OP_BOOLOR => {
                        if a != 0 || b != 0 {
                            1
                        } else {
                            0
                        }
                    }
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => {
                        if a == b {
                            1
                        } else {
                            0
                        }
                    }
                    OP_NUMNOTEQUAL => {
                        if a != b {
                            1
                        } else {
                            0
                        }
                    }
                    OP_LESSTHAN => {
                        if a < b {
                            1
                        } else {
                            0
                        }
                    }
                    OP_GREATERTHAN => {
                        if a > b {
                            1
                        } else {
                            0
                        }
                    }
                    OP_LESSTHANOREQUAL => {
                        if a <= b {
                            1
                        } else {
                            0
                        }
                    }
                    OP_GREATERTHANOREQUAL => {
                        if a >= b {
                            1
                        } else {
                            0
                        }
                    }
                    OP_MIN => {
                        if a < b {
                            a
                        } else {
                            b
                        }
                    }
                    OP_MAX => {
                        if a > b {
                            a
                        } else {
                            b
                        }
                    }
                    _ => 0,
                };
                self.stack.push_int(result)?;
                if op == OP_NUMEQUALVERIFY {
                    self.op_verify()?;
                }
            }
            OP_WITHIN => {
                let max = self.stack.pop_int(require_minimal)?;
                let min = self.stack.pop_int(require_minimal)?;
                let value = self.stack.pop_int(require_minimal)?;
                self.stack.push_bool(value >= min && value < max)?;
            }
            OP_RIPEMD160 => {
                let data = self.stack.pop()?;
                let hash = ripemd160::Hash::hash(&data);
                self.stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_SHA1 => {
                let data = self.stack.pop()?;
                let hash = sha1::Hash::hash(&data);
                self.stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_SHA256 => {
                let data = self.stack.pop()?;
                let hash = sha256::Hash::hash(&data);
                self.stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_HASH160 => {
                let data = self.stack.pop()?;
                let hash = hash160::Hash::hash(&data);
                self.stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_HASH256 => {
                let data = self.stack.pop()?;
                let hash = sha256d::Hash::hash(&data);
                self.stack.push(hash.to_byte_array().to_vec())?;
            }
            OP_EQUAL => {
                self.op_equal()?;
            }
            OP_EQUALVERIFY => {
                self.op_equal()?;
                self.op_verify()?;
            }
            OP_VERIFY => {
                self.op_verify()?;
            }
            OP_RETURN => return Err(ScriptError::EarlyReturn),
            OP_CHECKSIG => {
                self.op_checksig()?;
            }
            OP_CHECKSIGVERIFY => {
                self.op_checksig()?;
                self.op_verify()?;
            }
            _ => return Err(ScriptError::UnknownOpcode),
        }

        Ok(())
    }

    fn op_equal(&mut self) -> Result<(), ScriptError> {
        let a = self.stack.pop()?;
        let b = self.stack.pop()?;
        self.stack.push_bool(a == b)
    }

    fn op_verify(&mut self) -> Result<(), ScriptError> {
        let value = self.stack.pop()?;
        if !cast_to_bool(&value) {
            return Err(ScriptError::VerifyFailed);
        }
        Ok(())
    }

    fn op_checksig(&mut self) -> Result<(), ScriptError> {
        let pubkey = self.stack.pop()?;
        let signature = self.stack.pop()?;
        if self.flags.strict_encoding() {
            if !signature.is_empty()
                && !(is_valid_signature_encoding(&signature)
                    && is_defined_hashtype_signature(&signature))
            {
                return Err(ScriptError::SignatureEncoding);
            }
            if !is_valid_pubkey_encoding(&pubkey) {
                return Err(ScriptError::PubkeyEncoding);
            }
        }
        let valid = self.checker.check_signature(&signature, &pubkey)?;
        self.stack.push_bool(valid)
    }
}

/// Truthiness of an element under the numeric view: any non-zero byte makes
/// it true, except a lone sign bit (`0x80`) in the last position.
pub fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            if i == data.len() - 1 && byte == 0x80 {
                return false;
            }
            return true;
        }
    }
    false
}

/// Minimal little-endian sign-magnitude encoding of `value`.
///
/// Zero encodes as the empty element; -1 as the single byte `0x81`.
pub fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut abs_value = value.unsigned_abs();

    while abs_value > 0 {
        result.push((abs_value & 0xff) as u8);
        abs_value >>= 8;
    }

    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if value < 0 { 0x80 } else { 0x00 });
        } else if value < 0 {
            *last |= 0x80;
        }
    } else {
        result.push(if value < 0 { 0x81 } else { 0x01 });
    }

    result
}

/// Decodes the numeric view of `bytes`. The inverse of [`encode_num`] on
/// minimal encodings; non-minimal encodings still decode.
pub fn decode_num(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }

    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= (byte as i64) << (8 * i);
    }

    let last = bytes[bytes.len() - 1];
    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        -(result & mask)
    } else {
        result
    }
}

pub(crate) fn parse_scriptnum(
    bytes: &[u8],
    minimal: bool,
    max_len: usize,
) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::InvalidNumber);
    }
    if minimal && !is_minimally_encoded(bytes, max_len) {
        return Err(ScriptError::InvalidNumber);
    }
    Ok(decode_num(bytes))
}

/// Whether `bytes` is the unique shortest encoding of the number it decodes
/// to, within `max_len` bytes.
pub fn is_minimally_encoded(bytes: &[u8], max_len: usize) -> bool {
    if bytes.len() > max_len {
        return false;
    }
    if bytes.is_empty() {
        return true;
    }

    let last = bytes[bytes.len() - 1];
    if (last & 0x7f) == 0 {
        if bytes.len() == 1 {
            return false;
        }
        if bytes[bytes.len() - 2] & 0x80 == 0 {
            return false;
        }
    }

    true
}

fn is_control_flow(op: Opcode) -> bool {
    use all::*;

    matches!(op, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF)
}

fn is_minimal_push(opcode: u8, data: &[u8]) -> bool {
    use all::*;

    if data.is_empty() {
        return opcode == OP_PUSHBYTES_0.to_u8();
    }

    if data.len() == 1 {
        let value = data[0];
        if value == 0x81 {
            return opcode == OP_PUSHNUM_NEG1.to_u8();
        }
        if (1..=16).contains(&value) {
            return opcode == OP_PUSHNUM_1.to_u8() + value - 1;
        }
    }

    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 0xff {
        return opcode == OP_PUSHDATA1.to_u8();
    }
    if data.len() <= 0xffff {
        return opcode == OP_PUSHDATA2.to_u8();
    }
    opcode == OP_PUSHDATA4.to_u8()
}

fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 {
        return false;
    }
    if sig[1] as usize != sig.len() - 3 {
        return false;
    }

    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;

    if sig[2] != 0x02 {
        return false;
    }
    if len_r == 0 {
        return false;
    }
    if sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && (sig[5] & 0x80) == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 {
        return false;
    }
    if len_s == 0 {
        return false;
    }
    if len_r + len_s + 7 != sig.len() {
        return false;
    }
    if sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && (sig[len_r + 7] & 0x80) == 0 {
        return false;
    }
    true
}

fn is_defined_hashtype_signature(sig: &[u8]) -> bool {
    if sig.is_empty() {
        return false;
    }
    let base = sig[sig.len() - 1] & 0x1f;
    matches!(base, 0x01..=0x03)
}

fn is_valid_pubkey_encoding(pubkey: &[u8]) -> bool {
    if pubkey.len() == 33 {
        matches!(pubkey[0], 0x02 | 0x03)
    } else if pubkey.len() == 65 {
        pubkey[0] == 0x04
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VERIFY_NONE;

    fn run(script: &[u8]) -> Result<Engine<'_>, ScriptError> {
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        let mut engine = Engine::new(script, flags)?;
        engine.execute()?;
        Ok(engine)
    }

    #[test]
    fn encode_num_canonical_vectors() {
        assert_eq!(encode_num(0), Vec::<u8>::new());
        assert_eq!(encode_num(1), vec![0x01]);
        assert_eq!(encode_num(-1), vec![0x81]);
        assert_eq!(encode_num(127), vec![0x7f]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_num(-255), vec![0xff, 0x80]);
        assert_eq!(encode_num(256), vec![0x00, 0x01]);
    }

    #[test]
    fn decode_num_inverts_encode() {
        for value in [0i64, 1, -1, 127, 128, -255, 256, 0x7fffffff, -0x7fffffff] {
            assert_eq!(decode_num(&encode_num(value)), value);
        }
    }

    #[test]
    fn negative_zero_is_false() {
        assert!(!cast_to_bool(&[]));
        assert!(!cast_to_bool(&[0x00]));
        assert!(!cast_to_bool(&[0x00, 0x00, 0x80]));
        assert!(cast_to_bool(&[0x80, 0x00]));
        assert!(cast_to_bool(&[0x01]));
    }

    #[test]
    fn scriptnum_overflow_is_invalid_number() {
        let overflow = vec![0x00, 0x00, 0x00, 0x80, 0x00];
        let err = parse_scriptnum(&overflow, false, 4).unwrap_err();
        assert_eq!(err, ScriptError::InvalidNumber);
    }

    #[test]
    fn scriptnum_minimality_is_flag_gated() {
        let non_minimal = vec![0x01, 0x00];
        let err = parse_scriptnum(&non_minimal, true, 4).unwrap_err();
        assert_eq!(err, ScriptError::InvalidNumber);
        assert_eq!(parse_scriptnum(&non_minimal, false, 4).unwrap(), 1);
    }

    #[test]
    fn push_pop_roundtrip() {
        let mut stack = ScriptStack::new();
        stack.push(vec![0xaa, 0xbb]).unwrap();
        assert_eq!(stack.pop().unwrap(), vec![0xaa, 0xbb]);
        assert!(stack.is_empty());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut stack = ScriptStack::new();
        stack.push(vec![1]).unwrap();
        stack.push(vec![2]).unwrap();
        assert_eq!(stack.peek(0).unwrap(), &[2]);
        assert_eq!(stack.peek(1).unwrap(), &[1]);
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.peek(2).unwrap_err(), ScriptError::StackUnderflow);
    }

    #[test]
    fn pop_nth_shifts_shallower_cells() {
        let mut stack = ScriptStack::new();
        for byte in 1u8..=3 {
            stack.push(vec![byte]).unwrap();
        }
        assert_eq!(stack.pop_nth(1).unwrap(), vec![2]);
        assert_eq!(stack.cells(), &[vec![1], vec![3]]);
    }

    #[test]
    fn element_size_bound_is_enforced() {
        let mut stack = ScriptStack::new();
        stack.push(vec![0; MAX_SCRIPT_ELEMENT_SIZE]).unwrap();
        let err = stack
            .push(vec![0; MAX_SCRIPT_ELEMENT_SIZE + 1])
            .unwrap_err();
        assert_eq!(err, ScriptError::ElementTooLarge);
    }

    #[test]
    fn oversized_script_is_rejected() {
        let script = vec![all::OP_NOP.to_u8(); MAX_SCRIPT_SIZE + 1];
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        assert_eq!(
            Engine::new(&script, flags).unwrap_err(),
            ScriptError::ScriptTooLarge
        );
    }

    #[test]
    fn op_budget_is_enforced() {
        let script = vec![all::OP_NOP.to_u8(); MAX_OPS_PER_SCRIPT + 1];
        assert_eq!(run(&script).unwrap_err(), ScriptError::TooManyOps);
    }

    #[test]
    fn step_counter_advances_per_instruction() {
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        let script = [0x51, 0x51, 0x87];
        let mut engine = Engine::new(&script, flags).unwrap();
        assert!(engine.step().unwrap());
        assert_eq!(engine.steps(), 1);
        assert_eq!(engine.pc(), 1);
        while engine.step().unwrap() {}
        assert_eq!(engine.steps(), 3);
        assert_eq!(engine.pc(), 3);
        engine.finish().unwrap();
    }

    #[test]
    fn inline_push_advances_pc_past_data() {
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        let script = [0x03, 0x04, 0x05, 0x06];
        let mut engine = Engine::new(&script, flags).unwrap();
        assert!(engine.step().unwrap());
        assert_eq!(engine.pc(), 4);
        assert_eq!(engine.stack().peek(0).unwrap(), &[0x04, 0x05, 0x06]);
    }

    #[test]
    fn verif_fails_even_unexecuted() {
        // OP_0 OP_IF OP_VERIF OP_ENDIF: the branch is dead but VERIF is
        // still a parse-time failure.
        let script = [0x00, 0x63, 0x65, 0x68];
        assert_eq!(run(&script).unwrap_err(), ScriptError::ReservedOpcode);
    }

    #[test]
    fn reserved_in_dead_branch_is_skipped() {
        let script = [0x00, 0x63, 0x50, 0x68, 0x51];
        let engine = run(&script).unwrap();
        assert_eq!(engine.stack().cells(), &[vec![0x01]]);
    }

    #[test]
    fn no_signature_check_rejects() {
        let checker = NoSignatureCheck;
        assert!(!checker.check_signature(&[0x30, 0x00], &[0x02; 33]).unwrap());
    }

    #[test]
    fn strict_pubkey_encoding_shapes() {
        let mut compressed = vec![0x02];
        compressed.extend_from_slice(&[0u8; 32]);
        assert!(is_valid_pubkey_encoding(&compressed));

        let mut uncompressed = vec![0x04];
        uncompressed.extend_from_slice(&[0u8; 64]);
        assert!(is_valid_pubkey_encoding(&uncompressed));

        uncompressed[0] = 0x05;
        assert!(!is_valid_pubkey_encoding(&uncompressed));
        assert!(!is_valid_pubkey_encoding(&[0x02; 12]));
    }

    #[test]
    fn minimal_push_prefers_shortest_form() {
        assert!(is_minimal_push(0x00, &[]));
        assert!(!is_minimal_push(0x01, &[0x05]));
        assert!(is_minimal_push(0x02, &[0x11, 0x22]));
        assert!(!is_minimal_push(all::OP_PUSHDATA1.to_u8(), &[0x11, 0x22]));
    }
}
