use scriptvm::{
    decode_num, encode_num, is_minimally_encoded, Engine, ScriptError, ScriptFlags, ScriptStack,
    VERIFY_NONE,
};

// Mirrors the value/offset sets used by Bitcoin Core src/test/scriptnum_tests.cpp.
const VALUES: [i64; 11] = [
    0,
    1,
    -2,
    127,
    128,
    -255,
    256,
    (1i64 << 15) - 1,
    -(1i64 << 16),
    (1i64 << 24) - 1,
    (1i64 << 31) - 1,
];

const OFFSETS: [i64; 9] = [1, 0x79, 0x80, 0x81, 0xFF, 0x7FFF, 0x8000, 0xFFFF, 0x10000];

fn in_arith_range(value: i64) -> bool {
    // Four little-endian sign-magnitude bytes hold magnitudes below 2^31.
    value > -(1i64 << 31) && value < (1i64 << 31)
}

#[test]
fn push_pop_roundtrip_over_the_grid() {
    for &value in &VALUES {
        for &offset in &OFFSETS {
            for candidate in [value, value + offset, value - offset] {
                if !in_arith_range(candidate) {
                    continue;
                }
                let mut stack = ScriptStack::new();
                stack.push_int(candidate).unwrap();
                assert_eq!(stack.pop_int(true).unwrap(), candidate, "value {candidate}");
            }
        }
    }
}

#[test]
fn canonical_encodings() {
    assert_eq!(encode_num(0), Vec::<u8>::new());
    assert_eq!(encode_num(-1), vec![0x81]);
    assert_eq!(decode_num(&[]), 0);
    assert_eq!(decode_num(&[0x81]), -1);
}

#[test]
fn encodings_are_minimal() {
    for &value in &VALUES {
        let encoded = encode_num(value);
        assert!(
            is_minimally_encoded(&encoded, 5),
            "value {value} encoded as {encoded:02x?}"
        );
        assert_eq!(decode_num(&encoded), value);
    }
}

#[test]
fn four_byte_bound_is_exact() {
    let mut stack = ScriptStack::new();
    stack.push_int((1i64 << 31) - 1).unwrap();
    assert_eq!(stack.pop_int(false).unwrap(), (1i64 << 31) - 1);

    // 2^31 needs five bytes and is out of arithmetic range.
    let mut stack = ScriptStack::new();
    stack.push_int(1i64 << 31).unwrap();
    assert_eq!(stack.pop_int(false).unwrap_err(), ScriptError::InvalidNumber);
}

#[test]
fn non_minimal_operands_fail_only_under_the_flag() {
    let mut stack = ScriptStack::new();
    stack.push(vec![0x01, 0x00]).unwrap();
    assert_eq!(stack.pop_int(true).unwrap_err(), ScriptError::InvalidNumber);

    let mut stack = ScriptStack::new();
    stack.push(vec![0x01, 0x00]).unwrap();
    assert_eq!(stack.pop_int(false).unwrap(), 1);
}

#[test]
fn negative_zero_decodes_to_zero() {
    assert_eq!(decode_num(&[0x80]), 0);
    assert_eq!(decode_num(&[0x00, 0x80]), 0);
    assert!(!is_minimally_encoded(&[0x80], 4));
}

#[test]
fn pushnum_opcodes_agree_with_encode_num() {
    for opcode in 0x51u8..=0x60 {
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        let script = [opcode];
        let mut engine = Engine::new(&script, flags).unwrap();
        engine.execute().unwrap();
        let expected = encode_num((opcode - 0x50) as i64);
        assert_eq!(engine.stack().peek(0).unwrap(), expected.as_slice());
    }
}

#[test]
fn op_1negate_pushes_the_canonical_byte() {
    let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
    let mut engine = Engine::new(&[0x4f], flags).unwrap();
    engine.execute().unwrap();
    assert_eq!(engine.stack().peek(0).unwrap(), &[0x81]);
}
