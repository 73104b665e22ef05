//! ECMA-335 blob signature encoding.
//!
//! Builds the small binary signatures the metadata tables reference:
//! method signatures, the local-variable signature, and the custom
//! attribute value blob. Lengths and counts use the metadata compressed
//! unsigned encoding; strings inside attribute blobs are SerString
//! (compressed length + UTF-8).

// Element types (ECMA-335 II.23.1.16)
pub const ELEM_VOID: u8 = 0x01;
pub const ELEM_I4: u8 = 0x08;
pub const ELEM_R8: u8 = 0x0D;
pub const ELEM_STRING: u8 = 0x0E;

// Calling conventions / signature kinds
const SIG_DEFAULT: u8 = 0x00;
const SIG_HASTHIS: u8 = 0x20;
const SIG_LOCAL: u8 = 0x07;

// Named-argument kind inside custom attribute blobs
const NAMED_ARG_PROPERTY: u8 = 0x54;

/// Append a compressed unsigned integer (II.23.2).
pub fn write_compressed_u32(buf: &mut Vec<u8>, value: u32) {
    if value <= 0x7F {
        buf.push(value as u8);
    } else if value <= 0x3FFF {
        buf.push(0x80 | (value >> 8) as u8);
        buf.push(value as u8);
    } else {
        assert!(value <= 0x1FFF_FFFF, "value too large for compressed form");
        buf.push(0xC0 | (value >> 24) as u8);
        buf.push((value >> 16) as u8);
        buf.push((value >> 8) as u8);
        buf.push(value as u8);
    }
}

/// Append a SerString: compressed byte length then UTF-8 bytes.
fn write_ser_string(buf: &mut Vec<u8>, s: &str) {
    write_compressed_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

/// A method signature: calling convention, parameter count, return type,
/// parameter types.
pub fn method_sig(instance: bool, ret: u8, params: &[u8]) -> Vec<u8> {
    let mut buf = vec![if instance { SIG_HASTHIS } else { SIG_DEFAULT }];
    write_compressed_u32(&mut buf, params.len() as u32);
    buf.push(ret);
    buf.extend_from_slice(params);
    buf
}

/// A standalone local-variable signature over the given local types.
pub fn local_var_sig(locals: &[u8]) -> Vec<u8> {
    let mut buf = vec![SIG_LOCAL];
    write_compressed_u32(&mut buf, locals.len() as u32);
    buf.extend_from_slice(locals);
    buf
}

/// The target-framework attribute value: prolog, the framework's full
/// name as the fixed string argument, and one named string property,
/// `FrameworkDisplayName`.
pub fn framework_attribute_blob(full_name: &str, display_name: &str) -> Vec<u8> {
    let mut buf = vec![0x01, 0x00]; // prolog
    write_ser_string(&mut buf, full_name);
    buf.extend_from_slice(&1u16.to_le_bytes()); // named argument count
    buf.push(NAMED_ARG_PROPERTY);
    buf.push(ELEM_STRING);
    write_ser_string(&mut buf, "FrameworkDisplayName");
    write_ser_string(&mut buf, display_name);
    buf
}
