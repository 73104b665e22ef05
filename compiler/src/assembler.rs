//! Image assembly — metadata declarations plus bytecode into a loadable
//! binary image.
//!
//! Translates the generated instruction stream and a small fixed set of
//! declarations into a complete module with one executable entry point.
//! Declarations happen in a fixed order so later rows only reference
//! handles that already exist: module and assembly identity, external
//! assembly references, type and member references, the target-framework
//! attribute, method bodies and definitions, and finally the two type
//! definitions. Assembly never fails on validated input; a malformed
//! stream is a bug in the code generator, not a recoverable error.
//!
//! Reproducibility: the module's identity (MVID) and the image's stamp
//! come from fixed seeds, so identical instruction streams assemble to
//! byte-identical images.

use crate::codegen::EntryBody;
use crate::il::{encode_stream, Callee, CalleeTokens, Instruction, MethodBodyStream};
use crate::metadata::{
    MetadataBuilder, METHOD_HIDE_BY_SIG, METHOD_PUBLIC, METHOD_RT_SPECIAL_NAME,
    METHOD_SPECIAL_NAME, METHOD_STATIC, TYPE_BEFORE_FIELD_INIT, TYPE_PUBLIC, TYPE_SEALED,
};
use crate::pe;
use crate::signatures::{
    framework_attribute_blob, local_var_sig, method_sig, ELEM_I4, ELEM_R8, ELEM_STRING, ELEM_VOID,
};
use tracing::debug;

/// Name of the produced application; also the emitted type's namespace.
pub const APPLICATION_NAME: &str = "ExprSharpApplication";

/// Fixed seed for the module identity. Never derived from the clock.
const MVID_SEED: [u8; 16] = [
    0x3E, 0x7C, 0x11, 0xD2, 0x8A, 0x4F, 0x4D, 0x09, 0xB1, 0x55, 0x60, 0x3A, 0xC4, 0x21, 0x9E,
    0x5B,
];

/// Fixed content-id stamp, recorded as the image's COFF timestamp.
const CONTENT_STAMP: u32 = 0x0102_0304;

const MICROSOFT_PUBLIC_KEY_TOKEN: [u8; 8] = [0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A];

/// Pinned version of the external runtime assemblies.
const RUNTIME_ASSEMBLY_VERSION: [u16; 4] = [8, 0, 0, 0];

const TARGET_FRAMEWORK: &str = ".NETCoreApp,Version=v8.0";
const TARGET_FRAMEWORK_DISPLAY: &str = ".NET 8.0";

/// Assemble the entry body into a complete binary image.
pub fn assemble(body: &EntryBody) -> Vec<u8> {
    let mut metadata = MetadataBuilder::new();

    // Module and assembly identity.
    metadata.add_module(&format!("{APPLICATION_NAME}.dll"), MVID_SEED);
    metadata.add_assembly(APPLICATION_NAME, [1, 0, 0, 0]);

    // External assemblies, pinned version and public-key token.
    let system_runtime = metadata.add_assembly_ref(
        "System.Runtime",
        RUNTIME_ASSEMBLY_VERSION,
        &MICROSOFT_PUBLIC_KEY_TOKEN,
    );
    let system_console = metadata.add_assembly_ref(
        "System.Console",
        RUNTIME_ASSEMBLY_VERSION,
        &MICROSOFT_PUBLIC_KEY_TOKEN,
    );

    // External types the image references.
    let object_type = metadata.add_type_ref(system_runtime, "System", "Object");
    let console_type = metadata.add_type_ref(system_console, "System", "Console");
    let framework_attribute_type = metadata.add_type_ref(
        system_runtime,
        "System.Runtime.Versioning",
        "TargetFrameworkAttribute",
    );
    let math_type = metadata.add_type_ref(system_runtime, "System", "Math");

    // External members. The parameterless ctor signature is shared between
    // the Object::.ctor reference and our own ctor definition.
    let ctor_sig = method_sig(true, ELEM_VOID, &[]);
    let framework_attribute_ctor = metadata.add_member_ref(
        framework_attribute_type,
        ".ctor",
        &method_sig(true, ELEM_VOID, &[ELEM_STRING]),
    );
    let object_ctor = metadata.add_member_ref(object_type, ".ctor", &ctor_sig);
    let write_line = metadata.add_member_ref(
        console_type,
        "WriteLine",
        &method_sig(false, ELEM_VOID, &[ELEM_I4]),
    );
    let math_pow = metadata.add_member_ref(
        math_type,
        "Pow",
        &method_sig(false, ELEM_R8, &[ELEM_R8, ELEM_R8]),
    );

    // Record the targeted runtime on the assembly.
    metadata.add_assembly_custom_attribute(
        framework_attribute_ctor,
        &framework_attribute_blob(TARGET_FRAMEWORK, TARGET_FRAMEWORK_DISPLAY),
    );

    // Method bodies: the ctor delegates to Object::.ctor and fits the tiny
    // format; the entry body is fat, carrying the scratch-local signature.
    let callee_tokens = CalleeTokens {
        object_ctor: object_ctor.token(),
        write_line_int32: write_line.token(),
        math_pow: math_pow.token(),
    };
    let mut bodies = MethodBodyStream::new();

    let ctor_stream = [
        Instruction::Ldarg0,
        Instruction::Call(Callee::ObjectCtor),
        Instruction::Ret,
    ];
    let ctor_offset = bodies.add_tiny_body(&encode_stream(&ctor_stream, &callee_tokens));

    let locals = metadata.add_standalone_sig(&local_var_sig(&[ELEM_I4]));
    let entry_code = encode_stream(&body.instructions, &callee_tokens);
    let entry_offset = bodies.add_fat_body(&entry_code, body.max_stack, locals.token());

    // Method definitions: the entry method first, so both type definitions
    // can use it as the start of their method lists.
    let entry_method = metadata.add_method_def(
        METHOD_PUBLIC | METHOD_STATIC | METHOD_HIDE_BY_SIG,
        "Main",
        &method_sig(false, ELEM_VOID, &[]),
        pe::IL_STREAM_RVA + entry_offset,
    );
    metadata.add_method_def(
        METHOD_PUBLIC | METHOD_HIDE_BY_SIG | METHOD_SPECIAL_NAME | METHOD_RT_SPECIAL_NAME,
        ".ctor",
        &ctor_sig,
        pe::IL_STREAM_RVA + ctor_offset,
    );

    // The module-scope placeholder type owns no methods (its list starts
    // where the next type's does); the application type owns both.
    metadata.add_type_def(0, "", "<Module>", None, entry_method);
    metadata.add_type_def(
        TYPE_PUBLIC | TYPE_SEALED | TYPE_BEFORE_FIELD_INIT,
        APPLICATION_NAME,
        "Program",
        Some(object_type),
        entry_method,
    );

    let il = bodies.into_bytes();
    let root = metadata.serialize();
    debug!(
        il_bytes = il.len(),
        metadata_bytes = root.len(),
        "assembling image"
    );
    pe::write_image(&il, &root, entry_method.token(), CONTENT_STAMP)
}
