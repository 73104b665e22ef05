//! ECMA-335 metadata: heaps, tables, and stream serialization.
//!
//! The [`MetadataBuilder`] collects table rows and heap entries as the
//! assembler declares them, then serializes everything into the metadata
//! root: the `#~` table stream plus the `#Strings`, `#US`, `#GUID`, and
//! `#Blob` heaps.
//!
//! Handles are dense 1-based row indexes assigned at insertion; rows only
//! ever reference handles created before them, so serialization is a
//! single forward pass. The image this builder produces is small by
//! construction — every heap and table index is encoded in two bytes, and
//! insertion asserts the limits rather than widening.

use indexmap::IndexMap;

// ── Table numbers ───────────────────────────────────────────────────

const TABLE_MODULE: u8 = 0x00;
const TABLE_TYPE_REF: u8 = 0x01;
const TABLE_TYPE_DEF: u8 = 0x02;
const TABLE_METHOD_DEF: u8 = 0x06;
const TABLE_MEMBER_REF: u8 = 0x0A;
const TABLE_CUSTOM_ATTRIBUTE: u8 = 0x0C;
const TABLE_STAND_ALONE_SIG: u8 = 0x11;
const TABLE_ASSEMBLY: u8 = 0x20;
const TABLE_ASSEMBLY_REF: u8 = 0x23;

/// Tables-that-must-be-sorted bitmask, as managed metadata writers
/// conventionally declare it.
const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

// ── Row flags ───────────────────────────────────────────────────────

pub const METHOD_PUBLIC: u16 = 0x0006;
pub const METHOD_STATIC: u16 = 0x0010;
pub const METHOD_HIDE_BY_SIG: u16 = 0x0080;
pub const METHOD_SPECIAL_NAME: u16 = 0x0800;
pub const METHOD_RT_SPECIAL_NAME: u16 = 0x1000;

pub const TYPE_PUBLIC: u32 = 0x0000_0001;
pub const TYPE_SEALED: u32 = 0x0000_0100;
pub const TYPE_BEFORE_FIELD_INIT: u32 = 0x0010_0000;

// ── Handles ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringIndex(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobIndex(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuidIndex(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyRefHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRefHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRefHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDefHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandAloneSigHandle(u32);

impl MemberRefHandle {
    /// Metadata token: table number in the high byte, row in the low 24.
    pub fn token(self) -> u32 {
        (u32::from(TABLE_MEMBER_REF) << 24) | self.0
    }
}

impl MethodDefHandle {
    pub fn token(self) -> u32 {
        (u32::from(TABLE_METHOD_DEF) << 24) | self.0
    }
}

impl StandAloneSigHandle {
    pub fn token(self) -> u32 {
        (u32::from(TABLE_STAND_ALONE_SIG) << 24) | self.0
    }
}

// ── Coded indexes (II.24.2.6) ───────────────────────────────────────

fn resolution_scope_assembly_ref(handle: AssemblyRefHandle) -> u32 {
    (handle.0 << 2) | 2
}

fn type_def_or_ref(extends: Option<TypeRefHandle>) -> u32 {
    match extends {
        Some(handle) => (handle.0 << 2) | 1,
        None => 0,
    }
}

fn member_ref_parent_type_ref(handle: TypeRefHandle) -> u32 {
    (handle.0 << 3) | 1
}

fn has_custom_attribute_assembly() -> u32 {
    // The one-row Assembly table is always parent row 1, tag 14.
    (1 << 5) | 14
}

fn custom_attribute_type_member_ref(handle: MemberRefHandle) -> u32 {
    (handle.0 << 3) | 3
}

// ── Heaps ───────────────────────────────────────────────────────────

/// Null-terminated UTF-8 strings, deduplicated; offset 0 is the empty
/// string.
pub struct StringsHeap {
    buf: Vec<u8>,
    index: IndexMap<String, u32>,
}

impl StringsHeap {
    fn new() -> Self {
        Self {
            buf: vec![0],
            index: IndexMap::new(),
        }
    }

    pub fn get_or_add(&mut self, s: &str) -> StringIndex {
        if s.is_empty() {
            return StringIndex(0);
        }
        if let Some(&offset) = self.index.get(s) {
            return StringIndex(offset);
        }
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self.index.insert(s.to_string(), offset);
        StringIndex(offset)
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Length-prefixed blobs, deduplicated; offset 0 is the empty blob.
pub struct BlobHeap {
    buf: Vec<u8>,
    index: IndexMap<Vec<u8>, u32>,
}

impl BlobHeap {
    fn new() -> Self {
        Self {
            buf: vec![0],
            index: IndexMap::new(),
        }
    }

    pub fn get_or_add(&mut self, blob: &[u8]) -> BlobIndex {
        if blob.is_empty() {
            return BlobIndex(0);
        }
        if let Some(&offset) = self.index.get(blob) {
            return BlobIndex(offset);
        }
        let offset = self.buf.len() as u32;
        crate::signatures::write_compressed_u32(&mut self.buf, blob.len() as u32);
        self.buf.extend_from_slice(blob);
        self.index.insert(blob.to_vec(), offset);
        BlobIndex(offset)
    }

    fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// 16-byte GUIDs; indexes are 1-based.
pub struct GuidHeap {
    guids: Vec<[u8; 16]>,
}

impl GuidHeap {
    fn new() -> Self {
        Self { guids: Vec::new() }
    }

    pub fn add(&mut self, guid: [u8; 16]) -> GuidIndex {
        self.guids.push(guid);
        GuidIndex(self.guids.len() as u32)
    }

    fn bytes(&self) -> Vec<u8> {
        self.guids.concat()
    }
}

// ── Table rows ──────────────────────────────────────────────────────

struct ModuleRow {
    generation: u16,
    name: StringIndex,
    mvid: GuidIndex,
}

struct TypeRefRow {
    resolution_scope: u32,
    name: StringIndex,
    namespace: StringIndex,
}

struct TypeDefRow {
    flags: u32,
    name: StringIndex,
    namespace: StringIndex,
    extends: u32,
    field_list: u32,
    method_list: u32,
}

struct MethodDefRow {
    rva: u32,
    impl_flags: u16,
    flags: u16,
    name: StringIndex,
    signature: BlobIndex,
    param_list: u32,
}

struct MemberRefRow {
    class: u32,
    name: StringIndex,
    signature: BlobIndex,
}

struct CustomAttributeRow {
    parent: u32,
    attribute_type: u32,
    value: BlobIndex,
}

struct StandAloneSigRow {
    signature: BlobIndex,
}

struct AssemblyRow {
    hash_alg: u32,
    version: [u16; 4],
    flags: u32,
    public_key: BlobIndex,
    name: StringIndex,
    culture: StringIndex,
}

struct AssemblyRefRow {
    version: [u16; 4],
    flags: u32,
    public_key_or_token: BlobIndex,
    name: StringIndex,
    culture: StringIndex,
    hash_value: BlobIndex,
}

// ── Builder ─────────────────────────────────────────────────────────

pub struct MetadataBuilder {
    pub strings: StringsHeap,
    pub blobs: BlobHeap,
    pub guids: GuidHeap,
    module: Option<ModuleRow>,
    assembly: Option<AssemblyRow>,
    assembly_refs: Vec<AssemblyRefRow>,
    type_refs: Vec<TypeRefRow>,
    type_defs: Vec<TypeDefRow>,
    method_defs: Vec<MethodDefRow>,
    member_refs: Vec<MemberRefRow>,
    custom_attributes: Vec<CustomAttributeRow>,
    standalone_sigs: Vec<StandAloneSigRow>,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self {
            strings: StringsHeap::new(),
            blobs: BlobHeap::new(),
            guids: GuidHeap::new(),
            module: None,
            assembly: None,
            assembly_refs: Vec::new(),
            type_refs: Vec::new(),
            type_defs: Vec::new(),
            method_defs: Vec::new(),
            member_refs: Vec::new(),
            custom_attributes: Vec::new(),
            standalone_sigs: Vec::new(),
        }
    }

    pub fn add_module(&mut self, name: &str, mvid: [u8; 16]) {
        let name = self.strings.get_or_add(name);
        let mvid = self.guids.add(mvid);
        self.module = Some(ModuleRow {
            generation: 0,
            name,
            mvid,
        });
    }

    pub fn add_assembly(&mut self, name: &str, version: [u16; 4]) {
        let name = self.strings.get_or_add(name);
        self.assembly = Some(AssemblyRow {
            hash_alg: 0, // AssemblyHashAlgorithm.None
            version,
            flags: 0,
            public_key: BlobIndex(0),
            name,
            culture: StringIndex(0),
        });
    }

    pub fn add_assembly_ref(
        &mut self,
        name: &str,
        version: [u16; 4],
        public_key_token: &[u8],
    ) -> AssemblyRefHandle {
        let name = self.strings.get_or_add(name);
        let public_key_or_token = self.blobs.get_or_add(public_key_token);
        self.assembly_refs.push(AssemblyRefRow {
            version,
            flags: 0,
            public_key_or_token,
            name,
            culture: StringIndex(0),
            hash_value: BlobIndex(0),
        });
        AssemblyRefHandle(self.assembly_refs.len() as u32)
    }

    pub fn add_type_ref(
        &mut self,
        scope: AssemblyRefHandle,
        namespace: &str,
        name: &str,
    ) -> TypeRefHandle {
        let name = self.strings.get_or_add(name);
        let namespace = self.strings.get_or_add(namespace);
        self.type_refs.push(TypeRefRow {
            resolution_scope: resolution_scope_assembly_ref(scope),
            name,
            namespace,
        });
        TypeRefHandle(self.type_refs.len() as u32)
    }

    pub fn add_member_ref(
        &mut self,
        class: TypeRefHandle,
        name: &str,
        signature: &[u8],
    ) -> MemberRefHandle {
        let name = self.strings.get_or_add(name);
        let signature = self.blobs.get_or_add(signature);
        self.member_refs.push(MemberRefRow {
            class: member_ref_parent_type_ref(class),
            name,
            signature,
        });
        MemberRefHandle(self.member_refs.len() as u32)
    }

    pub fn add_method_def(
        &mut self,
        flags: u16,
        name: &str,
        signature: &[u8],
        rva: u32,
    ) -> MethodDefHandle {
        let name = self.strings.get_or_add(name);
        let signature = self.blobs.get_or_add(signature);
        self.method_defs.push(MethodDefRow {
            rva,
            impl_flags: 0, // MethodImplAttributes.IL
            flags,
            name,
            signature,
            param_list: 1,
        });
        MethodDefHandle(self.method_defs.len() as u32)
    }

    pub fn add_type_def(
        &mut self,
        flags: u32,
        namespace: &str,
        name: &str,
        extends: Option<TypeRefHandle>,
        first_method: MethodDefHandle,
    ) {
        let name = self.strings.get_or_add(name);
        let namespace = self.strings.get_or_add(namespace);
        self.type_defs.push(TypeDefRow {
            flags,
            name,
            namespace,
            extends: type_def_or_ref(extends),
            field_list: 1, // no fields anywhere in the image
            method_list: first_method.0,
        });
    }

    pub fn add_assembly_custom_attribute(&mut self, ctor: MemberRefHandle, value: &[u8]) {
        let value = self.blobs.get_or_add(value);
        self.custom_attributes.push(CustomAttributeRow {
            parent: has_custom_attribute_assembly(),
            attribute_type: custom_attribute_type_member_ref(ctor),
            value,
        });
    }

    pub fn add_standalone_sig(&mut self, signature: &[u8]) -> StandAloneSigHandle {
        let signature = self.blobs.get_or_add(signature);
        self.standalone_sigs.push(StandAloneSigRow { signature });
        StandAloneSigHandle(self.standalone_sigs.len() as u32)
    }

    // ── Serialization ───────────────────────────────────────────────

    fn row_counts(&self) -> Vec<(u8, u32)> {
        [
            (TABLE_MODULE, self.module.iter().count() as u32),
            (TABLE_TYPE_REF, self.type_refs.len() as u32),
            (TABLE_TYPE_DEF, self.type_defs.len() as u32),
            (TABLE_METHOD_DEF, self.method_defs.len() as u32),
            (TABLE_MEMBER_REF, self.member_refs.len() as u32),
            (TABLE_CUSTOM_ATTRIBUTE, self.custom_attributes.len() as u32),
            (TABLE_STAND_ALONE_SIG, self.standalone_sigs.len() as u32),
            (TABLE_ASSEMBLY, self.assembly.iter().count() as u32),
            (TABLE_ASSEMBLY_REF, self.assembly_refs.len() as u32),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .collect()
    }

    /// Serialize the `#~` stream: header, row counts, rows.
    fn tables_stream(&self) -> Vec<u8> {
        let counts = self.row_counts();
        let valid: u64 = counts.iter().fold(0, |mask, &(table, _)| mask | 1 << table);

        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf.push(2); // major version
        buf.push(0); // minor version
        buf.push(0); // heap sizes: all heaps under 64 KiB, 2-byte indexes
        buf.push(1); // reserved
        buf.extend_from_slice(&valid.to_le_bytes());
        buf.extend_from_slice(&SORTED_TABLES.to_le_bytes());
        for &(_, count) in &counts {
            buf.extend_from_slice(&count.to_le_bytes());
        }

        if let Some(module) = &self.module {
            buf.extend_from_slice(&module.generation.to_le_bytes());
            push_idx(&mut buf, module.name.0);
            push_idx(&mut buf, module.mvid.0);
            push_idx(&mut buf, 0); // EncId
            push_idx(&mut buf, 0); // EncBaseId
        }
        for row in &self.type_refs {
            push_idx(&mut buf, row.resolution_scope);
            push_idx(&mut buf, row.name.0);
            push_idx(&mut buf, row.namespace.0);
        }
        for row in &self.type_defs {
            buf.extend_from_slice(&row.flags.to_le_bytes());
            push_idx(&mut buf, row.name.0);
            push_idx(&mut buf, row.namespace.0);
            push_idx(&mut buf, row.extends);
            push_idx(&mut buf, row.field_list);
            push_idx(&mut buf, row.method_list);
        }
        for row in &self.method_defs {
            buf.extend_from_slice(&row.rva.to_le_bytes());
            buf.extend_from_slice(&row.impl_flags.to_le_bytes());
            buf.extend_from_slice(&row.flags.to_le_bytes());
            push_idx(&mut buf, row.name.0);
            push_idx(&mut buf, row.signature.0);
            push_idx(&mut buf, row.param_list);
        }
        for row in &self.member_refs {
            push_idx(&mut buf, row.class);
            push_idx(&mut buf, row.name.0);
            push_idx(&mut buf, row.signature.0);
        }
        for row in &self.custom_attributes {
            push_idx(&mut buf, row.parent);
            push_idx(&mut buf, row.attribute_type);
            push_idx(&mut buf, row.value.0);
        }
        for row in &self.standalone_sigs {
            push_idx(&mut buf, row.signature.0);
        }
        if let Some(assembly) = &self.assembly {
            buf.extend_from_slice(&assembly.hash_alg.to_le_bytes());
            for part in assembly.version {
                buf.extend_from_slice(&part.to_le_bytes());
            }
            buf.extend_from_slice(&assembly.flags.to_le_bytes());
            push_idx(&mut buf, assembly.public_key.0);
            push_idx(&mut buf, assembly.name.0);
            push_idx(&mut buf, assembly.culture.0);
        }
        for row in &self.assembly_refs {
            for part in row.version {
                buf.extend_from_slice(&part.to_le_bytes());
            }
            buf.extend_from_slice(&row.flags.to_le_bytes());
            push_idx(&mut buf, row.public_key_or_token.0);
            push_idx(&mut buf, row.name.0);
            push_idx(&mut buf, row.culture.0);
            push_idx(&mut buf, row.hash_value.0);
        }

        pad4(&mut buf);
        buf
    }

    /// Serialize the metadata root: signature, version, stream headers,
    /// then the five streams.
    pub fn serialize(&self) -> Vec<u8> {
        let tables = self.tables_stream();
        let mut strings = self.strings.bytes().to_vec();
        pad4(&mut strings);
        let mut user_strings = vec![0u8];
        pad4(&mut user_strings);
        let guids = self.guids.bytes();
        let mut blobs = self.blobs.bytes().to_vec();
        pad4(&mut blobs);

        let streams: [(&[u8], &[u8]); 5] = [
            (b"#~\0\0".as_slice(), tables.as_slice()),
            (b"#Strings\0\0\0\0".as_slice(), strings.as_slice()),
            (b"#US\0".as_slice(), user_strings.as_slice()),
            (b"#GUID\0\0\0".as_slice(), guids.as_slice()),
            (b"#Blob\0\0\0".as_slice(), blobs.as_slice()),
        ];

        const VERSION: &[u8; 12] = b"v4.0.30319\0\0";
        let header_size: u32 =
            32 + streams.iter().map(|(name, _)| 8 + name.len() as u32).sum::<u32>();

        let mut buf = Vec::new();
        buf.extend_from_slice(&0x424A_5342u32.to_le_bytes()); // "BSJB"
        buf.extend_from_slice(&1u16.to_le_bytes()); // major
        buf.extend_from_slice(&1u16.to_le_bytes()); // minor
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
        buf.extend_from_slice(&(VERSION.len() as u32).to_le_bytes());
        buf.extend_from_slice(VERSION);
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&(streams.len() as u16).to_le_bytes());

        let mut offset = header_size;
        for (name, bytes) in &streams {
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(name);
            offset += bytes.len() as u32;
        }
        debug_assert_eq!(buf.len() as u32, header_size);

        for (_, bytes) in &streams {
            buf.extend_from_slice(bytes);
        }
        buf
    }
}

impl Default for MetadataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append a 2-byte heap/table index, asserting it fits.
fn push_idx(buf: &mut Vec<u8>, value: u32) {
    assert!(value <= u32::from(u16::MAX), "metadata index overflow");
    buf.extend_from_slice(&(value as u16).to_le_bytes());
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_heap_dedups() {
        let mut heap = StringsHeap::new();
        let a = heap.get_or_add("Main");
        let b = heap.get_or_add("Main");
        assert_eq!(a, b);
        assert_eq!(heap.get_or_add(""), StringIndex(0));
        // "Main\0" starts right after the leading null byte.
        assert_eq!(a, StringIndex(1));
        assert_eq!(heap.bytes(), b"\0Main\0");
    }

    #[test]
    fn test_blob_heap_prefixes_lengths() {
        let mut heap = BlobHeap::new();
        let a = heap.get_or_add(&[0x20, 0x00, 0x01]);
        let b = heap.get_or_add(&[0x20, 0x00, 0x01]);
        assert_eq!(a, b);
        assert_eq!(heap.bytes(), &[0x00, 0x03, 0x20, 0x00, 0x01]);
    }

    #[test]
    fn test_guid_indexes_are_one_based() {
        let mut heap = GuidHeap::new();
        assert_eq!(heap.add([7; 16]), GuidIndex(1));
        assert_eq!(heap.add([9; 16]), GuidIndex(2));
    }

    #[test]
    fn test_tokens() {
        assert_eq!(MemberRefHandle(1).token(), 0x0A00_0001);
        assert_eq!(MethodDefHandle(2).token(), 0x0600_0002);
        assert_eq!(StandAloneSigHandle(1).token(), 0x1100_0001);
    }

    #[test]
    fn test_coded_indexes() {
        assert_eq!(resolution_scope_assembly_ref(AssemblyRefHandle(1)), 6);
        assert_eq!(type_def_or_ref(Some(TypeRefHandle(1))), 5);
        assert_eq!(type_def_or_ref(None), 0);
        assert_eq!(member_ref_parent_type_ref(TypeRefHandle(3)), 0x19);
        assert_eq!(has_custom_attribute_assembly(), 0x2E);
        assert_eq!(custom_attribute_type_member_ref(MemberRefHandle(1)), 0x0B);
    }

    #[test]
    fn test_tables_stream_header() {
        let mut metadata = MetadataBuilder::new();
        metadata.add_module("m.dll", [1; 16]);
        metadata.add_assembly("m", [1, 0, 0, 0]);
        let stream = metadata.tables_stream();

        assert_eq!(&stream[0..4], &[0, 0, 0, 0]);
        assert_eq!(stream[4], 2); // major
        assert_eq!(stream[5], 0); // minor
        assert_eq!(stream[6], 0); // heap sizes
        assert_eq!(stream[7], 1); // reserved
        let valid = u64::from_le_bytes(stream[8..16].try_into().unwrap());
        assert_eq!(valid, (1 << TABLE_MODULE) | (1 << TABLE_ASSEMBLY));
        // Two row counts follow the sorted mask, both 1.
        assert_eq!(&stream[24..28], &[1, 0, 0, 0]);
        assert_eq!(&stream[28..32], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_metadata_root_layout() {
        let mut metadata = MetadataBuilder::new();
        metadata.add_module("m.dll", [1; 16]);
        let root = metadata.serialize();

        assert_eq!(&root[0..4], b"BSJB");
        assert_eq!(&root[16..26], b"v4.0.30319");
        // Five streams declared.
        assert_eq!(&root[30..32], &[5, 0]);
        assert!(root.windows(2).any(|w| w == b"#~"));
        assert!(root.windows(8).any(|w| w == b"#Strings"));
        assert!(root.windows(5).any(|w| w == b"#Blob"));
        // First stream offset points inside the root.
        let first_offset = u32::from_le_bytes(root[32..36].try_into().unwrap());
        assert!(first_offset as usize <= root.len());
    }
}
