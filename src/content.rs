//! The tagged content graph (`spec.md` §3).
//!
//! `Content` generalizes the teacher's `AttributeInfo { attribute_name_index,
//! attribute_length, inner: AttributeInfoInner }` split: shared envelope
//! fields (`handle`, `is_exception`) live on the outer struct, the
//! variant-specific payload lives in [`ContentData`].

use std::collections::HashMap;

use bitflags::bitflags;

use crate::handle::Handle;

bitflags! {
    /// `descFlags` bits recognized by the protocol (`spec.md` §3).
    #[derive(Default)]
    pub struct DescFlags: u8 {
        const WRITE_METHOD  = 0x01;
        const SERIALIZABLE  = 0x02;
        const EXTERNALIZABLE = 0x04;
        const BLOCK_DATA    = 0x08;
        const ENUM          = 0x10;
    }
}

/// A value that may appear wherever the grammar allows an arbitrary
/// reference-typed `Content`: array elements, annotations, instance
/// reference fields. Per the Design Notes in `spec.md` §9, references are
/// stored as handles and resolved through the table; the one exception is
/// `BLOCKDATA`, which carries no handle and must be stored inline.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Ref(Handle),
    /// An inline `BLOCKDATA` payload (no handle to reference it by).
    Inline(Vec<u8>),
}

/// One field's value within an instance's per-superclass field map.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Byte(i8),
    Char(u16),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Reference(Value),
}

/// The element sequence of an `ARRAY` content, typed by the array's
/// element kind (`spec.md` §4.4 Arrays: "the second character identifies
/// the element kind").
#[derive(Debug, Clone)]
pub enum ArrayElements {
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Double(Vec<f64>),
    Float(Vec<f32>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Short(Vec<i16>),
    Boolean(Vec<bool>),
    Reference(Vec<Value>),
}

impl ArrayElements {
    pub fn len(&self) -> usize {
        match self {
            Self::Byte(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Boolean(v) => v.len(),
            Self::Reference(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `B C D F I J S Z` plus `[` (array) and `L` (object) (`spec.md` §3
/// Field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            b'B' => Self::Byte,
            b'C' => Self::Char,
            b'D' => Self::Double,
            b'F' => Self::Float,
            b'I' => Self::Int,
            b'J' => Self::Long,
            b'S' => Self::Short,
            b'Z' => Self::Boolean,
            b'[' => Self::Array,
            b'L' => Self::Object,
            _ => return None,
        })
    }

    /// Whether this field type is read as a raw binary primitive rather
    /// than through a nested `readContent`.
    pub fn is_primitive(self) -> bool {
        !matches!(self, Self::Array | Self::Object)
    }
}

/// A class descriptor field (`spec.md` §3 Field).
#[derive(Debug, Clone)]
pub struct Field {
    pub field_type: FieldType,
    pub name: String,
    /// For `[`/`L` fields: the handle of the `STRING` content carrying the
    /// field's JVM type descriptor (e.g. `Lpkg/Cls;`, `[[I`).
    pub class_name: Option<Handle>,
    /// Set by the analyzer (`spec.md` §4.5) when this field is a
    /// `this$N` outer-instance reference.
    pub is_inner_class_reference: bool,
}

/// NORMAL vs PROXY class descriptors (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassType {
    Normal,
    Proxy,
}

/// The synthetic name assigned to proxy class descriptors (`spec.md` §3).
pub const PROXY_PLACEHOLDER_NAME: &str = "(proxy class; no name)";

/// A class descriptor (`spec.md` §3 Class descriptor).
#[derive(Debug, Clone)]
pub struct ClassDesc {
    pub class_type: ClassType,
    /// Class name as written (slashes intact) for NORMAL;
    /// [`PROXY_PLACEHOLDER_NAME`] for PROXY. Mutated in place by the
    /// analyzer's rename commit (`spec.md` §4.5).
    pub name: String,
    pub serial_version_uid: i64,
    pub desc_flags: DescFlags,
    pub fields: Vec<Field>,
    pub interfaces: Option<Vec<String>>,
    /// Populated during enum reads; a non-enum class must keep this
    /// empty (`spec.md` §3 Invariants).
    pub enum_constants: Vec<String>,
    pub superclass: Option<Handle>,
    /// Content read between the field table and the superclass
    /// descriptor (arbitrary `Content`, typically block data or
    /// instances).
    pub annotations: Vec<Value>,
    /// Filled by the analyzer.
    pub inner_classes: Vec<Handle>,
    pub is_inner_class: bool,
    pub is_local_inner_class: bool,
    pub is_static_member_class: bool,
}

impl ClassDesc {
    pub fn new_normal(name: String, serial_version_uid: i64, desc_flags: DescFlags) -> Self {
        Self {
            class_type: ClassType::Normal,
            name,
            serial_version_uid,
            desc_flags,
            fields: Vec::new(),
            interfaces: None,
            enum_constants: Vec::new(),
            superclass: None,
            annotations: Vec::new(),
            inner_classes: Vec::new(),
            is_inner_class: false,
            is_local_inner_class: false,
            is_static_member_class: false,
        }
    }

    pub fn new_proxy(interfaces: Vec<String>) -> Self {
        Self {
            class_type: ClassType::Proxy,
            name: PROXY_PLACEHOLDER_NAME.to_string(),
            serial_version_uid: 0,
            desc_flags: DescFlags::empty(),
            fields: Vec::new(),
            interfaces: Some(interfaces),
            enum_constants: Vec::new(),
            superclass: None,
            annotations: Vec::new(),
            inner_classes: Vec::new(),
            is_inner_class: false,
            is_local_inner_class: false,
            is_static_member_class: false,
        }
    }
}

/// One ancestor's worth of instance data (`spec.md` §3 Instance:
/// "per-superclass field-value map and per-superclass annotation list").
#[derive(Debug, Clone, Default)]
pub struct ClassData {
    pub fields: HashMap<String, FieldValue>,
    pub annotations: Vec<Value>,
}

/// An `INSTANCE` content (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Instance {
    pub class_desc: Handle,
    /// Ancestor-first, keyed by that ancestor's classdesc handle.
    pub class_data: Vec<(Handle, ClassData)>,
}

impl Instance {
    pub fn data_for(&self, class_desc: Handle) -> Option<&ClassData> {
        self.class_data
            .iter()
            .find(|(h, _)| *h == class_desc)
            .map(|(_, d)| d)
    }
}

/// The per-kind payload of a [`Content`].
#[derive(Debug, Clone)]
pub enum ContentData {
    String(String),
    /// `TC_CLASS`: a class literal referencing a class descriptor.
    Class { class_desc: Handle },
    ClassDesc(ClassDesc),
    Array {
        class_desc: Handle,
        elements: ArrayElements,
    },
    Enum {
        class_desc: Handle,
        /// Handle of the `STRING` content carrying the constant's name.
        value: Handle,
    },
    Instance(Instance),
    /// No handle; see [`Content::handle`].
    BlockData(Vec<u8>),
    /// `spec.md` §3: "handle equals that of the wrapped exception". Stored
    /// inline rather than as a [`Handle`]: by the time this is built, the
    /// exception subprotocol has reset the handle table twice, so the
    /// wrapped instance is no longer resolvable through it.
    ExceptionState {
        exception: Box<Content>,
        raw_prefix: Vec<u8>,
    },
}

impl ContentData {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "STRING",
            Self::Class { .. } => "CLASS",
            Self::ClassDesc(_) => "CLASSDESC",
            Self::Array { .. } => "ARRAY",
            Self::Enum { .. } => "ENUM",
            Self::Instance(_) => "INSTANCE",
            Self::BlockData(_) => "BLOCKDATA",
            Self::ExceptionState { .. } => "EXCEPTION_STATE",
        }
    }
}

/// One element of the decoded content graph: a tagged value plus its
/// protocol-assigned handle (absent only for `BLOCKDATA`) and whether the
/// stream flagged it as a captured exception.
#[derive(Debug, Clone)]
pub struct Content {
    pub handle: Option<Handle>,
    pub is_exception: bool,
    pub data: ContentData,
}

impl Content {
    pub fn class_desc(&self) -> Option<&ClassDesc> {
        match &self.data {
            ContentData::ClassDesc(cd) => Some(cd),
            _ => None,
        }
    }

    pub fn class_desc_mut(&mut self) -> Option<&mut ClassDesc> {
        match &mut self.data {
            ContentData::ClassDesc(cd) => Some(cd),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.data {
            ContentData::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn instance(&self) -> Option<&Instance> {
        match &self.data {
            ContentData::Instance(i) => Some(i),
            _ => None,
        }
    }
}
