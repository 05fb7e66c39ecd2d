//! The grammar decoder: the token-driven recursive-descent reader that
//! implements the full JOSSP grammar (`spec.md` §4.4).
//!
//! Grounded on the teacher's `impl Parse for ClassFile`/`CpInfo` tag-match
//! shape (`Noratrieb-coldsquare/src/parse/mod.rs`), generalized with the
//! handle-before-annotations binding order and the embedded-exception
//! control-flow return that `spec.md` requires and JVM class files don't
//! need.

use std::io::Read;

use tracing::{debug, trace};

use crate::byte_source::RecordingByteSource;
use crate::content::{
    ArrayElements, ClassData, ClassDesc, ClassType, Content, ContentData, DescFlags, Field,
    FieldType, FieldValue, Instance, Value,
};
use crate::error::{DecodeError, DecodeResult};
use crate::handle::{Handle, HandleTable};

const MAGIC: u16 = 0xACED;
const VERSION: u16 = 0x0005;

const TC_NULL: u8 = 0x70;
const TC_REFERENCE: u8 = 0x71;
const TC_CLASSDESC: u8 = 0x72;
const TC_OBJECT: u8 = 0x73;
const TC_STRING: u8 = 0x74;
const TC_ARRAY: u8 = 0x75;
const TC_CLASS: u8 = 0x76;
const TC_BLOCKDATA: u8 = 0x77;
const TC_ENDBLOCKDATA: u8 = 0x78;
const TC_RESET: u8 = 0x79;
const TC_BLOCKDATALONG: u8 = 0x7A;
const TC_EXCEPTION: u8 = 0x7B;
const TC_LONGSTRING: u8 = 0x7C;
const TC_PROXYCLASSDESC: u8 = 0x7D;
const TC_ENUM: u8 = 0x7E;

/// Options accepted by [`crate::decode`] (`spec.md` §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Whether to run the inner/static-member-class reconnection pass
    /// (`spec.md` §4.5) after decoding.
    pub connect_member_classes: bool,
}

/// The fully decoded stream: the top-level content sequence plus the
/// archived handle tables needed to resolve every back-reference
/// (`spec.md` §6).
pub struct DecodedStream {
    pub(crate) top_level: Vec<Option<Content>>,
    pub(crate) epochs: Vec<crate::handle::Epoch>,
}

impl DecodedStream {
    /// The ordered sequence of top-level items, including nulls and
    /// `EXCEPTION_STATE`s.
    pub fn top_level(&self) -> &[Option<Content>] {
        &self.top_level
    }

    pub fn top_level_mut(&mut self) -> &mut [Option<Content>] {
        &mut self.top_level
    }

    /// The ordered list of archived handle tables (one per epoch).
    pub fn epochs(&self) -> &[crate::handle::Epoch] {
        &self.epochs
    }

    #[cfg(test)]
    pub(crate) fn test_new(top_level: Vec<Option<Content>>, epochs: Vec<crate::handle::Epoch>) -> Self {
        Self { top_level, epochs }
    }
}

/// The control-flow signal for an embedded exception (`spec.md` §7, §9
/// "Embedded exception as control flow"): never a public error, always
/// absorbed at the nearest enclosing top-level record boundary.
pub(crate) enum FieldOutcome<T> {
    Value(T),
    Exception(Content),
}

/// Propagates a bubbled-up [`FieldOutcome::Exception`] out of the current
/// function, unwrapping [`FieldOutcome::Value`] otherwise. Stands in for
/// the `?` operator, which custom control-flow residuals can't use on
/// stable Rust.
macro_rules! bubble {
    ($expr:expr) => {
        match $expr? {
            FieldOutcome::Value(v) => v,
            FieldOutcome::Exception(c) => return Ok(FieldOutcome::Exception(c)),
        }
    };
}

/// Decodes a full JOSSP byte stream (`spec.md` §4.4 entry point).
pub fn decode<R: Read>(source: R, options: Options) -> DecodeResult<DecodedStream> {
    let mut source = RecordingByteSource::new(source);

    let magic = source.read_u16()?;
    if magic != MAGIC {
        return Err(DecodeError::validity(
            0,
            format!("magic {MAGIC:#06x}"),
            format!("{magic:#06x}"),
        ));
    }
    let version = source.read_u16()?;
    if version != VERSION {
        return Err(DecodeError::validity(
            2,
            format!("version {VERSION:#06x}"),
            format!("{version:#06x}"),
        ));
    }
    debug!("header validated");

    let mut decoder = Decoder {
        source,
        table: HandleTable::new(),
    };

    let mut top_level = Vec::new();
    loop {
        decoder.source.start_recording();
        let Some(tag) = decoder.source.read_tag()? else {
            break;
        };

        if tag == TC_RESET {
            trace!("TC_RESET at top level");
            decoder.table.reset();
            continue;
        }

        match decoder.read_content(tag, true)? {
            FieldOutcome::Value(content) => {
                if let Some(c) = &content {
                    debug!(kind = c.data.kind_name(), "top-level content");
                }
                top_level.push(content);
            }
            FieldOutcome::Exception(exc) => {
                let raw_prefix = decoder.source.snapshot();
                debug!("captured embedded exception");
                top_level.push(Some(Content {
                    handle: exc.handle,
                    is_exception: true,
                    data: ContentData::ExceptionState {
                        exception: Box::new(exc),
                        raw_prefix,
                    },
                }));
            }
        }
    }

    let epochs = decoder.table.finish();
    for epoch in &epochs {
        validate_all(epoch)?;
    }

    let mut stream = DecodedStream { top_level, epochs };

    if options.connect_member_classes {
        crate::analyzer::connect_member_classes(&mut stream)?;
    }

    Ok(stream)
}

struct Decoder<R> {
    source: RecordingByteSource<R>,
    table: HandleTable,
}

impl<R: Read> Decoder<R> {
    fn offset(&self) -> u64 {
        self.source.offset()
    }

    fn next_tag(&mut self) -> DecodeResult<u8> {
        self.source
            .read_tag()?
            .ok_or_else(|| DecodeError::truncation(self.offset(), "a tag byte"))
    }

    /// Reads the next tag and dispatches it (`spec.md` §4.4 "Content
    /// dispatch").
    fn read_content_tagged(&mut self, allow_block_data: bool) -> DecodeResult<FieldOutcome<Option<Content>>> {
        let tag = self.next_tag()?;
        self.read_content(tag, allow_block_data)
    }

    fn read_content(&mut self, tag: u8, allow_block_data: bool) -> DecodeResult<FieldOutcome<Option<Content>>> {
        trace!(tag = format!("{tag:#04x}"), "dispatch");
        match tag {
            TC_NULL => Ok(FieldOutcome::Value(None)),
            TC_REFERENCE => {
                let raw = self.source.read_i32()?;
                let handle: Handle = Handle::from(raw);
                let content = self.table.resolve(handle, self.offset())?.clone();
                Ok(FieldOutcome::Value(Some(content)))
            }
            TC_OBJECT => match self.read_instance()? {
                FieldOutcome::Value(c) => Ok(FieldOutcome::Value(Some(c))),
                FieldOutcome::Exception(c) => Ok(FieldOutcome::Exception(c)),
            },
            TC_CLASS => match self.read_class_literal()? {
                FieldOutcome::Value(c) => Ok(FieldOutcome::Value(Some(c))),
                FieldOutcome::Exception(c) => Ok(FieldOutcome::Exception(c)),
            },
            TC_ARRAY => match self.read_array()? {
                FieldOutcome::Value(c) => Ok(FieldOutcome::Value(Some(c))),
                FieldOutcome::Exception(c) => Ok(FieldOutcome::Exception(c)),
            },
            TC_STRING => Ok(FieldOutcome::Value(Some(self.read_short_string()?))),
            TC_LONGSTRING => Ok(FieldOutcome::Value(Some(self.read_long_string()?))),
            TC_ENUM => match self.read_enum()? {
                FieldOutcome::Value(c) => Ok(FieldOutcome::Value(Some(c))),
                FieldOutcome::Exception(c) => Ok(FieldOutcome::Exception(c)),
            },
            TC_CLASSDESC => match self.read_class_desc(ClassType::Normal)? {
                FieldOutcome::Value(c) => Ok(FieldOutcome::Value(Some(c))),
                FieldOutcome::Exception(c) => Ok(FieldOutcome::Exception(c)),
            },
            TC_PROXYCLASSDESC => match self.read_class_desc(ClassType::Proxy)? {
                FieldOutcome::Value(c) => Ok(FieldOutcome::Value(Some(c))),
                FieldOutcome::Exception(c) => Ok(FieldOutcome::Exception(c)),
            },
            TC_EXCEPTION => Ok(FieldOutcome::Exception(self.read_exception()?)),
            TC_BLOCKDATA if allow_block_data => Ok(FieldOutcome::Value(Some(self.read_block_data_short()?))),
            TC_BLOCKDATALONG if allow_block_data => {
                Ok(FieldOutcome::Value(Some(self.read_block_data_long()?)))
            }
            TC_BLOCKDATA | TC_BLOCKDATALONG => Err(DecodeError::validity_byte(
                self.offset(),
                "a tag other than block data in this position",
                tag,
            )),
            other => Err(DecodeError::validity_byte(self.offset(), "a recognized tag", other)),
        }
    }

    /// Reads a tag expected to resolve to a `STRING` (field class-name,
    /// enum constant name). `TC_NULL` is rejected here per `spec.md` §4.4
    /// Strings.
    fn read_string_ref(&mut self) -> DecodeResult<FieldOutcome<Handle>> {
        let content = match bubble!(self.read_content_tagged(false)) {
            Some(c) => c,
            None => return Err(DecodeError::validity(self.offset(), "a STRING", "TC_NULL")),
        };
        if content.as_string().is_none() {
            return Err(DecodeError::validity(
                self.offset(),
                "a STRING",
                content.data.kind_name(),
            ));
        }
        let handle = content
            .handle
            .expect("STRING content always carries a handle");
        Ok(FieldOutcome::Value(handle))
    }

    /// Reads a tag expected to resolve to a class descriptor (or null).
    fn read_class_desc_ref(&mut self) -> DecodeResult<FieldOutcome<Option<Handle>>> {
        let content = match bubble!(self.read_content_tagged(false)) {
            Some(c) => c,
            None => return Ok(FieldOutcome::Value(None)),
        };
        if content.class_desc().is_none() {
            return Err(DecodeError::validity(
                self.offset(),
                "a CLASSDESC",
                content.data.kind_name(),
            ));
        }
        let handle = content
            .handle
            .expect("CLASSDESC content always carries a handle");
        Ok(FieldOutcome::Value(Some(handle)))
    }

    fn read_class_desc(&mut self, class_type: ClassType) -> DecodeResult<FieldOutcome<Content>> {
        let handle: Handle = self.table.alloc();

        let mut desc = match class_type {
            ClassType::Normal => {
                let name_handle = self.read_utf()?;
                let serial_version_uid = self.source.read_i64()?;
                // Handle allocation happens before annotations/superclass
                // so forward references written by the annotation writer
                // can resolve (spec.md §4.4 "Class descriptors").
                let desc_flags = DescFlags::from_bits_truncate(self.source.read_u8()?);
                let field_count = self.source.read_u16()?;
                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    fields.push(bubble!(self.read_field_decl()));
                }
                let mut desc = ClassDesc::new_normal(name_handle, serial_version_uid, desc_flags);
                desc.fields = fields;
                desc
            }
            ClassType::Proxy => {
                let interface_count = self.source.read_u32()?;
                let mut interfaces = Vec::with_capacity(interface_count as usize);
                for _ in 0..interface_count {
                    interfaces.push(self.read_utf()?);
                }
                ClassDesc::new_proxy(interfaces)
            }
        };

        self.table.bind(
            handle,
            Content {
                handle: Some(handle),
                is_exception: false,
                data: ContentData::ClassDesc(desc.clone()),
            },
            self.offset(),
        )?;

        let annotations = bubble!(self.read_annotations());
        let superclass = bubble!(self.read_class_desc_ref());

        desc.annotations = annotations;
        desc.superclass = superclass;

        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::ClassDesc(desc),
        };
        *self.table.resolve_mut(handle, self.offset())? = content.clone();

        Ok(FieldOutcome::Value(content))
    }

    fn read_field_decl(&mut self) -> DecodeResult<FieldOutcome<Field>> {
        let type_tag = self.source.read_u8()?;
        let field_type = FieldType::from_tag(type_tag).ok_or_else(|| {
            DecodeError::validity_byte(self.offset(), "a field type code (BCDFIJSZ[L)", type_tag)
        })?;
        let name = self.read_utf()?;
        let class_name = if field_type.is_primitive() {
            None
        } else {
            Some(bubble!(self.read_string_ref()))
        };
        Ok(FieldOutcome::Value(Field {
            field_type,
            name,
            class_name,
            is_inner_class_reference: false,
        }))
    }

    /// Reads `TC_STRING`/`TC_LONGSTRING`-tagged class annotations,
    /// terminated by `TC_ENDBLOCKDATA`, honoring and skipping `TC_RESET`
    /// (`spec.md` §4.4 "Class annotations").
    fn read_annotations(&mut self) -> DecodeResult<FieldOutcome<Vec<Value>>> {
        let mut out = Vec::new();
        loop {
            let tag = self.next_tag()?;
            if tag == TC_ENDBLOCKDATA {
                break;
            }
            if tag == TC_RESET {
                self.table.reset();
                continue;
            }
            let content = bubble!(self.read_content(tag, true));
            out.push(content_to_value(content));
        }
        Ok(FieldOutcome::Value(out))
    }

    fn read_instance(&mut self) -> DecodeResult<FieldOutcome<Content>> {
        // spec.md §4.4 "Instances": the class descriptor reference is read
        // before the instance's own handle is allocated, so that a
        // freshly-written (not back-referenced) descriptor receives the
        // earlier, first-appearance handle (spec.md §3 "strict
        // first-appearance order").
        let class_desc_handle = match bubble!(self.read_class_desc_ref()) {
            Some(h) => h,
            None => return Err(DecodeError::validity(self.offset(), "a CLASSDESC", "TC_NULL")),
        };

        let handle: Handle = self.table.alloc();
        self.table.bind(
            handle,
            Content {
                handle: Some(handle),
                is_exception: false,
                data: ContentData::Instance(Instance {
                    class_desc: class_desc_handle,
                    class_data: Vec::new(),
                }),
            },
            self.offset(),
        )?;

        let hierarchy = self.hierarchy_order(class_desc_handle)?;
        let mut class_data = Vec::with_capacity(hierarchy.len());

        for ancestor in hierarchy {
            let desc = self
                .table
                .resolve(ancestor, self.offset())?
                .class_desc()
                .expect("hierarchy_order only yields CLASSDESC handles")
                .clone();

            let data = if desc.class_type == ClassType::Proxy {
                // spec.md §3 hierarchy note: "PROXY ... only annotations
                // apply" — proxy descriptors have no fields and are
                // always read as annotations-only, regardless of flags.
                ClassData {
                    fields: Default::default(),
                    annotations: bubble!(self.read_annotations()),
                }
            } else if desc.desc_flags.contains(DescFlags::SERIALIZABLE) {
                let mut fields = std::collections::HashMap::with_capacity(desc.fields.len());
                for field in &desc.fields {
                    let value = bubble!(self.read_field_value(field));
                    fields.insert(field.name.clone(), value);
                }
                let annotations = if desc.desc_flags.contains(DescFlags::WRITE_METHOD)
                    && !desc.desc_flags.contains(DescFlags::ENUM)
                {
                    bubble!(self.read_annotations())
                } else {
                    Vec::new()
                };
                ClassData { fields, annotations }
            } else if desc.desc_flags.contains(DescFlags::EXTERNALIZABLE) {
                if !desc.desc_flags.contains(DescFlags::BLOCK_DATA) {
                    return Err(DecodeError::validity(
                        self.offset(),
                        "BLOCK_DATA flag on an externalizable class descriptor",
                        "cannot interpret externalizable data without block-data marker",
                    ));
                }
                ClassData {
                    fields: Default::default(),
                    annotations: bubble!(self.read_annotations()),
                }
            } else {
                ClassData::default()
            };

            class_data.push((ancestor, data));
        }

        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::Instance(Instance {
                class_desc: class_desc_handle,
                class_data,
            }),
        };
        *self.table.resolve_mut(handle, self.offset())? = content.clone();

        Ok(FieldOutcome::Value(content))
    }

    /// `spec.md` §3 "Class descriptor hierarchy order".
    fn hierarchy_order(&self, leaf: Handle) -> DecodeResult<Vec<Handle>> {
        let mut chain = Vec::new();
        let mut current = Some(leaf);
        while let Some(h) = current {
            let desc = self
                .table
                .resolve(h, self.offset())?
                .class_desc()
                .ok_or_else(|| DecodeError::validity(self.offset(), "a CLASSDESC handle", "another kind"))?;
            chain.push(h);
            current = if desc.class_type == ClassType::Proxy {
                None
            } else {
                desc.superclass
            };
        }
        chain.reverse();
        Ok(chain)
    }

    fn read_field_value(&mut self, field: &Field) -> DecodeResult<FieldOutcome<FieldValue>> {
        use FieldType::*;
        Ok(FieldOutcome::Value(match field.field_type {
            Byte => FieldValue::Byte(self.source.read_u8()? as i8),
            Char => FieldValue::Char(self.source.read_u16()?),
            Double => FieldValue::Double(f64::from_bits(self.source.read_u64()?)),
            Float => FieldValue::Float(f32::from_bits(self.source.read_u32()?)),
            Int => FieldValue::Int(self.source.read_i32()?),
            Long => FieldValue::Long(self.source.read_i64()?),
            Short => FieldValue::Short(self.source.read_u16()? as i16),
            Boolean => FieldValue::Boolean(self.source.read_u8()? != 0),
            Array | Object => {
                let content = bubble!(self.read_content_tagged(false));
                FieldValue::Reference(content.map(content_to_value).unwrap_or(Value::Null))
            }
        }))
    }

    fn read_class_literal(&mut self) -> DecodeResult<FieldOutcome<Content>> {
        // spec.md §3 "strict first-appearance order": the referenced class
        // descriptor, if freshly written, must receive the earlier handle.
        let class_desc = match bubble!(self.read_class_desc_ref()) {
            Some(h) => h,
            None => return Err(DecodeError::validity(self.offset(), "a CLASSDESC", "TC_NULL")),
        };
        let handle: Handle = self.table.alloc();
        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::Class { class_desc },
        };
        self.table.bind(handle, content.clone(), self.offset())?;
        Ok(FieldOutcome::Value(content))
    }

    fn read_array(&mut self) -> DecodeResult<FieldOutcome<Content>> {
        // spec.md §4.4 "Arrays": "Read class descriptor, allocate handle,
        // ..." — the descriptor precedes the array's own handle so a
        // freshly-written descriptor gets the earlier, first-appearance
        // handle.
        let class_desc_handle = match bubble!(self.read_class_desc_ref()) {
            Some(h) => h,
            None => return Err(DecodeError::validity(self.offset(), "a CLASSDESC", "TC_NULL")),
        };

        let handle: Handle = self.table.alloc();

        // Placeholder bind so self-referential arrays can resolve
        // mid-construction, mirroring the instance cycle support in
        // spec.md §9.
        self.table.bind(
            handle,
            Content {
                handle: Some(handle),
                is_exception: false,
                data: ContentData::Array {
                    class_desc: class_desc_handle,
                    elements: ArrayElements::Reference(Vec::new()),
                },
            },
            self.offset(),
        )?;

        let name = self
            .table
            .resolve(class_desc_handle, self.offset())?
            .class_desc()
            .expect("read_class_desc_ref only yields CLASSDESC handles")
            .name
            .clone();

        // spec.md §8 property 7: array descriptor names of length 1 fail
        // validity; the second character determines element kind, which
        // is the Open Question (a) "TC_ARRAY follows declared ARRAY field
        // type" check implemented as a natural consequence.
        if name.len() < 2 || !name.starts_with('[') {
            return Err(DecodeError::validity(
                self.offset(),
                "an array class descriptor name starting with '['",
                name,
            ));
        }
        let elem_tag = name.as_bytes()[1];

        let length = self.source.read_i32()?;
        if length < 0 {
            return Err(DecodeError::size_limit(self.offset(), "array length", length as i64));
        }
        let length = length as usize;

        let elements = bubble!(self.read_array_elements(elem_tag, length));

        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::Array {
                class_desc: class_desc_handle,
                elements,
            },
        };
        *self.table.resolve_mut(handle, self.offset())? = content.clone();
        Ok(FieldOutcome::Value(content))
    }

    fn read_array_elements(&mut self, elem_tag: u8, length: usize) -> DecodeResult<FieldOutcome<ArrayElements>> {
        macro_rules! primitive_elems {
            ($read:expr, $variant:ident) => {{
                let mut v = Vec::with_capacity(length);
                for _ in 0..length {
                    v.push($read(self)?);
                }
                Ok(FieldOutcome::Value(ArrayElements::$variant(v)))
            }};
        }

        match elem_tag {
            b'B' => primitive_elems!(|d: &mut Self| Ok::<_, DecodeError>(d.source.read_u8()? as i8), Byte),
            b'C' => primitive_elems!(|d: &mut Self| d.source.read_u16(), Char),
            b'D' => primitive_elems!(
                |d: &mut Self| Ok::<_, DecodeError>(f64::from_bits(d.source.read_u64()?)),
                Double
            ),
            b'F' => primitive_elems!(
                |d: &mut Self| Ok::<_, DecodeError>(f32::from_bits(d.source.read_u32()?)),
                Float
            ),
            b'I' => primitive_elems!(|d: &mut Self| d.source.read_i32(), Int),
            b'J' => primitive_elems!(|d: &mut Self| d.source.read_i64(), Long),
            b'S' => primitive_elems!(
                |d: &mut Self| Ok::<_, DecodeError>(d.source.read_u16()? as i16),
                Short
            ),
            b'Z' => primitive_elems!(
                |d: &mut Self| Ok::<_, DecodeError>(d.source.read_u8()? != 0),
                Boolean
            ),
            b'[' | b'L' => {
                let mut v = Vec::with_capacity(length);
                for _ in 0..length {
                    match self.read_content_tagged(false)? {
                        FieldOutcome::Exception(c) => return Ok(FieldOutcome::Exception(c)),
                        FieldOutcome::Value(content) => {
                            v.push(content.map(content_to_value).unwrap_or(Value::Null))
                        }
                    }
                }
                Ok(FieldOutcome::Value(ArrayElements::Reference(v)))
            }
            other => Err(DecodeError::validity_byte(
                self.offset(),
                "a field type code as array element kind",
                other,
            )),
        }
    }

    fn read_enum(&mut self) -> DecodeResult<FieldOutcome<Content>> {
        // spec.md §4.4 "Enums": "Read class descriptor, allocate enum
        // handle, ..." — same first-appearance-order reasoning as arrays.
        let class_desc = match bubble!(self.read_class_desc_ref()) {
            Some(h) => h,
            None => return Err(DecodeError::validity(self.offset(), "a CLASSDESC", "TC_NULL")),
        };
        let handle: Handle = self.table.alloc();
        let value = bubble!(self.read_string_ref());
        let name = self
            .table
            .resolve(value, self.offset())?
            .as_string()
            .expect("read_string_ref only yields STRING handles")
            .to_string();

        self.table
            .resolve_mut(class_desc, self.offset())?
            .class_desc_mut()
            .expect("read_class_desc_ref only yields CLASSDESC handles")
            .enum_constants
            .push(name);

        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::Enum { class_desc, value },
        };
        self.table.bind(handle, content.clone(), self.offset())?;
        Ok(FieldOutcome::Value(content))
    }

    fn read_short_string(&mut self) -> DecodeResult<Content> {
        let handle: Handle = self.table.alloc();
        let len = self.source.read_u16()? as usize;
        let bytes = self.source.read_bytes(len)?;
        let value = crate::mutf8::decode(&bytes, self.offset() - len as u64)?;
        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::String(value),
        };
        self.table.bind(handle, content.clone(), self.offset())?;
        Ok(content)
    }

    fn read_long_string(&mut self) -> DecodeResult<Content> {
        let handle: Handle = self.table.alloc();
        let len = self.source.read_i64()?;
        if len < 0 || len >= (1i64 << 31) {
            return Err(DecodeError::size_limit(self.offset(), "long string length", len));
        }
        // spec.md §9 Open Question (c): lengths under 65536 are accepted
        // silently, not merely warned.
        let bytes = self.source.read_bytes(len as usize)?;
        let value = crate::mutf8::decode(&bytes, self.offset() - len as u64)?;
        let content = Content {
            handle: Some(handle),
            is_exception: false,
            data: ContentData::String(value),
        };
        self.table.bind(handle, content.clone(), self.offset())?;
        Ok(content)
    }

    /// Reads a class name / interface name / field name: a 16-bit-length-
    /// prefixed modified-UTF-8 run with no handle of its own (these are
    /// embedded directly as `String` fields on descriptors, not as
    /// `STRING` content). The grammar has no long form for these names.
    fn read_utf(&mut self) -> DecodeResult<String> {
        let len = self.source.read_u16()? as usize;
        let bytes = self.source.read_bytes(len)?;
        crate::mutf8::decode(&bytes, self.offset() - len as u64)
    }

    fn read_block_data_short(&mut self) -> DecodeResult<Content> {
        let len = self.source.read_u8()? as usize;
        let bytes = self.source.read_bytes(len)?;
        Ok(Content {
            handle: None,
            is_exception: false,
            data: ContentData::BlockData(bytes),
        })
    }

    fn read_block_data_long(&mut self) -> DecodeResult<Content> {
        let len = self.source.read_i32()?;
        if len < 0 {
            return Err(DecodeError::size_limit(self.offset(), "block data length", len as i64));
        }
        let bytes = self.source.read_bytes(len as usize)?;
        Ok(Content {
            handle: None,
            is_exception: false,
            data: ContentData::BlockData(bytes),
        })
    }

    /// The exception subprotocol (`spec.md` §4.4 "Exception
    /// subprotocol"). `TC_RESET` encountered while reading the wrapped
    /// instance is not handled specially: it isn't part of the content
    /// dispatch table, so it falls through to "unrecognized tag" and
    /// becomes a validity error, matching Open Question (b) in `spec.md`
    /// §9.
    fn read_exception(&mut self) -> DecodeResult<Content> {
        self.table.reset();
        let tag = self.next_tag()?;
        let outcome = self.read_content(tag, false)?;
        let mut content = match outcome {
            FieldOutcome::Value(Some(c)) => c,
            FieldOutcome::Value(None) => {
                return Err(DecodeError::validity(self.offset(), "a non-null exception INSTANCE", "TC_NULL"))
            }
            FieldOutcome::Exception(_) => {
                return Err(DecodeError::validity(
                    self.offset(),
                    "a single exception object",
                    "a nested TC_EXCEPTION",
                ))
            }
        };
        if content.instance().is_none() {
            return Err(DecodeError::validity(
                self.offset(),
                "an INSTANCE",
                content.data.kind_name(),
            ));
        }
        content.is_exception = true;
        self.table.reset();
        Ok(content)
    }
}

fn content_to_value(content: Content) -> Value {
    match content.handle {
        Some(h) => Value::Ref(h),
        None => match content.data {
            ContentData::BlockData(b) => Value::Inline(b),
            _ => unreachable!("only BLOCKDATA content carries no handle"),
        },
    }
}

/// Runs the post-parse validation pass of `spec.md` §4.4 "Validation
/// pass" / §3 Invariants over one epoch's bindings.
pub(crate) fn validate_all(epoch: &crate::handle::Epoch) -> DecodeResult<()> {
    for content in epoch.values() {
        if let Some(cd) = content.class_desc() {
            validate_class_desc(cd)?;
        }
    }
    Ok(())
}

fn validate_class_desc(cd: &ClassDesc) -> DecodeResult<()> {
    if cd.desc_flags.contains(DescFlags::SERIALIZABLE) && cd.desc_flags.contains(DescFlags::EXTERNALIZABLE) {
        return Err(DecodeError::validity(
            0,
            "SERIALIZABLE and EXTERNALIZABLE not both set",
            format!("both set on {}", cd.name),
        ));
    }
    if !cd.desc_flags.contains(DescFlags::SERIALIZABLE)
        && !cd.desc_flags.contains(DescFlags::EXTERNALIZABLE)
        && !cd.fields.is_empty()
    {
        return Err(DecodeError::validity(
            0,
            "zero fields when neither SERIALIZABLE nor EXTERNALIZABLE is set",
            format!("{} field(s) on {}", cd.fields.len(), cd.name),
        ));
    }
    if cd.desc_flags.contains(DescFlags::ENUM) {
        if !cd.fields.is_empty() {
            return Err(DecodeError::validity(
                0,
                "no fields on an ENUM class descriptor",
                format!("{} field(s) on {}", cd.fields.len(), cd.name),
            ));
        }
        if cd.interfaces.as_ref().is_some_and(|i| !i.is_empty()) {
            return Err(DecodeError::validity(
                0,
                "no interfaces on an ENUM class descriptor",
                cd.name.clone(),
            ));
        }
    } else if !cd.enum_constants.is_empty() {
        return Err(DecodeError::validity(
            0,
            "an empty enumConstants set on a non-enum class descriptor",
            format!("{} constant(s) on {}", cd.enum_constants.len(), cd.name),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn desc(flags: DescFlags, field_count: usize, enum_constants: usize) -> ClassDesc {
        let mut cd = ClassDesc::new_normal("pkg.Example".to_string(), 0, flags);
        cd.fields = (0..field_count)
            .map(|i| Field {
                field_type: FieldType::Int,
                name: format!("f{i}"),
                class_name: None,
                is_inner_class_reference: false,
            })
            .collect();
        cd.enum_constants = (0..enum_constants).map(|i| format!("C{i}")).collect();
        cd
    }

    /// Property 5: SERIALIZABLE and EXTERNALIZABLE are mutually exclusive.
    #[test]
    fn serializable_and_externalizable_both_set_is_invalid() {
        let cd = desc(DescFlags::SERIALIZABLE | DescFlags::EXTERNALIZABLE, 0, 0);
        assert!(validate_class_desc(&cd).is_err());
    }

    /// Property 5: fields require SERIALIZABLE or EXTERNALIZABLE.
    #[test]
    fn fields_without_either_flag_is_invalid() {
        let cd = desc(DescFlags::empty(), 1, 0);
        assert!(validate_class_desc(&cd).is_err());
    }

    /// Property 5: ENUM descriptors carry no fields.
    #[test]
    fn enum_with_fields_is_invalid() {
        let cd = desc(DescFlags::ENUM, 1, 0);
        assert!(validate_class_desc(&cd).is_err());
    }

    /// Property 5: non-ENUM descriptors carry no enum constants.
    #[test]
    fn non_enum_with_enum_constants_is_invalid() {
        let cd = desc(DescFlags::SERIALIZABLE, 0, 1);
        assert!(validate_class_desc(&cd).is_err());
    }

    #[test]
    fn serializable_with_fields_is_valid() {
        let cd = desc(DescFlags::SERIALIZABLE, 3, 0);
        assert!(validate_class_desc(&cd).is_ok());
    }

    proptest! {
        /// Property 5, generalized: any flag/field/enum-constant combination
        /// obeying the four rules validates; any combination violating one
        /// fails. Encodes the same rules as `validate_class_desc` over
        /// (flags, field_count, enum_constant_count) triples.
        #[test]
        fn descriptor_flag_rules_hold(
            serializable in any::<bool>(),
            externalizable in any::<bool>(),
            is_enum in any::<bool>(),
            field_count in 0usize..4,
            enum_constant_count in 0usize..4,
        ) {
            let mut flags = DescFlags::empty();
            if serializable { flags |= DescFlags::SERIALIZABLE; }
            if externalizable { flags |= DescFlags::EXTERNALIZABLE; }
            if is_enum { flags |= DescFlags::ENUM; }
            let cd = desc(flags, field_count, enum_constant_count);

            let should_be_valid = !(serializable && externalizable)
                && (serializable || externalizable || field_count == 0)
                && !(is_enum && field_count > 0)
                && (is_enum || enum_constant_count == 0);

            prop_assert_eq!(validate_class_desc(&cd).is_ok(), should_be_valid);
        }
    }
}
